//! Echo server on a Unix domain socket, driven by a cooperative event loop.
//!
//! A blocking client thread sends a few messages and prints the replies.
//! Run with `cargo run -p msgrelay --example relay-echo`.

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::thread;
    use std::time::Duration;

    use msgrelay::connection::{
        Connection, EventLoop, FinishMessage, MessageRegistry, ResponseMessage,
    };
    use msgrelay::frame::{split_stream, FrameConfig};
    use msgrelay::transport::UnixDomainSocket;

    let path = std::env::temp_dir().join(format!("msgrelay-echo-{}.sock", std::process::id()));
    let listener = UnixDomainSocket::bind(&path)?;

    let client_path = path.clone();
    let client = thread::spawn(move || -> Result<(), msgrelay::frame::FrameError> {
        let stream = UnixDomainSocket::connect(&client_path).map_err(std::io::Error::other)?;
        let (mut reader, mut writer) = split_stream(stream, FrameConfig::default())?;

        for word in ["alpha", "beta", "gamma"] {
            writer.send(1, word.as_bytes())?;
            let reply = reader.read_frame()?;
            println!(
                "client: id={} reply={}",
                reply.id,
                String::from_utf8_lossy(&reply.payload)
            );
        }
        writer.send(2, &0i32.to_le_bytes())?;
        Ok(())
    });

    let event_loop = EventLoop::new();
    let registry = Rc::new(MessageRegistry::with_builtin());
    let connection = Connection::from_connected(
        Rc::clone(&event_loop),
        registry,
        listener.accept_transport()?,
        FrameConfig::default(),
    )?;

    let closed = Rc::new(Cell::new(false));
    {
        let closed = Rc::clone(&closed);
        connection.on_destroyed(move |_| closed.set(true));
    }
    {
        let closed = Rc::clone(&closed);
        connection.on_disconnected(move |_| closed.set(true));
    }
    connection.on_new_message(|message, connection| {
        if let Some(response) = message.downcast_ref::<ResponseMessage>() {
            let mut echoed = b"echo: ".to_vec();
            echoed.extend_from_slice(&response.data);
            connection.write_async(echoed);
        } else if let Some(finish) = message.downcast_ref::<FinishMessage>() {
            println!("server: client finished with status {}", finish.status);
            connection.finish();
        }
    });

    let weak = Rc::downgrade(&connection);
    drop(connection);
    while !closed.get() {
        if let Some(connection) = weak.upgrade() {
            connection.pump();
        }
        event_loop.run_until_idle();
        thread::sleep(Duration::from_millis(5));
    }

    client
        .join()
        .map_err(|_| std::io::Error::other("client thread panicked"))??;
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("relay-echo needs Unix domain sockets");
}

//! Run child processes synchronously and asynchronously.
//!
//! Run with `cargo run -p msgrelay --example run-child`.

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::mpsc;

    use msgrelay::process::{ExecFlags, Process};

    let mut listing = Process::new();
    listing.exec("sh", &["-c", "echo one; echo two >&2; exit 3"], None, ExecFlags::NONE)?;
    listing.wait_for_process_to_finish();
    println!(
        "exec: stdout={:?} stderr={:?} code={:?}",
        String::from_utf8_lossy(&listing.read_all_stdout()),
        String::from_utf8_lossy(&listing.read_all_stderr()),
        listing.return_code()
    );

    let (tx, rx) = mpsc::channel();
    let mut upper = Process::new();
    upper.on_stdout_ready(move |handle| {
        let _ = tx.send(handle.read_all_stdout());
    });
    upper.on_finished(|handle| println!("start: finished with {:?}", handle.return_code()));
    upper.start("tr", &["a-z", "A-Z"], &[])?;

    upper.write_stdin(b"relayed through a pipe\n")?;
    upper.close_stdin();
    upper.wait_for_process_to_finish();
    for chunk in rx.try_iter() {
        print!("start: {}", String::from_utf8_lossy(&chunk));
    }
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("run-child uses POSIX tools");
}

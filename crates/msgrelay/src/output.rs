use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use msgrelay_connection::{
    FinishMessage, Message, QuitMessage, ResponseMessage, FINISH_MESSAGE_ID, QUIT_MESSAGE_ID,
    RESPONSE_MESSAGE_ID,
};
use msgrelay_frame::MessageId;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    id: MessageId,
    kind: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_message(message: &dyn Message, format: OutputFormat) {
    let id = message.message_id();
    let bytes = message.to_bytes();
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                id,
                kind: message_kind(id),
                payload_size: bytes.len(),
                payload: describe_payload(message, &bytes),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "KIND", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    id.to_string(),
                    message_kind(id).to_string(),
                    bytes.len().to_string(),
                    describe_payload(message, &bytes),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "id={} ({}) size={} payload={}",
                id,
                message_kind(id),
                bytes.len(),
                describe_payload(message, &bytes)
            );
        }
        OutputFormat::Raw => print_raw(&bytes),
    }
}

#[derive(Serialize)]
pub struct ExecReport {
    pub command: String,
    pub args: Vec<String>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    #[serde(skip)]
    pub stdout: Vec<u8>,
    #[serde(skip)]
    pub stderr: Vec<u8>,
}

#[derive(Serialize)]
struct ExecOutput<'a> {
    #[serde(flatten)]
    report: &'a ExecReport,
    stdout: String,
    stderr: String,
}

pub fn print_exec(report: &ExecReport, format: OutputFormat) {
    let exit_code = report
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    match format {
        OutputFormat::Json => {
            print_json(&ExecOutput {
                report,
                stdout: String::from_utf8_lossy(&report.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&report.stderr).into_owned(),
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "EXIT", "STDOUT", "STDERR"])
                .add_row(vec![
                    command_line(report),
                    exit_code,
                    payload_preview(&report.stdout),
                    payload_preview(&report.stderr),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("command={} exit={}", command_line(report), exit_code);
            if !report.stdout.is_empty() {
                println!("--- stdout ---\n{}", payload_preview(&report.stdout));
            }
            if !report.stderr.is_empty() {
                println!("--- stderr ---\n{}", payload_preview(&report.stderr));
            }
        }
        OutputFormat::Raw => {
            print_raw(&report.stdout);
            let mut err = std::io::stderr();
            let _ = err.write_all(&report.stderr);
            let _ = err.flush();
        }
    }
}

#[derive(Serialize)]
pub struct SendReport<'a> {
    pub path: &'a str,
    pub id: MessageId,
    pub payload_size: usize,
}

pub fn print_sent(report: &SendReport<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PATH", "ID", "SIZE"])
                .add_row(vec![
                    report.path.to_string(),
                    report.id.to_string(),
                    report.payload_size.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "sent id={} size={} to {}",
                report.id, report.payload_size, report.path
            );
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn message_kind(id: MessageId) -> &'static str {
    match id {
        RESPONSE_MESSAGE_ID => "response",
        FINISH_MESSAGE_ID => "finish",
        QUIT_MESSAGE_ID => "quit",
        _ => "user",
    }
}

fn describe_payload(message: &dyn Message, bytes: &[u8]) -> String {
    if let Some(finish) = message.downcast_ref::<FinishMessage>() {
        return format!("status={}", finish.status);
    }
    if let Some(quit) = message.downcast_ref::<QuitMessage>() {
        return format!("exit_code={}", quit.exit_code);
    }
    if let Some(response) = message.downcast_ref::<ResponseMessage>() {
        return payload_preview(&response.data);
    }
    payload_preview(bytes)
}

fn command_line(report: &ExecReport) -> String {
    std::iter::once(report.command.as_str())
        .chain(report.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

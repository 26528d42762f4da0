use std::io::{IsTerminal, Write};

use chunkprims_message::{type_name, Message};
use chunkprims_stream::{chunk_stream_name, ChunkMessage};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
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

#[derive(Debug, Serialize)]
pub struct MessageOutput {
    pub chunk_stream_id: u32,
    pub chunk_stream_name: &'static str,
    pub timestamp: u64,
    pub message_stream_id: u32,
    pub type_id: u8,
    pub type_name: &'static str,
    pub size: usize,
    pub payload: String,
}

impl MessageOutput {
    pub fn new(message: &ChunkMessage) -> Self {
        let body = &message.fragment.message;
        let type_id = body.type_id();
        Self {
            chunk_stream_id: message.chunk_stream_id,
            chunk_stream_name: chunk_stream_name(message.chunk_stream_id),
            timestamp: message.timestamp,
            message_stream_id: message.fragment.stream_id,
            type_id,
            type_name: type_name(type_id),
            size: body.encoded_len(),
            payload: describe(body),
        }
    }
}

/// Prints received messages. Table output is collected and rendered once at
/// the end; the other formats stream one line per message.
pub struct MessagePrinter {
    format: OutputFormat,
    rows: Vec<MessageOutput>,
}

impl MessagePrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            rows: Vec::new(),
        }
    }

    pub fn print(&mut self, message: &ChunkMessage) {
        let out = MessageOutput::new(message);
        match self.format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            ),
            OutputFormat::Table => self.rows.push(out),
            OutputFormat::Pretty => println!(
                "csid={} ({}) ts={} msid={} type={} ({}) size={} payload={}",
                out.chunk_stream_id,
                out.chunk_stream_name,
                out.timestamp,
                out.message_stream_id,
                out.type_id,
                out.type_name,
                out.size,
                out.payload
            ),
            OutputFormat::Raw => {
                if let Message::Opaque { payload, .. } = &message.fragment.message {
                    print_raw(payload);
                }
            }
        }
    }

    pub fn finish(self) {
        if self.format != OutputFormat::Table || self.rows.is_empty() {
            return;
        }
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                "CSID", "TIMESTAMP", "MSID", "TYPE", "SIZE", "PAYLOAD",
            ]);
        for row in self.rows {
            table.add_row(vec![
                format!("{} ({})", row.chunk_stream_id, row.chunk_stream_name),
                row.timestamp.to_string(),
                row.message_stream_id.to_string(),
                format!("{} ({})", row.type_id, row.type_name),
                row.size.to_string(),
                row.payload,
            ]);
        }
        println!("{table}");
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Prints a serializable value in the requested format. Table and pretty
/// output list the top-level fields.
pub fn print_record<T: Serialize>(title: &str, value: &T, format: OutputFormat) {
    let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    match format {
        OutputFormat::Json => println!("{json}"),
        OutputFormat::Raw => println!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in fields(&json) {
                table.add_row(vec![key, value]);
            }
            println!("{title}\n{table}");
        }
        OutputFormat::Pretty => {
            println!("{title}\n");
            for (key, value) in fields(&json) {
                println!("  {key:<32} {value}");
            }
        }
    }
}

fn fields(json: &serde_json::Value) -> Vec<(String, String)> {
    match json.as_object() {
        Some(object) => object
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
        None => Vec::new(),
    }
}

fn describe(message: &Message) -> String {
    match message {
        Message::SetChunkSize { chunk_size } => format!("chunk_size={chunk_size}"),
        Message::Abort { chunk_stream_id } => format!("chunk_stream_id={chunk_stream_id}"),
        Message::Ack { sequence_number } => format!("sequence_number={sequence_number}"),
        Message::UserControl { event_type, data } => {
            format!("event_type={event_type} data=<{} bytes>", data.len())
        }
        Message::WinAckSize { size } => format!("size={size}"),
        Message::SetPeerBandwidth { size, limit } => format!("size={size} limit={limit:?}"),
        Message::Opaque { payload, .. } => payload_preview(payload),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use chunkprims_stream::StreamFragment;

    use super::*;

    fn received(message: Message) -> ChunkMessage {
        ChunkMessage {
            chunk_stream_id: 4,
            timestamp: 40,
            fragment: StreamFragment {
                stream_id: 1,
                message,
            },
        }
    }

    #[test]
    fn output_names_stream_and_type() {
        let out = MessageOutput::new(&received(Message::opaque(8, b"hi".to_vec()).unwrap()));
        assert_eq!(out.chunk_stream_name, "AUDIO");
        assert_eq!(out.type_name, "Audio");
        assert_eq!(out.size, 2);
        assert_eq!(out.payload, "hi");

        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"timestamp\":40"));
    }

    #[test]
    fn control_messages_are_described() {
        let out = MessageOutput::new(&received(Message::Ack {
            sequence_number: 99,
        }));
        assert_eq!(out.payload, "sequence_number=99");
        assert_eq!(out.size, 4);
    }

    #[test]
    fn binary_payload_preview() {
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn record_fields_flatten_strings() {
        let json = serde_json::json!({ "name": "x", "size": 3 });
        let mut rows = fields(&json);
        rows.sort();
        assert_eq!(
            rows,
            vec![
                ("name".to_string(), "x".to_string()),
                ("size".to_string(), "3".to_string()),
            ]
        );
    }
}

use std::fs::{self, File};
use std::io;

use chunkprims_message::Message;
use chunkprims_stream::{ChunkStreamer, StreamFragment};
use serde::Serialize;
use tracing::info;

use crate::cmd::{config, FrameArgs};
use crate::exit::{
    chunk_error, io_error, CliError, CliResult, DATA_INVALID, FAILURE, SUCCESS, USAGE,
};
use crate::output::{print_record, OutputFormat};

#[derive(Debug, Serialize)]
struct FrameSummary {
    out: String,
    chunk_stream_id: u32,
    type_id: u8,
    stream_id: u32,
    messages: u32,
    payload_size: usize,
    chunk_size: u32,
    bytes_written: u64,
}

pub fn run(args: FrameArgs, format: OutputFormat) -> CliResult<i32> {
    let config = config::load(args.config.as_deref())?;
    let payload = resolve_payload(&args)?;
    let message = Message::decode(args.type_id, payload.into())
        .map_err(|err| CliError::new(DATA_INVALID, format!("payload rejected: {err}")))?;
    let fragment = StreamFragment {
        stream_id: args.stream_id,
        message,
    };

    let file = File::create(&args.out)
        .map_err(|err| io_error(&format!("failed creating {}", args.out.display()), err))?;
    let streamer = ChunkStreamer::new(io::empty(), file, config)
        .map_err(|err| chunk_error("failed starting streamer", err))?;
    streamer
        .self_state()
        .set_chunk_size(args.chunk_size)
        .map_err(|err| chunk_error("invalid --chunk-size", err))?;

    for i in 0..args.count {
        let timestamp = args.timestamp.wrapping_add(i.wrapping_mul(args.interval));
        streamer
            .write(args.chunk_stream_id, timestamp, &fragment)
            .map_err(|err| chunk_error("write failed", err))?;
    }
    streamer.flush().map_err(|err| match streamer.err() {
        Some(cause) => CliError::new(FAILURE, format!("write failed: {cause}")),
        None => chunk_error("flush failed", err),
    })?;
    streamer.close();
    streamer.done().wait();
    if let Some(err) = streamer.err() {
        return Err(CliError::new(FAILURE, format!("write failed: {err}")));
    }

    let bytes_written = fs::metadata(&args.out)
        .map_err(|err| io_error(&format!("failed reading {}", args.out.display()), err))?
        .len();
    info!(
        messages = args.count,
        bytes_written,
        out = %args.out.display(),
        "chunk stream written"
    );

    let summary = FrameSummary {
        out: args.out.display().to_string(),
        chunk_stream_id: args.chunk_stream_id,
        type_id: args.type_id,
        stream_id: args.stream_id,
        messages: args.count,
        payload_size: fragment.message.encoded_len(),
        chunk_size: args.chunk_size,
        bytes_written,
    };
    print_record("chunkprims frame", &summary, format);

    Ok(SUCCESS)
}

fn resolve_payload(args: &FrameArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Err(CliError::new(USAGE, "one of --json, --data or --file is required"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> FrameArgs {
        FrameArgs {
            out: PathBuf::from("/tmp/unused.chunks"),
            json: None,
            data: None,
            file: None,
            chunk_stream_id: 3,
            type_id: 18,
            stream_id: 1,
            timestamp: 0,
            interval: 0,
            count: 1,
            chunk_size: 128,
            config: None,
        }
    }

    #[test]
    fn payload_from_data() {
        let args = FrameArgs {
            data: Some("hello".to_string()),
            ..args()
        };
        assert_eq!(resolve_payload(&args).unwrap(), b"hello");
    }

    #[test]
    fn payload_json_must_parse() {
        let args = FrameArgs {
            json: Some("{\"x\":".to_string()),
            ..args()
        };
        let err = resolve_payload(&args).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn payload_is_required() {
        let err = resolve_payload(&args()).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}

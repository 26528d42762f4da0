use std::fs::File;
use std::io::{self, BufReader};

use chunkprims_message::Message;
use chunkprims_stream::{ChunkError, ChunkMessage, ChunkStreamer};
use tracing::{debug, warn};

use crate::cmd::{config, DumpArgs};
use crate::exit::{chunk_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{MessagePrinter, OutputFormat};

pub fn run(args: DumpArgs, format: OutputFormat) -> CliResult<i32> {
    let config = config::load(args.config.as_deref())?;
    let file = File::open(&args.path)
        .map_err(|err| io_error(&format!("failed opening {}", args.path.display()), err))?;
    let file_len = file
        .metadata()
        .map_err(|err| io_error(&format!("failed reading {}", args.path.display()), err))?
        .len();

    let streamer = ChunkStreamer::new(BufReader::new(file), io::sink(), config)
        .map_err(|err| chunk_error("failed starting streamer", err))?;
    streamer
        .peer_state()
        .set_chunk_size(args.chunk_size)
        .map_err(|err| chunk_error("invalid --chunk-size", err))?;
    // A recording has nobody to acknowledge.
    streamer.set_control_stream_writer(|_, _, _| Ok(()));

    let mut printer = MessagePrinter::new(format);
    let mut printed = 0usize;
    let result = loop {
        if args.count.is_some_and(|limit| printed >= limit) {
            break Ok(());
        }
        match streamer.read() {
            Ok(message) => {
                apply_control(&streamer, &message)?;
                printer.print(&message);
                printed += 1;
            }
            Err(ChunkError::ConnectionClosed) if streamer.total_read_bytes() == file_len => {
                break Ok(());
            }
            Err(ChunkError::ConnectionClosed) => {
                break Err(CliError::new(
                    DATA_INVALID,
                    format!(
                        "truncated chunk at byte {} of {}",
                        streamer.total_read_bytes(),
                        file_len
                    ),
                ));
            }
            Err(err) => break Err(chunk_error("dump failed", err)),
        }
    };
    printer.finish();
    streamer.close();

    debug!(messages = printed, "dump finished");
    result.map(|()| SUCCESS)
}

/// Follow the control messages that change how the rest of the recording
/// is chunked.
fn apply_control<R>(streamer: &ChunkStreamer<R>, message: &ChunkMessage) -> CliResult<()>
where
    R: io::Read,
{
    let peer = streamer.peer_state();
    let applied = match &message.fragment.message {
        Message::SetChunkSize { chunk_size } => peer.set_chunk_size(*chunk_size),
        Message::WinAckSize { size } => peer.set_ack_window_size(*size),
        Message::SetPeerBandwidth { size, limit } => peer.set_bandwidth(*size, *limit),
        Message::Abort { chunk_stream_id } => {
            let dropped = streamer.abort(*chunk_stream_id);
            if dropped > 0 {
                warn!(chunk_stream_id, dropped, "partial message aborted by peer");
            }
            Ok(())
        }
        _ => Ok(()),
    };
    applied.map_err(|err| chunk_error("control message rejected", err))
}

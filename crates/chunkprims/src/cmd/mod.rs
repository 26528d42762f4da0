use clap::{Args, Subcommand};
use std::path::PathBuf;

use chunkprims_stream::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_STREAM_ID, MIN_CHUNK_STREAM_ID};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod config;
pub mod dump;
pub mod frame;
pub mod version;

const CHUNK_STREAM_ID_RANGE: std::ops::RangeInclusive<i64> =
    MIN_CHUNK_STREAM_ID as i64..=MAX_CHUNK_STREAM_ID as i64;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Frame a payload into a chunk stream file.
    Frame(FrameArgs),
    /// Demultiplex a recorded chunk stream and print its messages.
    Dump(DumpArgs),
    /// Print the effective stream configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Frame(args) => frame::run(args, format),
        Command::Dump(args) => dump::run(args, format),
        Command::Config(args) => config::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct FrameArgs {
    /// File to write the chunk stream to.
    pub out: PathBuf,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Chunk stream to send on.
    #[arg(
        long,
        short = 'c',
        default_value = "3",
        value_parser = clap::value_parser!(u32).range(CHUNK_STREAM_ID_RANGE)
    )]
    pub chunk_stream_id: u32,
    /// Message type id (8 audio, 9 video, 18 data, 20 command, ...).
    #[arg(long, short = 't', default_value = "18")]
    pub type_id: u8,
    /// Message stream id.
    #[arg(long, default_value = "1")]
    pub stream_id: u32,
    /// Timestamp of the first message in milliseconds.
    #[arg(long, default_value = "0")]
    pub timestamp: u32,
    /// Timestamp increment between repeated messages.
    #[arg(long, default_value = "0")]
    pub interval: u32,
    /// Number of times to write the message.
    #[arg(long, default_value = "1")]
    pub count: u32,
    /// Outgoing chunk size.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u32,
    /// Stream configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Chunk stream file to read.
    pub path: PathBuf,
    /// Incoming chunk size the stream starts with.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u32,
    /// Stop after N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Stream configuration file (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Stream configuration file (JSON). Missing fields take defaults.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "chunkprims", version, about = "Chunk stream framing CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "CHUNKPRIMS_LOG_LEVEL",
        default_value = "warn",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_subcommand() {
        let cli = Cli::try_parse_from([
            "chunkprims",
            "frame",
            "/tmp/out.chunks",
            "--chunk-stream-id",
            "6",
            "--type-id",
            "9",
            "--data",
            "hello",
            "--count",
            "3",
        ])
        .expect("frame args should parse");

        let Command::Frame(args) = cli.command else {
            panic!("expected frame command");
        };
        assert_eq!(args.chunk_stream_id, 6);
        assert_eq!(args.type_id, 9);
        assert_eq!(args.count, 3);
        assert_eq!(args.chunk_size, 128);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "chunkprims",
            "frame",
            "/tmp/out.chunks",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_unencodable_chunk_stream_id() {
        for id in ["1", "65600"] {
            let err = Cli::try_parse_from([
                "chunkprims",
                "frame",
                "/tmp/out.chunks",
                "--chunk-stream-id",
                id,
                "--data",
                "x",
            ])
            .expect_err("out of range chunk stream id should fail");
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn parses_dump_with_global_format() {
        let cli = Cli::try_parse_from([
            "chunkprims",
            "dump",
            "/tmp/in.chunks",
            "--count",
            "2",
            "--format",
            "pretty",
        ])
        .expect("dump args should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Pretty)));
        assert!(matches!(cli.command, Command::Dump(_)));
    }
}

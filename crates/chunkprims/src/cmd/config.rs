use std::fs;
use std::path::Path;

use chunkprims_stream::StreamControlStateConfig;
use tracing::debug;

use crate::cmd::ConfigArgs;
use crate::exit::{chunk_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_record, OutputFormat};

pub fn run(args: ConfigArgs, format: OutputFormat) -> CliResult<i32> {
    let config = load(args.config.as_deref())?;
    print_record("chunkprims stream configuration", &config, format);
    Ok(SUCCESS)
}

/// Load and validate a stream configuration, or the defaults without a path.
pub fn load(path: Option<&Path>) -> CliResult<StreamControlStateConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            debug!(path = %path.display(), "loaded stream configuration");
            parse(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid configuration {}: {err}", path.display()),
                )
            })?
        }
        None => StreamControlStateConfig::default(),
    };

    config
        .validate()
        .map_err(|err| chunk_error("invalid configuration", err))?;
    Ok(config)
}

fn parse(text: &str) -> serde_json::Result<StreamControlStateConfig> {
    serde_json::from_str(text)
}

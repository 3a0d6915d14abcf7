use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use detok::{logging::init_logging, DecodeMode, EngineConfig, RequestProcessor};
use detok_protocol::{from_json_validated, iter_json_validated, GenerateRequest, GenerateResponse};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "detok")]
#[command(about = "Incremental detokenization for streaming LLM generation")]
#[command(version)]
struct Cli {
    /// Engine config file (YAML or JSON)
    #[arg(short, long, global = true, env = "DETOK_CONFIG")]
    config: Option<PathBuf>,

    /// Model directory; overrides `model_dir` from the config file
    #[arg(long, global = true, env = "DETOK_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    #[arg(long, global = true, value_enum, env = "DETOK_DECODE_MODE")]
    decode_mode: Option<DecodeMode>,

    /// Log filter used when RUST_LOG is unset (e.g. `debug`, `detok=trace`)
    #[arg(long, global = true, env = "DETOK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "DETOK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tokenize requests and merge EOS ids; prints one JSON request per line
    Encode {
        /// Keep at most `max_seq_len - 1` prompt ids when the prompt is longer
        #[arg(long)]
        max_seq_len: Option<usize>,

        /// Requests as JSON or JSON lines, `-` for stdin
        input: PathBuf,
    },
    /// Detokenize engine responses (JSON lines); prints one JSON response per line
    Stream {
        /// Responses as JSON lines, `-` for stdin
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    let processor = RequestProcessor::new(&config)?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Encode { max_seq_len, input } => {
            let mut content = String::new();
            open_input(&input)?.read_to_string(&mut content)?;

            for request in iter_json_validated::<GenerateRequest>(&content) {
                let request = processor.process_request(request?, max_seq_len)?;
                writeln!(out, "{}", serde_json::to_string(&request)?)?;
            }
        }
        Command::Stream { input } => {
            for line in open_input(&input)?.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }

                let response: GenerateResponse = from_json_validated(&line)?;
                let response = processor.process_response(response)?;
                writeln!(out, "{}", serde_json::to_string(&response)?)?;

                let evicted = processor.evict_idle();
                if !evicted.is_empty() {
                    debug!(request_ids = ?evicted, "Swept idle request state");
                }
            }

            let stats = processor.stats();
            info!(
                created = stats.created,
                finalized = stats.finalized,
                expired = stats.expired,
                active = stats.active,
                "Stream finished"
            );
        }
    }

    out.flush()?;
    Ok(())
}

/// Config file (if any) with command-line overrides applied
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(model_dir) = &cli.model_dir {
        config.model_dir = model_dir.clone();
    }
    if let Some(decode_mode) = cli.decode_mode {
        config.decode_mode = decode_mode;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.log_json {
        config.logging.json = true;
    }

    config.validate()?;
    Ok(config)
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open '{}'", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

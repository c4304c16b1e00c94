use hivefuzz_core::config::HivefuzzConfig;
use hivefuzz_core::session::Session;
use hivefuzz_core::supervisor;
use hivefuzz_core::worker::FuzzLoop;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Override `[io] corpus-dir` from the config.
    #[clap(long)]
    corpus_dir: Option<PathBuf>,
    /// Override `[fuzzer] threads` from the config.
    #[clap(short, long)]
    threads: Option<usize>,
    /// Override `[fuzzer] run-time-secs` (0 runs until terminated).
    #[clap(long)]
    run_time_secs: Option<u64>,
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Disable the in-place status line.
    #[clap(long)]
    no_screen: bool,
}

fn my_harness(data: &[u8]) {
    if data.len() > 2 && data[0] == b'B' && data[1] == b'A' && data[2] == b'D' {
        panic!("BAD input detected by harness!");
    }
    if data.len() > 3 && data[0] == b'C' && data[1] == b'R' && data[2] == b'A' && data[3] == b'S' {
        panic!("CRASH input detected by harness!");
    }
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match cli.config_file {
        Some(config_path) => {
            log::info!("Loading configuration from specified path: {config_path:?}");
            HivefuzzConfig::load_from_file(&config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                log::info!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                HivefuzzConfig::load_from_file(&default_config_path)?
            } else {
                log::info!(
                    "No config file specified and default 'config.toml' not found, using built-in defaults."
                );
                HivefuzzConfig::default()
            }
        }
    };

    if let Some(corpus_dir) = cli.corpus_dir {
        config.io.corpus_dir = corpus_dir;
    }
    if let Some(threads) = cli.threads {
        config.fuzzer.get_or_insert_with(Default::default).threads = threads;
    }
    if let Some(run_time_secs) = cli.run_time_secs {
        config
            .fuzzer
            .get_or_insert_with(Default::default)
            .run_time_secs = run_time_secs;
    }
    if let Some(iterations) = cli.iterations {
        config
            .fuzzer
            .get_or_insert_with(Default::default)
            .max_iterations = iterations;
    }
    if cli.no_screen {
        config
            .display
            .get_or_insert_with(Default::default)
            .use_screen = false;
    }

    log::debug!("Effective configuration: {config:#?}");

    let session = Arc::new(Session::from_config(&config)?);
    let body = Arc::new(FuzzLoop::new(my_harness));

    let reason = supervisor::run(session, body)?;
    log::info!("Exited cleanly: {reason:?}");
    Ok(())
}

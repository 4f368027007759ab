//! quartz: a UCI chess engine driven by neural-network-guided MCTS.
//!
//! With no subcommand the binary speaks UCI on stdin/stdout. Logging
//! goes to stderr (or the file named by the `LogFile` option); stdout
//! carries the protocol only.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use uci::{EngineController, run_stdin_loop};

mod benchmark;
mod config;
mod logging;
mod selfplay;

#[derive(Parser)]
#[command(name = "quartz", version, about = "UCI chess engine (MCTS + NN)")]
struct Cli {
    /// Path to a quartz.toml with option presets.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the UCI loop (the default).
    Uci,
    /// Play the engine against itself.
    Selfplay {
        #[arg(long, default_value_t = 1)]
        games: u32,
        #[arg(long, default_value_t = 400)]
        visits: i64,
        #[arg(long, default_value_t = 1.0)]
        temperature: f32,
        /// Disable root Dirichlet noise.
        #[arg(long)]
        no_noise: bool,
        #[arg(long, default_value = "material")]
        backend: String,
    },
    /// Search a fixed position suite and report nps.
    Benchmark {
        #[arg(long, default_value_t = 5000)]
        visits: i64,
        #[arg(long, default_value_t = 2)]
        threads: usize,
        #[arg(long, default_value = "material")]
        backend: String,
    },
}

fn run_uci(cli: &Cli) -> anyhow::Result<i32> {
    let presets = config::load(cli.config.as_deref())?;

    let out: uci::engine::OutputSink = Arc::new(|line: String| {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{line}");
        let _ = lock.flush();
    });

    let mut controller = EngineController::new(out);
    controller.set_log_file_hook(Box::new(|path| logging::set_log_file(path)));
    for (name, value) in &presets.options {
        if let Err(e) = controller.options_mut().set(name, value) {
            // Config mistakes are fatal; a GUI typo via setoption is not.
            anyhow::bail!("config option error: {e}");
        }
        if name.eq_ignore_ascii_case("LogFile") {
            logging::set_log_file(value);
        }
    }

    Ok(run_stdin_loop(&mut controller))
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let code = match &cli.command {
        None | Some(Command::Uci) => match run_uci(&cli) {
            Ok(code) => code,
            Err(e) => {
                error!(error = %e, "fatal");
                eprintln!("error: {e}");
                1
            }
        },
        Some(Command::Selfplay {
            games,
            visits,
            temperature,
            no_noise,
            backend,
        }) => {
            let config = selfplay::SelfplayConfig {
                games: *games,
                visits: *visits,
                temperature: *temperature,
                noise: !no_noise,
                backend: backend.clone(),
                ..selfplay::SelfplayConfig::default()
            };
            match selfplay::run(&config) {
                Ok(tally) => {
                    println!(
                        "selfplay: +{} -{} ={}",
                        tally.white_wins, tally.black_wins, tally.draws
                    );
                    0
                }
                Err(e) => {
                    error!(error = %e, "selfplay failed");
                    eprintln!("error: {e}");
                    1
                }
            }
        }
        Some(Command::Benchmark {
            visits,
            threads,
            backend,
        }) => {
            let config = benchmark::BenchmarkConfig {
                visits: *visits,
                threads: *threads,
                backend: backend.clone(),
            };
            match benchmark::run(&config) {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "benchmark failed");
                    eprintln!("error: {e}");
                    1
                }
            }
        }
    };
    std::process::exit(code);
}

use std::error::Error;
use std::io::BufRead;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ocellus::core::logging::{error, info, init_logger};
use ocellus::runtime::engine::{Engine, EngineConfig};
use ocellus::supervisor::{self, EngineProcess};

#[derive(Parser)]
#[command(name = "ocellus", about = "Scripted visual engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch and supervise an engine process.
    Run {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Engine port; 0 allocates a free one.
        #[arg(long, default_value_t = 0)]
        port: u16,

        #[arg(long, default_value = "modes")]
        modes_dir: String,
    },
    /// Serve the engine in the foreground.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 0)]
        port: u16,

        #[arg(long, default_value = "modes")]
        modes_dir: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logger();

    match Cli::parse().command {
        Commands::Serve {
            host,
            port,
            modes_dir,
        } => {
            let mut config = EngineConfig::new(modes_dir);
            config.host = host;
            config.port = port;
            let handle = Engine::start(config)?;
            info!("serving on port {}", handle.port());
            handle.wait();
            Ok(())
        }
        Commands::Run {
            host,
            port,
            modes_dir,
        } => run_supervised(&host, port, &modes_dir),
    }
}

fn run_supervised(
    host: &str,
    port: u16,
    modes_dir: &str,
) -> Result<(), Box<dyn Error>> {
    let port = if port == 0 {
        supervisor::allocate_port(host)?
    } else {
        port
    };

    let mut engine = EngineProcess::launch(host, port, modes_dir)?;
    engine.wait_ready()?;
    info!("engine ready on {host}:{port}; type quit (or press Enter) to stop");

    // An operator line on stdin requests a graceful stop. A closed stdin
    // is not a stop request; the supervisor keeps watching the child.
    let (quit_tx, quit_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() || line == "quit" || line == "q" {
                        let _ = quit_tx.send(());
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });

    // Watch the child; an unexpected exit is fatal.
    let mut stdin_open = true;
    loop {
        if stdin_open {
            match quit_rx.recv_timeout(Duration::from_millis(500)) {
                Ok(()) => {
                    info!("stopping engine");
                    engine.shutdown()?;
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => stdin_open = false,
            }
        } else {
            thread::sleep(Duration::from_millis(500));
        }

        if let Err(e) = engine.check_alive() {
            error!("{e}");
            return Err(e.into());
        }
    }
}

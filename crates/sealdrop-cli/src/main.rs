//! sealdrop CLI
//!
//! Send files to a waiting peer over an encrypted, passphrase-keyed channel.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use sealdrop_core::{SessionReport, run_client, run_server};
use sealdrop_files::{StagedFileSink, open_files};
use sealdrop_transport::{NetworkGuard, setup_server};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// Environment variable consulted before prompting for the passphrase.
const PASSPHRASE_ENV: &str = "SEALDROP_PASSPHRASE";

/// sealdrop - Secure chunked file transfer
#[derive(Parser)]
#[command(name = "sealdrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path [default: <config dir>/sealdrop/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for one sender and receive its files
    Serve {
        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,

        /// Replace files that already exist in the output directory
        #[arg(long)]
        overwrite: bool,

        /// Per-operation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Send files to a waiting server
    Send {
        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Server address (host:port)
        #[arg(short, long)]
        to: Option<String>,

        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Extra connection attempts if the server is not reachable yet
        #[arg(long)]
        retries: Option<u32>,

        /// Per-operation timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config
                .clone()
                .unwrap_or_else(Config::default_path)
                .display()
        )
    })?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match cli.command {
        Commands::Serve {
            output,
            bind,
            overwrite,
            timeout,
        } => {
            if let Some(output) = output {
                config.transfer.output_dir = output;
            }
            if let Some(bind) = bind {
                config.network.listen_addr = bind;
            }
            if overwrite {
                config.transfer.overwrite = true;
            }
            if let Some(timeout) = timeout {
                config.network.timeout_secs = timeout;
            }
            config.validate()?;
            serve(&config)
        }
        Commands::Send {
            files,
            to,
            chunk_size,
            retries,
            timeout,
        } => {
            if let Some(to) = to {
                config.network.server_addr = to;
            }
            if let Some(chunk_size) = chunk_size {
                config.transfer.chunk_size = chunk_size;
            }
            if let Some(retries) = retries {
                config.network.connect_retries = retries;
            }
            if let Some(timeout) = timeout {
                config.network.timeout_secs = timeout;
            }
            config.validate()?;
            send(&files, &config)
        }
        Commands::Config { save } => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
            if save {
                let path = cli.config.unwrap_or_else(Config::default_path);
                config.save(&path)?;
                println!("\nSaved to {}", path.display());
            }
            Ok(())
        }
    }
}

/// Read the passphrase from the environment or the terminal.
fn read_passphrase() -> anyhow::Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
        info!("using passphrase from {PASSPHRASE_ENV}");
        return Ok(Zeroizing::new(value));
    }

    let passphrase = Zeroizing::new(rpassword::prompt_password("Passphrase: ")?);
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase must not be empty");
    }

    Ok(passphrase)
}

/// Report a failed session, singling out integrity and authentication failures.
fn report_failure(err: &sealdrop_core::Error) {
    if err.is_security() {
        error!(phase = %err.phase, security = true, "{}", err.kind);
        eprintln!(
            "{} {}: {} (the peer may be using a different passphrase, or the data was tampered with)",
            style("security error").red().bold(),
            err,
            err.kind
        );
    } else {
        error!(phase = %err.phase, "{}", err.kind);
    }
}

fn print_summary(report: &SessionReport) {
    println!();
    if let Some(peer) = report.peer {
        println!("Peer:        {peer}");
    }
    println!("Key:         {}", hex::encode(report.key_fingerprint));
    println!("Files:       {}", report.files.len());
    println!("Total:       {}", format_bytes(report.total_bytes()));
    println!("Elapsed:     {}", format_duration(report.elapsed));
    println!(
        "Wire:        {} sent, {} received",
        format_bytes(report.stats.bytes_sent),
        format_bytes(report.stats.bytes_received)
    );
}

/// Receive one session into the output directory
fn serve(config: &Config) -> anyhow::Result<()> {
    let _network = NetworkGuard::acquire();

    let passphrase = read_passphrase()?;
    let session = config.session_config(passphrase.as_bytes());
    drop(passphrase);

    let mut sink = StagedFileSink::new(&config.transfer.output_dir, config.transfer.overwrite)?;
    let listener = setup_server(&config.network.listen_addr)?;

    println!("Output directory: {}", config.transfer.output_dir.display());
    println!("Listening on:     {}", listener.local_addr());
    println!(
        "Waiting up to {} for a sender...",
        format_duration(config.timeout())
    );

    let mut progress = TransferProgress::new();
    match run_server(&listener, &session, &mut sink, &mut progress) {
        Ok(report) => {
            for path in sink.committed() {
                info!(path = %path.display(), "received");
            }
            print_summary(&report);
            Ok(())
        }
        Err(err) => {
            report_failure(&err);
            Err(err.into())
        }
    }
}

/// Send files, retrying session setup while the server is unreachable
fn send(paths: &[PathBuf], config: &Config) -> anyhow::Result<()> {
    let _network = NetworkGuard::acquire();

    // fail on unreadable files before asking for anything
    open_files(paths)?;

    let passphrase = read_passphrase()?;
    let session = config.session_config(passphrase.as_bytes());
    drop(passphrase);

    println!("Sending {} file(s) to {}", paths.len(), config.network.server_addr);

    let mut progress = TransferProgress::new();
    let mut attempt = 0;
    loop {
        let files = open_files(paths)?;
        match run_client(&config.network.server_addr, &session, files, &mut progress) {
            Ok(report) => {
                print_summary(&report);
                return Ok(());
            }
            Err(err) if err.is_retryable_setup() && attempt < config.network.connect_retries => {
                attempt += 1;
                let delay = Duration::from_millis(500 << attempt.min(5));
                warn!(
                    attempt,
                    retries = config.network.connect_retries,
                    "{}; retrying in {}",
                    err.kind,
                    format_duration(delay)
                );
                thread::sleep(delay);
            }
            Err(err) => {
                report_failure(&err);
                return Err(err.into());
            }
        }
    }
}

//! xlat64 - stateless IPv4/IPv6 packet translator

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use xlat64::config::{self, IoMode, RuntimeConfig};
use xlat64::supervisor::{IoPlan, Supervisor};
use xlat64::{io, signal, telemetry, Error, Result};

#[derive(Parser)]
#[command(name = "xlat64", version, about = "Stateless IPv4/IPv6 packet translator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the translator
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Inherited packet descriptors, one READ,WRITE pair per worker
        /// ("R,W;R,W;...")
        #[arg(long, value_name = "PAIRS")]
        io_fds: Option<String>,
        /// Inherited tunnel descriptors: one per worker with multi-queue,
        /// a single shared one otherwise ("FD" or "FD;FD;...")
        #[arg(long, value_name = "FDS")]
        tun_fds: Option<String>,
        /// Inherited resolver descriptors, one READ,WRITE pair per worker
        #[arg(long, value_name = "PAIRS")]
        resolver_fds: Option<String>,
    },
    /// Configuration tooling
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Validate a configuration file and report every problem found
    Validate {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the effective configuration, built-in limits included
    Print {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            // Logging may not be up yet (e.g. the config failed to load).
            error!(%err, "fatal error");
            eprintln!("xlat64: {err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Run {
            config,
            io_fds,
            tun_fds,
            resolver_fds,
        } => run(
            &config,
            io_fds.as_deref(),
            tun_fds.as_deref(),
            resolver_fds.as_deref(),
        ),
        Command::Config {
            command: ConfigCommand::Validate { config },
        } => {
            let raw = config::load(&config)?;
            let validation = config::validate(&raw);
            validation.print_diagnostics();
            if validation.has_errors() {
                Ok(ExitCode::FAILURE)
            } else {
                println!("configuration OK");
                Ok(ExitCode::SUCCESS)
            }
        }
        Command::Config {
            command: ConfigCommand::Print { config },
        } => {
            let raw = config::load(&config)?;
            let validation = config::validate(&raw);
            validation.print_diagnostics();
            if validation.has_errors() {
                return Ok(ExitCode::FAILURE);
            }
            config::print_effective(&config::resolve(&raw)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(
    config_path: &PathBuf,
    io_fds: Option<&str>,
    tun_fds: Option<&str>,
    resolver_fds: Option<&str>,
) -> Result<ExitCode> {
    let raw = config::load(config_path)?;
    telemetry::init_logging(Some(&raw.log));

    let validation = config::validate(&raw);
    for warning in &validation.warnings {
        tracing::warn!("{warning}");
    }
    if validation.has_errors() {
        for problem in &validation.errors {
            tracing::error!("{problem}");
        }
        return Err(Error::Config("configuration is invalid".into()));
    }

    let runtime = Arc::new(config::resolve(&raw)?);
    signal::install_handlers().map_err(Error::Io)?;

    let plan = build_io_plan(&runtime, io_fds, tun_fds)?;
    let resolver_pairs = match resolver_fds {
        Some(spec) => io::parse_fd_pairs(spec)?,
        None => Vec::new(),
    };

    Supervisor::new(runtime, plan, resolver_pairs)?.run()?;
    Ok(ExitCode::SUCCESS)
}

fn build_io_plan(
    cfg: &RuntimeConfig,
    io_fds: Option<&str>,
    tun_fds: Option<&str>,
) -> Result<IoPlan> {
    match cfg.io_mode {
        IoMode::InheritedFds => {
            let spec = io_fds
                .ok_or_else(|| Error::Config("--io-fds is required in inherited-fds mode".into()))?;
            Ok(IoPlan::Pairs(io::parse_fd_pairs(spec)?))
        }
        IoMode::Tun => {
            let spec = tun_fds
                .ok_or_else(|| Error::Config("--tun-fds is required in tun mode".into()))?;
            let fds = io::parse_fd_list(spec)?;
            if cfg.tun_multi_queue {
                Ok(IoPlan::PerWorker(fds))
            } else if let [fd] = fds[..] {
                Ok(IoPlan::Shared(fd))
            } else {
                Err(Error::Config(
                    "single-queue tun mode takes exactly one descriptor".into(),
                ))
            }
        }
    }
}

//! mtp command-line client
//!
//! Browse, read and write files on MTP devices (phones, cameras, players)
//! over USB.

mod config;
mod device;
mod progress;
mod queue;
mod shell;
mod tokenizer;

use clap::{Parser, Subcommand};
use mtp_core::{AbortHandle, Resolver};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;
use shell::{CommandKind, Shell};

/// mtp - Media Transfer Protocol client
#[derive(Parser)]
#[command(name = "mtp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (default: ~/.config/mtp/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached MTP devices
    Devices,

    /// Write a default configuration file
    InitConfig,

    /// Show device information
    Info,

    /// Show storages and free space
    Storages,

    /// List a directory
    Ls {
        /// Device path
        path: Option<String>,
    },

    /// Download a file
    Get {
        /// Device path
        path: String,
        /// Local file or directory
        local: Option<String>,
    },

    /// Upload a file
    Put {
        /// Local file
        file: String,
        /// Device directory
        dir: Option<String>,
    },

    /// Delete a file or directory
    Rm {
        /// Device path
        path: String,
    },

    /// Create a directory
    Mkdir {
        /// Device path
        path: String,
    },

    /// Show object properties
    Props {
        /// Device path
        path: String,
    },

    /// Show device properties
    DeviceProps,

    /// Upload a file or directory tree
    Upload {
        /// Local file or directory
        local: String,
        /// Device directory
        dir: Option<String>,
    },

    /// Download a file or directory tree
    Download {
        /// Device path
        path: String,
        /// Local directory
        local_dir: Option<String>,
    },

    /// Interactive shell
    Shell,
}

impl Commands {
    /// Shell command equivalent, `None` for the interactive shell
    fn into_shell_command(self) -> Option<(CommandKind, Vec<String>)> {
        let (kind, args) = match self {
            Self::Info => (CommandKind::Info, vec![]),
            Self::Storages => (CommandKind::Storages, vec![]),
            Self::Ls { path } => (CommandKind::Ls, path.into_iter().collect()),
            Self::Get { path, local } => (CommandKind::Get, with_optional(path, local)),
            Self::Put { file, dir } => (CommandKind::Put, with_optional(file, dir)),
            Self::Rm { path } => (CommandKind::Rm, vec![path]),
            Self::Mkdir { path } => (CommandKind::Mkdir, vec![path]),
            Self::Props { path } => (CommandKind::Props, vec![path]),
            Self::DeviceProps => (CommandKind::DeviceProps, vec![]),
            Self::Upload { local, dir } => (CommandKind::Upload, with_optional(local, dir)),
            Self::Download { path, local_dir } => {
                (CommandKind::Download, with_optional(path, local_dir))
            }
            Self::Shell | Self::Devices | Self::InitConfig => return None,
        };
        Some((kind, args))
    }
}

fn with_optional(first: String, second: Option<String>) -> Vec<String> {
    std::iter::once(first).chain(second).collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Devices => tokio::task::spawn_blocking(device::list).await?,
        Commands::InitConfig => init_config(cli.config),
        command => run_session(command, config).await,
    }
}

/// Write the default configuration to `path` or the default location
fn init_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Config::default_path);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Connect, run one command or the shell, and close the session
async fn run_session(command: Commands, config: Config) -> anyhow::Result<()> {
    let session = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || device::connect(&config)).await??
    };

    let watcher = tokio::spawn(abort_on_ctrl_c(
        session.abort_handle(),
        session.abort_timeout(),
    ));
    let resolver = Resolver::new(config.root_policy());

    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut shell = Shell::new(session, resolver)?;
        match command.into_shell_command() {
            Some((kind, args)) => {
                shell.execute(kind, &args)?;
            }
            None => {
                println!("Type 'help' for commands, 'quit' to leave");
                shell.run(&mut io::stdin().lock())?;
            }
        }
        shell.into_session().close()?;
        Ok(())
    })
    .await?;

    watcher.abort();
    result
}

/// Turn Ctrl-C into an abort of the transaction in flight
async fn abort_on_ctrl_c(abort: AbortHandle, timeout: Duration) {
    while tokio::signal::ctrl_c().await.is_ok() {
        let handle = abort.clone();
        let outcome =
            tokio::task::spawn_blocking(move || handle.abort_current_transaction(timeout)).await;
        match outcome {
            Ok(Ok(())) => eprintln!("\nInterrupted"),
            Ok(Err(err)) => tracing::warn!("Abort request failed: {err}"),
            Err(err) => tracing::warn!("Abort task failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["mtp", "-v", "get", "DCIM/a.jpg", "/tmp"]).unwrap();
        assert!(cli.verbose);
        let (kind, args) = cli.command.into_shell_command().unwrap();
        assert_eq!(kind, CommandKind::Get);
        assert_eq!(args, vec!["DCIM/a.jpg", "/tmp"]);
    }

    #[test]
    fn test_optional_arguments_dropped() {
        let cli = Cli::try_parse_from(["mtp", "ls"]).unwrap();
        let (kind, args) = cli.command.into_shell_command().unwrap();
        assert_eq!(kind, CommandKind::Ls);
        assert!(args.is_empty());

        let cli = Cli::try_parse_from(["mtp", "device-props"]).unwrap();
        let (kind, _) = cli.command.into_shell_command().unwrap();
        assert_eq!(kind, CommandKind::DeviceProps);
    }

    #[test]
    fn test_local_only_commands() {
        let cli = Cli::try_parse_from(["mtp", "--config", "/tmp/x.toml", "shell"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(cli.command.into_shell_command().is_none());
        let cli = Cli::try_parse_from(["mtp", "devices"]).unwrap();
        assert!(cli.command.into_shell_command().is_none());
    }

    #[test]
    fn test_shell_arg_shapes_match_subcommands() {
        let samples: [&[&str]; 4] = [
            &["mtp", "put", "a.txt"],
            &["mtp", "upload", "dir", "Music"],
            &["mtp", "download", "Music"],
            &["mtp", "rm", "x"],
        ];
        for argv in samples {
            let cli = Cli::try_parse_from(argv).unwrap();
            let (kind, args) = cli.command.into_shell_command().unwrap();
            assert!(kind.spec().shape.accepts(args.len()), "{argv:?}");
        }
    }
}

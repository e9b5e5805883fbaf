use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use kathara_engine::configuration::{resolve_current_user, Settings};
use kathara_engine::container_management::{ExecChunk, ExecOutput, LabManager};
use kathara_engine::error_handling::ManagerError;
use kathara_engine::model::generate_urlsafe_hash;
use log::{error, info, LevelFilter};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kathara-engine")]
#[command(version = "0.0.2")]
#[command(about = "Deploys network emulation labs on a container runtime")]
struct Cli {
    /// Settings file (TOML); defaults are used when omitted
    #[arg(long, env = "KATHARA_SETTINGS")]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct LabSelector {
    /// Hash of the lab, as stored in the `lab_hash` label
    #[arg(long, conflicts_with = "lab_dir")]
    lab_hash: Option<String>,

    /// Lab directory; the hash is derived from its path
    #[arg(long)]
    lab_dir: Option<PathBuf>,
}

impl LabSelector {
    fn resolve(&self) -> Result<String, std::io::Error> {
        if let Some(hash) = &self.lab_hash {
            return Ok(hash.clone());
        }
        let dir = match &self.lab_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let dir = dir.canonicalize()?;
        Ok(generate_urlsafe_hash(&dir.to_string_lossy()))
    }
}

#[derive(Subcommand)]
enum Command {
    /// List deployed devices
    List {
        #[command(flatten)]
        lab: LabSelector,
        /// Show devices of every lab and user
        #[arg(long)]
        all: bool,
    },
    /// Run a command inside a device
    Exec {
        #[command(flatten)]
        lab: LabSelector,
        device: String,
        #[arg(long)]
        tty: bool,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Stream resource usage of deployed devices
    Stats {
        #[command(flatten)]
        lab: LabSelector,
        #[arg(long)]
        device: Option<String>,
    },
    /// Remove the devices of a lab, or only the selected ones
    Undeploy {
        #[command(flatten)]
        lab: LabSelector,
        #[arg(long = "device")]
        devices: Vec<String>,
    },
    /// Remove every device and network of the current user
    Wipe {
        /// Remove resources of all users
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_target(false)
        .init();

    let settings = match &cli.settings {
        Some(path) => Settings::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import settings from file: {}", e);
            std::process::exit(1);
        }),
        None => Settings::default(),
    };

    let user = resolve_current_user().unwrap_or_else(|e| {
        error!("{}", e);
        std::process::exit(1);
    });

    let manager = LabManager::connect_docker(settings, &user).unwrap_or_else(|e| {
        error!("Unable to connect to the container runtime: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = run(cli.command, &manager, &user).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, manager: &LabManager, user: &str) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::List { lab, all } => {
            let devices = if all {
                manager.list_machines(None, None).await?
            } else {
                manager.list_machines(Some(&lab.resolve()?), Some(user)).await?
            };
            for device in devices {
                println!(
                    "{}\t{}\t{}\t{}",
                    device.machine_name(),
                    device.label("lab_hash").unwrap_or("-"),
                    device.status,
                    device.name
                );
            }
        }
        Command::Exec {
            lab,
            device,
            tty,
            command,
        } => {
            let result = manager.exec(&lab.resolve()?, &device, command, tty).await?;
            print_output(result.output).await?;
            if let Some(code) = result.exit_code {
                info!("Exit code: {}", code);
            }
        }
        Command::Stats { lab, device } => {
            let mut stats = manager.get_machines_stats(Some(&lab.resolve()?), device.as_deref(), Some(user));
            while let Some(round) = stats.next().await {
                for device in round?.values() {
                    println!("{}", serde_json::to_string(device)?);
                }
            }
        }
        Command::Undeploy { lab, devices } => {
            let hash = lab.resolve()?;
            let selected: BTreeSet<String> = devices.into_iter().collect();
            let selected = if selected.is_empty() { None } else { Some(&selected) };
            report(manager.undeploy_lab(&hash, selected).await)?;
        }
        Command::Wipe { all } => {
            let scope = if all { None } else { Some(user) };
            report(manager.wipe(scope).await)?;
        }
    }
    Ok(())
}

fn report(result: Result<(), ManagerError>) -> Result<(), ManagerError> {
    if result.is_ok() {
        info!("Done");
    }
    result
}

async fn print_output(output: ExecOutput) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    match output {
        ExecOutput::Combined(data) => stdout.write_all(&data)?,
        ExecOutput::Demuxed { stdout: out, stderr: err } => {
            stdout.write_all(out.as_deref().unwrap_or_default())?;
            stderr.write_all(err.as_deref().unwrap_or_default())?;
        }
        ExecOutput::Stream(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                match chunk? {
                    ExecChunk::Combined(data) => stdout.write_all(&data)?,
                    ExecChunk::Demuxed { stdout: out, stderr: err } => {
                        stdout.write_all(out.as_deref().unwrap_or_default())?;
                        stderr.write_all(err.as_deref().unwrap_or_default())?;
                    }
                }
            }
        }
    }
    stdout.flush()?;
    Ok(())
}

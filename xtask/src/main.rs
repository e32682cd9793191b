use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drobo_core::diagnostics;
use drobo_core::payload::FirmwareImage;
use drobo_core::session::{DebugFlags, DynSession, SessionConfig};
use std::path::PathBuf;
use std::process::Command;
use tracing::info;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Validate a firmware image without touching hardware
    CheckFirmware { path: PathBuf },
    /// Decode a diagnostic dump to text
    DecodeDiag {
        path: PathBuf,
        /// Write the text here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Exercise a session against the simulated unit
    Simulate {
        /// Session config (TOML); the simulation flag is forced on
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.join(" "));
    }
    Ok(())
}

fn simulate(config: Option<PathBuf>) -> Result<()> {
    let mut config = match config {
        Some(path) => SessionConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::for_device("simulated"),
    };
    config.debug |= DebugFlags::SIMULATION;

    let mut session = DynSession::open(config)?;
    if let Some(fw) = session.firmware_info() {
        println!("{}", fw);
    }
    let status = session.status()?;
    if status.is_healthy() {
        println!("status: normal");
    }
    for condition in &status.conditions {
        println!("status: {}", condition);
    }
    let capacity = session.capacity()?;
    println!(
        "capacity: {} used, {} free, {} total",
        capacity.used, capacity.free, capacity.total
    );
    for slot in session.slot_info()? {
        println!("{}", slot);
    }
    for lun in session.luns()? {
        let formats: Vec<String> = lun.formats.iter().map(|f| f.to_string()).collect();
        println!(
            "lun {}: {} bytes, {} [{}] at {}",
            lun.lun_index,
            lun.size_bytes,
            lun.scheme,
            formats.join(", "),
            lun.host_path.as_deref().unwrap_or("-")
        );
    }
    session.close();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Build => {
            info!("Building project...");
            cargo(&["build", "--workspace"])?;
        }
        Commands::Test => {
            info!("Running tests...");
            cargo(&["test", "--workspace"])?;
        }
        Commands::CheckFirmware { path } => {
            let image = FirmwareImage::from_file(&path)
                .with_context(|| format!("{} is not a valid firmware image", path.display()))?;
            println!("{}: OK", path.display());
            println!("  {}", image.header());
            if !image.header().about.is_empty() {
                println!("  {}", image.header().about);
            }
        }
        Commands::DecodeDiag { path, output } => {
            let text = diagnostics::try_decode_file(&path)?;
            match output {
                Some(out) => std::fs::write(&out, text)?,
                None => print!("{}", text),
            }
        }
        Commands::Simulate { config } => simulate(config)?,
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;
use vr_core::{BoardConfig, FirmwareImage};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the test suite
    Test,
    /// Validate the sample board and any images under a directory
    Inspect {
        /// Board description to validate
        #[arg(long, default_value = "config/board.example.toml")]
        board: PathBuf,
        /// Directory of `.txt` firmware images to parse
        #[arg(long)]
        images: Option<PathBuf>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

/// Largest record bound among the board's flashable devices.
fn image_limit(config: &BoardConfig) -> Result<usize> {
    config
        .devices
        .iter()
        .filter_map(|d| d.family.max_image_records())
        .max()
        .context("board has no device that supports firmware update")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Inspect { board, images } => {
            let config = BoardConfig::load_from_file(board)?;
            config
                .validate()
                .with_context(|| format!("validating {}", board.display()))?;
            println!("{}: {} rails OK", board.display(), config.rails.len());

            if let Some(dir) = images {
                let limit = image_limit(&config)
                    .with_context(|| format!("checking images against {}", board.display()))?;
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.extension().is_none_or(|e| e != "txt") {
                        continue;
                    }
                    let bytes = std::fs::read(&path)?;
                    let image = FirmwareImage::parse(&bytes, limit)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    println!("{}: {} records OK", path.display(), image.len());
                }
            }
        }
    }

    Ok(())
}

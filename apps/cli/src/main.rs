use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use vr_core::{BoardConfig, ChipFamily, FirmwareImage};

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline VR image and board tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Firmware image operations
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
    /// Board description operations
    Board {
        #[command(subcommand)]
        action: BoardAction,
    },
}

#[derive(Subcommand, Debug)]
enum ImageAction {
    /// Parse an image and summarize its records
    Inspect {
        path: PathBuf,

        /// Target family, used for the record bound
        #[arg(long, default_value = "mp2891")]
        family: ChipFamily,

        /// Print every record
        #[arg(long)]
        records: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BoardAction {
    /// Load and validate a board description
    Check { path: PathBuf },
    /// Write an example board description
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args.command) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Image {
            action: ImageAction::Inspect {
                path,
                family,
                records,
            },
        } => inspect_image(&path, family, records),
        Command::Board {
            action: BoardAction::Check { path },
        } => check_board(&path),
        Command::Board {
            action: BoardAction::Init { path, force },
        } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            BoardConfig::example().save_to_file(&path)?;
            info!(path = %path.display(), "Example board written");
            Ok(())
        }
    }
}

fn inspect_image(path: &Path, family: ChipFamily, records: bool) -> Result<()> {
    let Some(limit) = family.max_image_records() else {
        bail!("{family} does not support firmware update");
    };
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let image = FirmwareImage::parse(&bytes, limit)
        .with_context(|| format!("parsing {}", path.display()))?;

    println!("{}", summarize(&image, family, limit));
    if records {
        println!();
        for (i, r) in image.records().iter().enumerate() {
            let data: Vec<String> = r.payload().iter().rev().map(|b| format!("{b:02X}")).collect();
            println!(
                "{i:4}  cfg {:04X}  page {}  reg 0x{:02X}  data 0x{}",
                r.config_id,
                r.page,
                r.register,
                data.join("")
            );
        }
    }
    Ok(())
}

fn summarize(image: &FirmwareImage, family: ChipFamily, limit: usize) -> String {
    let mut per_page: BTreeMap<u8, usize> = BTreeMap::new();
    for r in image.records() {
        *per_page.entry(r.page).or_default() += 1;
    }
    let pages: Vec<String> = per_page
        .iter()
        .map(|(page, count)| format!("page {page}: {count}"))
        .collect();

    let mut out = format!(
        "{family} image: {} of {limit} records, {} page selects\n",
        image.len(),
        image.page_changes()
    );
    if let Some(first) = image.records().first() {
        out.push_str(&format!("config id: {:04X}\n", first.config_id));
    }
    out.push_str(&pages.join(", "));
    out
}

fn check_board(path: &Path) -> Result<()> {
    let config = BoardConfig::load_from_file(path)?;
    config.validate()?;

    println!(
        "{} devices, {} rails, {} CPUs (lock timeout {} ms)",
        config.devices.len(),
        config.rails.len(),
        config.cpus.len(),
        config.lock_timeout_ms
    );
    for (i, rail) in config.rails.iter().enumerate() {
        // Validated above, so every rail has a device.
        let Some(dev) = config.device(&rail.device) else {
            continue;
        };
        println!(
            "{i:3}  {:<28} {:<10} bus {} addr 0x{:02X} page {}{}",
            rail.name,
            dev.family,
            dev.bus,
            dev.address,
            rail.page,
            if rail.adjustable { "" } else { "  (fixed)" }
        );
    }
    for cpu in &config.cpus {
        println!("cpu  {:<28} PECI addr 0x{:02X}", cpu.name, cpu.address);
    }
    Ok(())
}

//! Volume attach / image transfer CLI
//!
//! Commands:
//! - resolve: Print the connection properties of a volume
//! - discover: Run iSCSI sendtargets discovery against a portal
//! - image-to-volume: Write a raw image onto a volume
//! - volume-to-image: Save a volume as a raw image

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use volume_xfer::backend::{IscsiDriver, VolumeDriver};
use volume_xfer::connector::SystemConnectorFactory;
use volume_xfer::executor::{Executor, ShellCommand};
use volume_xfer::properties::IscsiPropertyResolver;
use volume_xfer::transfer::{ImageMeta, RawImageService};
use volume_xfer::{Config, ImageTransferOrchestrator, Volume};

#[derive(Parser)]
#[command(name = "volume-xfer")]
#[command(about = "Attach volumes over iSCSI and transfer images", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(long)]
    fake: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the connection properties of a volume
    Resolve {
        /// Volume record (JSON)
        volume: PathBuf,
    },

    /// Run sendtargets discovery against a portal
    Discover {
        /// Portal host or address
        portal: String,
    },

    /// Write a raw image onto a volume
    ImageToVolume {
        /// Volume record (JSON)
        volume: PathBuf,

        /// Image id in the image directory
        image: String,

        /// Image directory (overrides config)
        #[arg(long)]
        image_dir: Option<PathBuf>,
    },

    /// Save a volume as a raw image
    VolumeToImage {
        /// Volume record (JSON)
        volume: PathBuf,

        /// New image id
        image: String,

        /// Image directory (overrides config)
        #[arg(long)]
        image_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => Config::default(),
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(config.logging.level.as_str()))
        .init();

    let executor = if cli.fake {
        log::info!("Fake mode: commands are logged, not run");
        Executor::fake()
    } else {
        config.system_executor()
    };

    match &cli.command {
        Commands::Resolve { volume } => cmd_resolve(&config, executor, volume),
        Commands::Discover { portal } => cmd_discover(&config, executor, portal),
        Commands::ImageToVolume {
            volume,
            image,
            image_dir,
        } => cmd_image_to_volume(&config, executor, volume, image, image_dir.clone()),
        Commands::VolumeToImage {
            volume,
            image,
            image_dir,
        } => cmd_volume_to_image(&config, executor, volume, image, image_dir.clone()),
    }
}

fn cmd_resolve(config: &Config, executor: Executor, volume: &Path) -> Result<()> {
    let volume = Volume::load(volume)?;
    let resolver = IscsiPropertyResolver::from_config(config, executor);

    let properties = resolver
        .resolve(&volume)
        .with_context(|| format!("failed to resolve connection properties for {}", volume.name))?;

    println!("{}", serde_json::to_string_pretty(&properties)?);
    Ok(())
}

fn cmd_discover(config: &Config, executor: Executor, portal: &str) -> Result<()> {
    let portal = config.iscsi.portal(portal);
    let command = ShellCommand::new("iscsiadm")
        .args(["-m", "discovery", "-t", "sendtargets", "-p", portal.as_str()])
        .as_root();
    let output = executor.try_run(&command, &[]).context("discovery failed")?;

    let mut found = 0;
    for line in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let marker = if line.contains(&config.iscsi.ip_address) { "*" } else { " " };
        println!("{} {}", marker, line);
        found += 1;
    }

    if found == 0 {
        println!("No targets found at {}", portal);
    }
    Ok(())
}

fn orchestrator(config: &Config, executor: Executor) -> Result<ImageTransferOrchestrator> {
    let driver = IscsiDriver::from_config(config, executor.clone());
    driver
        .check_for_setup_error()
        .context("volume driver is not set up")?;
    let factory = SystemConnectorFactory::new(executor, &config.iscsi);
    Ok(ImageTransferOrchestrator::new(
        Arc::new(driver),
        Arc::new(factory),
        config,
    ))
}

fn image_service(
    config: &Config,
    executor: Executor,
    image_dir: Option<PathBuf>,
) -> Result<RawImageService> {
    let dir = image_dir.unwrap_or_else(|| config.transfer.image_dir.clone());
    RawImageService::new(dir, executor, config.transfer.dd_blocksize.clone())
}

fn cmd_image_to_volume(
    config: &Config,
    executor: Executor,
    volume: &Path,
    image: &str,
    image_dir: Option<PathBuf>,
) -> Result<()> {
    let volume = Volume::load(volume)?;
    let mut images = image_service(config, executor.clone(), image_dir)?;

    println!("Writing image {} to volume {}", image, volume.name);

    let report = orchestrator(config, executor)?.copy_image_to_volume(&volume, &mut images, image)?;

    println!("✓ Done:");
    println!("  Device: {}", report.device_path.display());
    println!("  Took:   {}s", (report.finished_at - report.started_at).num_seconds());
    Ok(())
}

fn cmd_volume_to_image(
    config: &Config,
    executor: Executor,
    volume: &Path,
    image: &str,
    image_dir: Option<PathBuf>,
) -> Result<()> {
    let volume = Volume::load(volume)?;
    let mut images = image_service(config, executor.clone(), image_dir)?;

    println!("Saving volume {} as image {}", volume.name, image);

    let meta = ImageMeta::raw(image);
    let report = orchestrator(config, executor)?.copy_volume_to_image(&volume, &mut images, &meta)?;

    println!("✓ Done:");
    println!("  Device: {}", report.device_path.display());
    println!("  Took:   {}s", (report.finished_at - report.started_at).num_seconds());
    Ok(())
}

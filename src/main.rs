//! memblk - memory-backed block devices
//!
//! Usage:
//!   memblk [OPTIONS] <COMMAND>
//!
//! Example:
//!   memblk --devices 2 --size 8 exercise

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memblk::config::Config;
use memblk::geometry::{BlockOps, HDIO_GETGEO};
use memblk::{ControlResponse, DeviceHandle, DeviceRegistry, Request};
use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "memblk")]
#[command(about = "Memory-backed block devices", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of devices
    #[arg(short = 'n', long)]
    devices: Option<u32>,

    /// Device size in MB
    #[arg(short, long)]
    size: Option<u64>,

    /// Sector size in bytes
    #[arg(long)]
    sector_size: Option<u32>,

    /// Verbose diagnostics
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print device information and geometry
    Info {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Write random patterns to every device and read them back
    Exercise {
        /// Requests per device
        #[arg(short, long, default_value = "64")]
        requests: u32,

        /// Largest request in sectors
        #[arg(long, default_value = "8")]
        max_sectors: u64,
    },
}

#[derive(Serialize)]
struct DeviceReport {
    #[serde(flatten)]
    info: memblk::DeviceInfo,
    sector_count: u64,
    geometry: memblk::Geometry,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    // RUST_LOG wins over the configured level
    let mut logger = env_logger::Builder::new();
    logger.filter_level(config.log_level());
    if let Ok(filter) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filter);
    }
    logger.init();

    log::info!("memblk v{}", env!("CARGO_PKG_VERSION"));
    log::debug!(
        "Configuration: {} device(s), {} MB, {} byte sectors",
        config.devices.count,
        config.devices.size_mb,
        config.devices.sector_size
    );

    let registry = DeviceRegistry::create_devices(&config.devices)
        .context("failed to create devices")?;

    for failed in registry.failed() {
        log::warn!("{} unavailable: {}", failed.name, failed.error);
    }

    let result = match args.command {
        Command::Info { json } => info(&registry, json),
        Command::Exercise {
            requests,
            max_sectors,
        } => exercise(&registry, requests, max_sectors),
    };

    registry.destroy();
    result
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(count) = args.devices {
        config.devices.count = count;
    }
    if let Some(size) = args.size {
        config.devices.size_mb = size;
    }
    if let Some(sector_size) = args.sector_size {
        config.devices.sector_size = sector_size;
    }
    if args.debug {
        config.server.debug = true;
    }
}

fn info(registry: &DeviceRegistry, json: bool) -> Result<()> {
    let mut reports = Vec::new();

    for handle in registry.handles() {
        let device = registry
            .device(handle)
            .with_context(|| format!("device {} vanished", handle))?;

        let geometry = match registry.control(handle, HDIO_GETGEO, 0)? {
            ControlResponse::Geometry(geometry) => geometry,
        };

        reports.push(DeviceReport {
            info: device.info().clone(),
            sector_count: device.info().sector_count(),
            geometry,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        println!(
            "{}: {} bytes, {} sectors of {} bytes",
            report.info.name,
            report.info.capacity_bytes,
            report.sector_count,
            report.info.sector_size
        );
        println!(
            "  CHS {}/{}/{}, start {}",
            report.geometry.cylinders,
            report.geometry.heads,
            report.geometry.sectors_per_track,
            report.geometry.start_offset
        );
    }

    Ok(())
}

fn exercise(registry: &DeviceRegistry, requests: u32, max_sectors: u64) -> Result<()> {
    let mut rng = rand::thread_rng();
    let mut failures = 0u64;

    for handle in registry.handles() {
        let (sector_size, sector_count) = {
            let device = registry
                .device(handle)
                .with_context(|| format!("device {} vanished", handle))?;
            (device.sector_size(), device.info().sector_count())
        };
        let max_sectors = max_sectors.clamp(1, sector_count);

        for tag in 0..u64::from(requests) {
            let count = rng.gen_range(1..=max_sectors);
            let offset = rng.gen_range(0..=sector_count - count);
            let mut data = vec![0u8; (count * u64::from(sector_size)) as usize];
            rng.fill(&mut data[..]);

            failures += check_round_trip(registry, handle, tag, offset, data, sector_size)?;
        }

        // One past the end must be rejected
        let completion = registry.submit(handle, Request::read(u64::MAX, sector_count, 1, sector_size))?;
        if completion.is_ok() {
            log::error!("Read past end of device {} succeeded", handle);
            failures += 1;
        }

        let geometry = registry
            .device(handle)
            .map(|device| device.compute_geometry())
            .with_context(|| format!("device {} vanished", handle))?;
        log::info!(
            "Device {}: {} request(s) verified, {} cylinders",
            handle,
            requests,
            geometry.cylinders
        );
    }

    if failures > 0 {
        anyhow::bail!("{} verification failure(s)", failures);
    }

    println!("all devices verified");
    Ok(())
}

fn check_round_trip(
    registry: &DeviceRegistry,
    handle: DeviceHandle,
    tag: u64,
    offset: u64,
    data: Vec<u8>,
    sector_size: u32,
) -> Result<u64> {
    let count = data.len() as u64 / u64::from(sector_size);

    let written = registry.submit(handle, Request::write(tag, offset, data, sector_size))?;
    if let Err(e) = &written.result {
        log::error!("Write {} on device {} failed: {}", tag, handle, e);
        return Ok(1);
    }

    let read = registry.submit(handle, Request::read(tag, offset, count, sector_size))?;
    match &read.result {
        Ok(()) if read.request.buffer == written.request.buffer => Ok(0),
        Ok(()) => {
            log::error!("Data mismatch at sector {} on device {}", offset, handle);
            Ok(1)
        }
        Err(e) => {
            log::error!("Read {} on device {} failed: {}", tag, handle, e);
            Ok(1)
        }
    }
}

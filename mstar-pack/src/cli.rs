//! Command line interface for mstar-pack

use std::path::{Path, PathBuf};

use anyhow::Context;
use byte_unit::Byte;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use crate::VERSION;
use crate::builder::FirmwareBuilder;
use crate::image_types::CrcType;
use crate::inspect::{ImageInspector, ImageReport};
use crate::manifest::{DEFAULT_MAGIC_FOOTER, Manifest, parse_size};

/// Command line arguments for mstar-pack
#[derive(Parser, Debug)]
#[command(name = "mstar-pack")]
#[command(version = VERSION)]
#[command(about = "Pack partition images into an MStar upgrade binary", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Firmware manifest (TOML)
    pub manifest: Option<PathBuf>,

    /// Output file, overrides the manifest's firmware_file_name
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Run the whole build and print the header script without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - only output errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify an existing firmware image and list its contents
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Firmware image to examine
    pub image_file: PathBuf,

    /// Header size the image was built with
    #[arg(long, default_value = "16KB", value_parser = parse_size)]
    pub header_size: u64,

    /// Footer layout: NORMAL, XGIMI or PB803
    #[arg(long, default_value = "NORMAL", value_parser = parse_crc_type)]
    pub crc_type: CrcType,

    /// Footer magic
    #[arg(long, default_value = DEFAULT_MAGIC_FOOTER)]
    pub magic: String,

    /// Print in JSON format
    #[arg(long)]
    pub json: bool,

    /// Include the header script in the output
    #[arg(long)]
    pub script: bool,
}

fn parse_crc_type(s: &str) -> Result<CrcType, String> {
    s.parse().map_err(|e: crate::PackError| e.to_string())
}

fn init_logger(verbose: bool, quiet: bool) {
    let level = if quiet {
        LevelFilter::Error
    } else if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new()
        .with_level(level)
        .without_timestamps()
        .init();
}

/// Main CLI handler
pub fn run_cli(args: Args) -> anyhow::Result<()> {
    init_logger(args.verbose, args.quiet);

    match (args.command, args.manifest) {
        (Some(Commands::Info(info_args)), _) => handle_info(info_args),
        (None, Some(manifest)) => handle_pack(&manifest, args.output, args.dry_run, args.quiet),
        (None, None) => {
            Args::command().print_help()?;
            Ok(())
        }
    }
}

fn handle_pack(
    manifest_path: &Path,
    output: Option<PathBuf>,
    dry_run: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path)
        .with_context(|| format!("failed to load manifest {}", manifest_path.display()))?;
    let output = output.unwrap_or_else(|| manifest.firmware_file_name.clone());
    let builder = FirmwareBuilder::new(manifest);

    if dry_run {
        let image = builder.build(Utc::now())?;
        print!("{}", image.script_text());
        return Ok(());
    }

    let image = builder
        .build_to_file(Utc::now(), &output)
        .with_context(|| format!("failed to build {}", output.display()))?;

    if !quiet {
        println!(
            "{} {} ({:#}, {} chunks)",
            "Firmware written:".green(),
            output.display(),
            Byte::from_u64(image.len() as u64),
            image.placements.len()
        );
    }
    Ok(())
}

fn handle_info(args: InfoArgs) -> anyhow::Result<()> {
    let inspector = ImageInspector::new(
        args.header_size as usize,
        args.crc_type,
        args.magic.as_bytes(),
    );
    let report = inspector
        .inspect_file(&args.image_file)
        .with_context(|| format!("{} failed verification", args.image_file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&args.image_file, &report, args.script);
    }
    Ok(())
}

fn print_report(path: &Path, report: &ImageReport, with_script: bool) {
    println!("Image: {}", path.display());
    println!("  Size: {:#}", Byte::from_u64(report.file_len as u64));
    println!("  Header: {} bytes", report.header_size);
    println!("  Bin: {}", Byte::from_u64(report.bin_len as u64));
    println!("  Footer: {} (magic '{}')", report.crc_type, report.magic);
    println!("  Header CRC32: 0x{:08X}", report.header_crc);
    println!("  Bin CRC32: 0x{:08X}", report.bin_crc);
    if let Some(merged) = report.merged_crc {
        println!("  Merged CRC32: 0x{merged:08X}");
    }
    println!("  Loads:");
    for (i, load) in report.loads.iter().enumerate() {
        println!(
            "    {i}: 0x{:X} ({} bytes) -> 0x{:X}",
            load.offset, load.len, load.addr
        );
    }
    if with_script {
        println!();
        print!("{}", report.script);
    }
    println!("{}", "CRC verification: OK".green());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pack_args() {
        let args = Args::try_parse_from(["mstar-pack", "-v", "-o", "out.bin", "fw.toml"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.manifest.as_deref(), Some(Path::new("fw.toml")));
        assert_eq!(args.output.as_deref(), Some(Path::new("out.bin")));
        assert!(args.command.is_none());
    }

    #[test]
    fn test_parse_info_args() {
        let args = Args::try_parse_from([
            "mstar-pack",
            "info",
            "fw.bin",
            "--header-size",
            "0x8000",
            "--crc-type",
            "pb803",
        ])
        .unwrap();
        let Some(Commands::Info(info)) = args.command else {
            panic!("expected info subcommand");
        };
        assert_eq!(info.header_size, 0x8000);
        assert_eq!(info.crc_type, CrcType::Pb803);
        assert_eq!(info.magic, DEFAULT_MAGIC_FOOTER);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["mstar-pack", "-v", "-q", "fw.toml"]).is_err());
        assert!(Args::try_parse_from(["mstar-pack", "info", "x.bin", "--crc-type", "crc16"]).is_err());
    }
}

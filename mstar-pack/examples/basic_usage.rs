//! Basic usage example for mstar-pack

use chrono::Utc;
use mstar_pack::{CrcType, FirmwareBuilder, HeaderScript, ImageInspector, Manifest, PartitionKind, PartitionSpec};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Packing a small MStar upgrade image...");

    // Create some test partitions
    let dir = tempfile::tempdir()?;
    let boot = dir.path().join("boot.img");
    let system = dir.path().join("system.img");
    std::fs::write(&boot, b"Hello, MBOOT! This is a test boot image.")?;
    std::fs::write(&system, vec![0x5Au8; 64 * 1024])?;

    let manifest = Manifest::new("test_upgrade.bin")
        .crc_type(CrcType::Xgimi)
        .hex_prefix(true)
        .header_script(HeaderScript {
            label: Some("# demo image built {time}".into()),
            prefix: "mmc rmgpt".into(),
            suffix: "reset".into(),
        })
        .partition(PartitionSpec::new("boot", PartitionKind::PartitionImage).image_file(&boot))
        .partition(
            PartitionSpec::new("system", PartitionKind::PartitionImage)
                .image_file(&system)
                .chunk_size(16 * 1024)
                .lzo(true)
                .erase(true),
        );

    let image = FirmwareBuilder::new(manifest).build_to_file(Utc::now(), "test_upgrade.bin")?;

    println!("✓ Created test_upgrade.bin");
    println!("  Size: {} bytes", image.len());
    println!("  Chunks: {}", image.placements.len());
    println!();
    println!("{}", image.script_text());

    // Verify the image
    let report = ImageInspector::new(image.header.len(), CrcType::Xgimi, "12345678")
        .inspect_file("test_upgrade.bin")?;
    println!("✓ Image validation passed, merged CRC 0x{:08X}", report.merged_crc.unwrap_or_default());

    Ok(())
}

//! CLI tests for mstar-pack

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("boot.img"), vec![0x42u8; 1000]).unwrap();
    fs::write(
        dir.path().join("system.img"),
        (0..20_000u32).map(|i| (i / 16) as u8).collect::<Vec<u8>>(),
    )
    .unwrap();
    fs::write(
        dir.path().join("fw.toml"),
        r##"
[main]
firmware_file_name = "MstarUpgrade.bin"
dram_buf_addr = "50000000"
magic_footer = "12345678"
crc_type = "XGIMI"

[header_script]
label = "# cli test"
suffix = "reset"

["part/boot"]
image_file = "boot.img"

["part/system"]
image_file = "system.img"
chunk_size = "8KB"
lzo = true
"##,
    )
    .unwrap();
    dir
}

/// Without arguments only the usage is printed
#[test]
fn test_cli_no_args_prints_usage() {
    let mut cmd = Command::cargo_bin("mstar-pack").unwrap();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("mstar-pack").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_pack_and_info() {
    let dir = project();
    let output = dir.path().join("out.bin");

    Command::cargo_bin("mstar-pack")
        .unwrap()
        .arg(dir.path().join("fw.toml"))
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Firmware written"));

    let data = fs::read(&output).unwrap();
    assert!(data.starts_with(b"# cli test\n\n"));

    Command::cargo_bin("mstar-pack")
        .unwrap()
        .args(["info", "--crc-type", "xgimi"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Merged CRC32"))
        .stdout(predicate::str::contains("CRC verification: OK"));
}

#[test]
fn test_cli_info_json() {
    let dir = project();
    let output = dir.path().join("out.bin");

    Command::cargo_bin("mstar-pack")
        .unwrap()
        .args(["-q", "-o"])
        .arg(&output)
        .arg(dir.path().join("fw.toml"))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let assert = Command::cargo_bin("mstar-pack")
        .unwrap()
        .args(["info", "--json", "--crc-type", "XGIMI"])
        .arg(&output)
        .assert()
        .success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["crc_type"], "XGIMI");
    assert_eq!(report["loads"].as_array().unwrap().len(), 4);
}

#[test]
fn test_cli_info_detects_corruption() {
    let dir = project();
    let output = dir.path().join("out.bin");
    Command::cargo_bin("mstar-pack")
        .unwrap()
        .arg("-q")
        .arg("-o")
        .arg(&output)
        .arg(dir.path().join("fw.toml"))
        .assert()
        .success();

    let mut data = fs::read(&output).unwrap();
    data[16384 + 100] ^= 0xFF;
    fs::write(&output, data).unwrap();

    Command::cargo_bin("mstar-pack")
        .unwrap()
        .args(["info", "--crc-type", "XGIMI"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("CRC32 mismatch"));
}

#[test]
fn test_cli_dry_run_writes_nothing() {
    let dir = project();
    let output = dir.path().join("dry.bin");

    Command::cargo_bin("mstar-pack")
        .unwrap()
        .arg("--dry-run")
        .arg("-o")
        .arg(&output)
        .arg(dir.path().join("fw.toml"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("# cli test\n"))
        .stdout(predicate::str::contains("mmc unlzo.cont"))
        .stdout(predicate::str::ends_with("% <- this is end of file symbol\n"));

    assert!(!output.exists());
}

#[test]
fn test_cli_rejects_lzo_with_sparse() {
    let dir = project();
    let manifest = dir.path().join("bad.toml");
    fs::write(
        &manifest,
        r##"
[main]
firmware_file_name = "bad.bin"
dram_buf_addr = "50000000"
magic_footer = "12345678"

["part/system"]
image_file = "system.img"
lzo = true
sparse = true
"##,
    )
    .unwrap();

    Command::cargo_bin("mstar-pack")
        .unwrap()
        .arg(&manifest)
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("lzo and sparse"));

    assert!(!dir.path().join("bad.bin").exists());
}

#[test]
fn test_cli_missing_manifest() {
    Command::cargo_bin("mstar-pack")
        .unwrap()
        .arg("/nonexistent/fw.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load manifest"));
}

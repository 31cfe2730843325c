//! CLI end-to-end tests
//!
//! Tests for the mp4forge command-line interface.

use assert_cmd::prelude::*;
use bytes::Bytes;
use mp4forge_media::{MovieOptions, Mp4File, SampleOptions, TrackOptions};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

/// Get a command for the mp4forge binary
#[allow(deprecated)]
fn mp4forge_cmd() -> Command {
    Command::cargo_bin("mp4forge").unwrap()
}

/// A small progressive movie with one video and one audio track.
fn write_fixture(dir: &TempDir) -> PathBuf {
    let mut movie = Mp4File::new_movie(MovieOptions::default());
    let video = movie
        .add_track(TrackOptions::video(640, 360).with_codec_config(mp4forge_media::BoxType::AVCC, vec![1, 0x64, 0, 0x1f]))
        .unwrap();
    let audio = movie.add_track(TrackOptions::audio(44100, 2)).unwrap();
    for i in 0..5u8 {
        movie
            .add_sample(video, Bytes::from(vec![i; 200]), SampleOptions::new(3000).sync(i % 3 == 0))
            .unwrap();
        movie
            .add_sample(audio, Bytes::from(vec![i; 32]), SampleOptions::new(1024))
            .unwrap();
    }
    let path = dir.path().join("fixture.mp4");
    fs::write(&path, movie.serialize().unwrap()).unwrap();
    path
}

fn parse(path: &Path) -> Mp4File {
    Mp4File::parse_bytes(fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = mp4forge_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = mp4forge_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mp4forge"))
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = mp4forge_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mp4forge"));
}

#[test]
fn test_cli_dump() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut cmd = mp4forge_cmd();
    cmd.arg("dump")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("ftyp"))
        .stdout(predicate::str::contains("stsz"))
        .stdout(predicate::str::contains("mdat"));
}

#[test]
fn test_cli_info_text() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut cmd = mp4forge_cmd();
    cmd.arg("info")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracks: 2"))
        .stdout(predicate::str::contains("avc1.64001f"))
        .stdout(predicate::str::contains("640x360"))
        .stdout(predicate::str::contains("progressive"));
}

#[test]
fn test_cli_info_json() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut cmd = mp4forge_cmd();
    let output = cmd.args(["info", "--json"]).arg(&input).output().unwrap();
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["major_brand"], "isom");
    assert_eq!(info["tracks"].as_array().unwrap().len(), 2);
    assert_eq!(info["tracks"][1]["sample_rate"], 44100);
}

#[test]
fn test_cli_samples() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut cmd = mp4forge_cmd();
    let output = cmd
        .args(["samples", "--track", "1", "--json"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let samples: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(samples.len(), 5);
    let sync: Vec<bool> = samples.iter().map(|s| s["is_sync"].as_bool().unwrap()).collect();
    assert_eq!(sync, vec![true, false, false, true, false]);
}

#[test]
fn test_cli_samples_unknown_track() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut cmd = mp4forge_cmd();
    cmd.args(["samples", "--track", "9"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("9"));
}

#[test]
fn test_cli_remux() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let output = dir.path().join("remuxed.mp4");
    let mut cmd = mp4forge_cmd();
    cmd.arg("remux").arg(&input).arg("-o").arg(&output).assert().success();

    let source = parse(&input);
    let remuxed = parse(&output);
    assert!(remuxed.warnings().is_empty());
    for track_id in [1, 2] {
        let a: Vec<_> = source.samples_for_track(track_id).unwrap().map(|s| source.read_sample_data(&s).unwrap()).collect();
        let b: Vec<_> = remuxed.samples_for_track(track_id).unwrap().map(|s| remuxed.read_sample_data(&s).unwrap()).collect();
        assert_eq!(a, b);
    }
}

#[test]
fn test_cli_fragment_with_config_brands() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let config = dir.path().join("mp4forge.toml");
    fs::write(
        &config,
        "[fragment]\nmajor_brand = \"dash\"\nbrands = [\"iso6\", \"dash\"]\n",
    )
    .unwrap();
    let output = dir.path().join("fragmented.mp4");

    let mut cmd = mp4forge_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("fragment")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let fragmented = parse(&output);
    let info = fragmented.info();
    assert!(info.is_fragmented);
    assert_eq!(info.fragment_count, 10);
    assert_eq!(info.major_brand.as_deref(), Some("dash"));
    assert_eq!(fragmented.samples_for_track(2).unwrap().count(), 5);
}

#[test]
fn test_cli_validate() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut cmd = mp4forge_cmd();
    cmd.arg("validate")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn test_cli_validate_broken_file() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let mut data = fs::read(&input).unwrap();
    // A second moov is recovered from with a warning, or rejected in strict mode.
    let moov_at = data.windows(4).position(|w| w == b"moov").unwrap() - 4;
    let moov_len = u32::from_be_bytes(data[moov_at..moov_at + 4].try_into().unwrap()) as usize;
    let moov = data[moov_at..moov_at + moov_len].to_vec();
    data.extend_from_slice(&moov);
    let broken = dir.path().join("broken.mp4");
    fs::write(&broken, data).unwrap();

    let mut cmd = mp4forge_cmd();
    cmd.arg("validate")
        .arg(&broken)
        .assert()
        .failure()
        .stdout(predicate::str::contains("duplicate moov"));
}

#[test]
fn test_cli_missing_input() {
    let mut cmd = mp4forge_cmd();
    cmd.args(["info", "/nonexistent/file.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse"));
}

#[test]
fn test_cli_invalid_config() {
    let dir = tempdir().unwrap();
    let input = write_fixture(&dir);
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[parser]\nread_chunk_size = 0\n").unwrap();

    let mut cmd = mp4forge_cmd();
    cmd.arg("--config")
        .arg(&config)
        .arg("info")
        .arg(&input)
        .assert()
        .failure();
}

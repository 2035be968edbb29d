use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_feedback_cli"))
}

/// Fixture directory holding one second of digital silence
fn silent_fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feedback_cli_{}_{}", name, std::process::id()));
    fs::create_dir_all(&dir).expect("create fixture dir");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(dir.join("silence.wav"), spec).expect("create wav");
    for _ in 0..48_000 {
        writer.write_sample(0i16).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
    dir
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8(stdout.to_vec())
        .expect("stdout UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("event JSON line"))
        .collect()
}

#[test]
fn simulate_steady_publishes_advisory() {
    let output = cli()
        .args(["simulate", "--scenario", "steady", "--frames", "60", "--seed", "1"])
        .output()
        .expect("failed to run feedback_cli simulate");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let events = json_lines(&output.stdout);
    assert_eq!(events[0]["type"], "ready");
    let advisories: Vec<&Value> = events.iter().filter(|e| e["type"] == "advisory").collect();
    assert_eq!(advisories.len(), 1);
    assert_eq!(advisories[0]["change"], "created");
    assert_eq!(advisories[0]["advisory"]["severity"], "resonance");
}

#[test]
fn simulate_silence_publishes_nothing() {
    let output = cli()
        .args(["simulate", "--scenario", "silence", "--frames", "20"])
        .output()
        .expect("failed to run feedback_cli simulate");
    assert!(output.status.success());

    let events = json_lines(&output.stdout);
    assert!(events
        .iter()
        .all(|e| e["type"] == "ready" || e["type"] == "tracks_update"));
}

#[test]
fn dump_settings_prints_mode_preset() {
    let output = cli()
        .args(["dump-settings", "--mode", "ring-out"])
        .output()
        .expect("failed to run dump-settings");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("settings JSON payload");
    assert_eq!(json["mode"], "ring_out");
}

#[test]
fn analyze_fixture_succeeds() {
    let dir = silent_fixture_dir("analyze");
    let output = cli()
        .arg("--fixtures-dir")
        .arg(&dir)
        .args(["analyze", "--fixture", "silence"])
        .output()
        .expect("failed to run feedback_cli analyze");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("analysis report JSON payload");
    assert_eq!(json["fixture"], "silence");
    assert_eq!(json["sample_rate"], 48_000);
    assert!(json["frames"].as_u64().unwrap_or_default() >= 1);
    assert_eq!(json["advisory_count"], 0);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn analyze_fixture_detects_mismatch() {
    let dir = silent_fixture_dir("mismatch");
    let expect = dir.join("wrong.expect.json");
    fs::write(
        &expect,
        r#"{ "fixture": "silence", "advisories": [ { "frequency_hz": 5000.0 } ] }"#,
    )
    .expect("write expectation");

    let output = cli()
        .arg("--fixtures-dir")
        .arg(&dir)
        .args(["analyze", "--fixture", "silence", "--expect"])
        .arg(&expect)
        .output()
        .expect("failed to run mismatch analyze");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(
        stderr.contains("\"failures\""),
        "expected diff JSON in stderr, got {stderr}"
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn dump_fixtures_lists_assets() {
    let dir = silent_fixture_dir("dump");
    let output = cli()
        .arg("--fixtures-dir")
        .arg(&dir)
        .arg("dump-fixtures")
        .output()
        .expect("failed to run dump-fixtures");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    assert!(
        stdout.contains("silence"),
        "expected fixture listing, got {stdout}"
    );
    let _ = fs::remove_dir_all(dir);
}

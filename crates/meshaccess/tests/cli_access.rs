#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const NODE: &str = r#"{
    "addr": 256,
    "elements": [
        {
            "models": [
                {
                    "id": 4096,
                    "keys": [0],
                    "groups": [49153],
                    "ops": [
                        { "opcode": "8201", "len": 0, "reply": "8204 01" },
                        { "opcode": "8202", "len": 2 }
                    ],
                    "publication": {
                        "addr": 49154,
                        "key": 0,
                        "retransmit": 2,
                        "message": "8204 00"
                    }
                }
            ]
        }
    ]
}"#;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "meshaccess-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn write_node(dir: &Path) -> PathBuf {
    let path = dir.join("node.json");
    std::fs::write(&path, NODE).expect("node file should be writable");
    path
}

fn meshaccess_json(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_meshaccess"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .args(args)
        .output()
        .expect("meshaccess should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("command should emit json")
}

#[test]
fn recv_dispatches_and_replies() {
    let dir = unique_temp_dir("recv");
    let node = write_node(&dir);
    let node = node.to_string_lossy();

    let output = meshaccess_json(&["recv", &node, "8201", "--src", "0x0005", "--dst", "0x0100"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload.get("status").and_then(|v| v.as_str()), Some("success"));
    let sent = payload["sent"].as_array().expect("sent should be a list");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["src"].as_u64(), Some(0x0100));
    assert_eq!(sent[0]["dst"].as_u64(), Some(0x0005));
    assert_eq!(sent[0]["sdu"].as_str(), Some("820401"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn recv_reports_wrong_key_with_failure_exit() {
    let dir = unique_temp_dir("recv-key");
    let node = write_node(&dir);
    let node = node.to_string_lossy();

    let output = meshaccess_json(&["recv", &node, "8201", "--dst", "0x0100", "--app-idx", "1"]);
    assert_eq!(output.status.code(), Some(1));
    let payload = stdout_json(&output);
    assert_eq!(payload.get("status").and_then(|v| v.as_str()), Some("wrong_key"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn recv_checks_subscription_and_length() {
    let dir = unique_temp_dir("recv-checks");
    let node = write_node(&dir);
    let node = node.to_string_lossy();

    let output = meshaccess_json(&["recv", &node, "8201", "--dst", "0xC005"]);
    let payload = stdout_json(&output);
    assert_eq!(
        payload.get("status").and_then(|v| v.as_str()),
        Some("invalid_address")
    );

    let output = meshaccess_json(&["recv", &node, "820201", "--dst", "0xC001"]);
    let payload = stdout_json(&output);
    assert_eq!(
        payload.get("status").and_then(|v| v.as_str()),
        Some("message_not_understood")
    );

    let output = meshaccess_json(&["recv", &node, "8203", "--dst", "0x0100"]);
    let payload = stdout_json(&output);
    assert_eq!(
        payload.get("status").and_then(|v| v.as_str()),
        Some("wrong_opcode")
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn schedule_prints_retransmission_burst() {
    let dir = unique_temp_dir("schedule");
    let node = write_node(&dir);
    let node = node.to_string_lossy();

    let output = meshaccess_json(&["schedule", &node, "--until", "500"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    let sent = payload["transmissions"]
        .as_array()
        .expect("transmissions should be a list");
    let times: Vec<u64> = sent.iter().filter_map(|t| t["at"].as_u64()).collect();
    assert_eq!(times, vec![0, 50, 100]);
    let retransmits: Vec<bool> = sent
        .iter()
        .filter_map(|t| t["retransmission"].as_bool())
        .collect();
    assert_eq!(retransmits, vec![false, true, true]);
    assert_eq!(sent[0]["dst"].as_u64(), Some(0xC002));
    assert_eq!(sent[0]["sdu"].as_str(), Some("820400"));
    assert!(payload["next_deadline"].is_null());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn schedule_without_publication_fails() {
    let dir = unique_temp_dir("schedule-none");
    let node = write_node(&dir);
    let node = node.to_string_lossy();

    let output = meshaccess_json(&["schedule", &node, "--elem", "3"]);
    assert!(!output.status.success());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn opcode_decodes_vendor_opcode() {
    let output = meshaccess_json(&["opcode", "c15900"]);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload.get("class").and_then(|v| v.as_str()), Some("vendor"));
    assert_eq!(payload.get("company").and_then(|v| v.as_u64()), Some(0x0059));
    assert_eq!(payload.get("len").and_then(|v| v.as_u64()), Some(3));
}

#[test]
fn opcode_rejects_reserved_opcode() {
    let output = meshaccess_json(&["opcode", "7f"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn opcode_rejects_bad_hex() {
    let output = meshaccess_json(&["opcode", "zz"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_meshaccess"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("meshaccess {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn version_extended_reports_build_profile() {
    let output = Command::new(env!("CARGO_BIN_EXE_meshaccess"))
        .args(["version", "--extended"])
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let profile = stdout
        .lines()
        .find_map(|line| line.strip_prefix("profile: "))
        .expect("extended version should list the profile");
    assert!(profile == "debug" || profile == "release", "profile: {profile}");
    assert!(!stdout.contains("git_hash"));
}

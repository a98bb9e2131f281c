#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const NODE: &str = r#"{
    "cid": 89,
    "pid": 1,
    "vid": 2,
    "elements": [
        {
            "loc": 0,
            "models": [
                {
                    "id": 4096,
                    "metadata": [ { "id": 1, "data": "abcd" } ]
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

fn write_node(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("node.json");
    std::fs::write(&path, json).expect("node file should be writable");
    path
}

fn run_json(args: &[&str], node: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_meshaccess"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg(args[0])
        .arg(node)
        .args(&args[1..])
        .output()
        .expect("meshaccess should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("command should emit json")
}

#[test]
fn comp_page_0_is_complete_and_decoded() {
    let dir = unique_temp_dir("comp0");
    let node = write_node(&dir, NODE);

    let output = run_json(&["comp", "--page", "0"], &node);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(
        payload.get("data").and_then(|v| v.as_str()),
        Some("5900010002000a000300000001000010")
    );
    assert_eq!(payload.get("total_size").and_then(|v| v.as_u64()), Some(16));
    let decoded = payload.get("decoded").expect("whole page should be decoded");
    assert_eq!(decoded.get("cid").and_then(|v| v.as_u64()), Some(0x0059));
    assert_eq!(decoded["elements"][0]["sig"][0].as_u64(), Some(0x1000));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn comp_offset_read_returns_the_tail() {
    let dir = unique_temp_dir("comp-offset");
    let node = write_node(&dir, NODE);

    let output = run_json(&["comp", "--page", "0", "--offset", "10"], &node);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload.get("data").and_then(|v| v.as_str()), Some("000001000010"));
    assert_eq!(payload.get("len").and_then(|v| v.as_u64()), Some(6));
    assert!(payload.get("decoded").is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn comp_max_len_truncates() {
    let dir = unique_temp_dir("comp-max");
    let node = write_node(&dir, NODE);

    let output = run_json(&["comp", "--page", "0", "--max-len", "4"], &node);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload.get("data").and_then(|v| v.as_str()), Some("59000100"));
    assert_eq!(payload.get("total_size").and_then(|v| v.as_u64()), Some(16));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn metadata_page_matches_reported_size() {
    let dir = unique_temp_dir("metadata");
    let node = write_node(&dir, NODE);

    let output = run_json(&["metadata"], &node);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    let len = payload.get("len").and_then(|v| v.as_u64());
    assert!(len.is_some_and(|len| len > 0));
    assert_eq!(len, payload.get("total_size").and_then(|v| v.as_u64()));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn sizes_lists_generated_and_high_pages() {
    let dir = unique_temp_dir("sizes");
    let node = write_node(&dir, NODE);

    let output = run_json(&["sizes"], &node);
    assert!(output.status.success());

    let payload = stdout_json(&output);
    assert_eq!(payload.get("elements").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        payload.get("comp_128_changed").and_then(|v| v.as_bool()),
        Some(false)
    );
    let pages = payload
        .get("pages")
        .and_then(|v| v.as_array())
        .expect("pages should be listed");
    let page_0 = pages
        .iter()
        .find(|p| p["kind"] == "comp" && p["page"] == 0)
        .expect("page 0 should be listed");
    assert_eq!(page_0["size"].as_u64(), Some(16));
    let page_128 = pages
        .iter()
        .find(|p| p["kind"] == "comp" && p["page"] == 128)
        .expect("page 128 should be listed");
    assert_eq!(page_128["size"].as_u64(), Some(16));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_node_file_returns_2() {
    let dir = unique_temp_dir("missing");
    let output = run_json(&["sizes"], &dir.join("absent.json"));
    assert_eq!(output.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_node_json_returns_60() {
    let dir = unique_temp_dir("invalid");
    let node = write_node(&dir, r#"{ "elements": "nope" }"#);

    let output = run_json(&["sizes"], &node);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: parse"));

    let _ = std::fs::remove_dir_all(&dir);
}

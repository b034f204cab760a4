use std::fs;
use std::process::Command;

use tempfile::tempdir;

#[test]
fn test_synth_info_and_run() {
    let dir = tempdir().unwrap();
    let cube = dir.path().join("cube.json");
    let script = dir.path().join("session.json");

    let status = Command::new(env!("CARGO_BIN_EXE_specrange"))
        .args(["synth", "--rows", "4", "--cols", "6", "--output"])
        .arg(&cube)
        .status()
        .unwrap();
    assert!(status.success());

    let info = Command::new(env!("CARGO_BIN_EXE_specrange"))
        .args(["info", "--json", "--data"])
        .arg(&cube)
        .output()
        .unwrap();
    assert!(info.status.success());
    let info: serde_json::Value = serde_json::from_slice(&info.stdout).unwrap();
    assert_eq!(info[0]["name"], "synthetic");
    assert_eq!(info[0]["signals"][0]["shape"][2], 1024);

    fs::write(
        &script,
        r#"{
            "dataset": "synthetic",
            "steps": [
                {"op": "add_range", "request": {"bounds": {"energy": {"start": 7.9, "end": 8.2}}, "label": "Cu window"}},
                {"op": "set_displayed", "id": 1},
                {"op": "select_element", "symbol": "Fe"},
                {"op": "toggle_line", "line": "Ka1"},
                {"op": "remove_range", "id": 9}
            ]
        }"#,
    )
    .unwrap();

    let run = Command::new(env!("CARGO_BIN_EXE_specrange"))
        .args(["run", "--json", "--data"])
        .arg(&cube)
        .arg("--script")
        .arg(&script)
        .output()
        .unwrap();
    assert!(run.status.success());
    let report: serde_json::Value = serde_json::from_slice(&run.stdout).unwrap();

    let ranges = report["ranges"].as_array().unwrap();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[0]["label"], "Cu window");
    assert_eq!(ranges[0]["sum"]["state"], "ready");
    assert_eq!(ranges[0]["image_stats"]["rows"], 4);
    assert_eq!(ranges[1]["label"], "Fe Ka1");
    assert_eq!(report["element"], "Fe");
    assert_eq!(report["failures"][0]["op"], "remove_range");
}

use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn neuroevo() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_neuroevo"));
    cmd.env("RUST_LOG", "off");
    cmd
}

const ROWS: &str = "\
0,250,12,3,40
1,8,240,25,10
2,15,5,230,35
0,220,30,18,5
1,20,255,4,28
2,2,22,245,12
0,235,4,30,22
1,35,210,10,3
2,28,14,250,6
";

#[test]
fn errors_reach_stderr_with_logging_off() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let output = neuroevo().args(["inspect", missing.to_str().unwrap()]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr: {stderr}");
    assert!(stderr.contains("missing.json"), "stderr: {stderr}");
}

#[test]
fn train_classifies_csv_and_saves_network() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("train.csv");
    let saved = dir.path().join("out/net.bin");
    fs::write(&data, ROWS).unwrap();

    let status = neuroevo()
        .args([
            "train",
            data.to_str().unwrap(),
            "--classes",
            "3",
            "--hidden",
            "8",
            "--epochs",
            "300",
            "--learning-rate",
            "0.3",
            "--seed",
            "42",
            "--min-accuracy",
            "0.8",
            "--save",
            saved.to_str().unwrap(),
        ])
        .status()
        .unwrap();
    assert!(status.success());

    let network = neuroevo::network::snapshot::load(&saved).unwrap();
    assert_eq!(network.topology(), &[4, 8, 3]);
}

#[test]
fn train_rejects_label_outside_classes() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("bad.csv");
    fs::write(&data, "0,1,2\n7,3,4\n").unwrap();
    let output = neuroevo().args(["train", data.to_str().unwrap(), "--classes", "3"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2"));
}

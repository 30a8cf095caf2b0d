use std::fs;
use std::process::Command;

use fairscan::{ScanDirection, ScanResult};
use tempfile::tempdir;

fn write_dataset(path: &std::path::Path) {
    let mut data = String::from("label\tprob\tregion\tband\n");
    for row in 0..60 {
        let region = ["north", "south", "east"][row % 3];
        let band = if row < 30 { "low" } else { "high" };
        // The model is too optimistic about the south.
        let label = if region == "south" { 0 } else { (row / 3) % 2 };
        data.push_str(&format!("{label}\t0.5\t{region}\t{band}\n"));
    }
    fs::write(path, data).expect("write dataset");
}

#[test]
fn scan_writes_a_report() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("audit.tsv");
    let report_path = tmp.path().join("report.toml");
    write_dataset(&data_path);

    let exe = env!("CARGO_BIN_EXE_fairscan");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "scan",
            data_path.to_str().expect("path str"),
            "--outcome",
            "label",
            "--expectation",
            "prob",
            "--direction",
            "unprivileged",
            "--restarts",
            "4",
            "--threads",
            "2",
            "--output",
            report_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run fairscan cli");

    assert!(
        output.status.success(),
        "CLI exited with status {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Most anomalous subgroup"), "{stdout}");

    let report: ScanResult =
        toml::from_str(&fs::read_to_string(&report_path).expect("read report")).expect("parse");
    assert_eq!(report.direction, ScanDirection::Unprivileged);
    assert_eq!(report.restarts, 4);
    assert!(report.is_significant());
    let region = report.subgroup.values("region").expect("region constrained");
    assert!(region.contains("south"));
}

#[test]
fn score_reports_errors_with_exit_status() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("audit.tsv");
    write_dataset(&data_path);

    let exe = env!("CARGO_BIN_EXE_fairscan");
    let ok = Command::new(exe)
        .args([
            "score",
            data_path.to_str().expect("path str"),
            "--outcome",
            "label",
            "--expectation",
            "prob",
            "--subgroup",
            "region=south",
        ])
        .output()
        .expect("run fairscan cli");
    assert!(ok.status.success());
    assert!(String::from_utf8_lossy(&ok.stdout).contains("Bias score (unprivileged)"));

    let unknown = Command::new(exe)
        .args([
            "score",
            data_path.to_str().expect("path str"),
            "--outcome",
            "label",
            "--expectation",
            "prob",
            "--subgroup",
            "planet=mars",
        ])
        .output()
        .expect("run fairscan cli");
    assert_eq!(unknown.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&unknown.stderr).starts_with("Error:"));
}

#[test]
fn scan_maps_labels_and_fills_missing_cells() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("audit.csv");
    let report_path = tmp.path().join("report.toml");
    let mut data = String::from("outcome,prob,region,band\n");
    for row in 0..60 {
        let region = ["north", "south", "east"][row % 3];
        let band = if row < 2 {
            "?"
        } else if row < 30 {
            "low"
        } else {
            "high"
        };
        let approved = region != "south" && (row / 3) % 2 == 1;
        let outcome = if approved { "approved" } else { "denied" };
        data.push_str(&format!("{outcome},0.5,{region},{band}\n"));
    }
    fs::write(&data_path, data).expect("write dataset");

    let exe = env!("CARGO_BIN_EXE_fairscan");
    let output = Command::new(exe)
        .args([
            "scan",
            data_path.to_str().expect("path str"),
            "--outcome",
            "outcome",
            "--expectation",
            "prob",
            "--favorable-label",
            "approved",
            "--missing-token",
            "?",
            "--missing",
            "mode",
            "--restarts",
            "4",
            "--output",
            report_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run fairscan cli");
    assert!(
        output.status.success(),
        "CLI exited with status {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Loaded 60 rows"));

    let report: ScanResult =
        toml::from_str(&fs::read_to_string(&report_path).expect("read report")).expect("parse");
    let region = report.subgroup.values("region").expect("region constrained");
    assert!(region.contains("south"));
    if let Some(band) = report.subgroup.values("band") {
        assert!(!band.contains("?"));
    }
}

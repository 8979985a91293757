use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::path::PathBuf;
use tempfile::tempdir;

fn sample_script() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("impulse_retina.toml")
}

#[test]
fn run_writes_results_and_summary() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let results = dir.path().join("results");
    let summary = dir.path().join("summary.json");

    let mut cmd = Command::cargo_bin("retina")?;
    cmd.arg("run")
        .arg(sample_script())
        .arg("--results-dir")
        .arg(&results)
        .arg("--summary")
        .arg(&summary)
        .arg("--quiet");
    cmd.assert().success();

    for name in ["bip", "bip_trial1", "output"] {
        assert!(results.join(name).is_file(), "missing result file {}", name);
    }
    let trace = retina_runtime::read_column(results.join("bip"))?;
    assert_eq!(trace.len(), 40);

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary)?)?;
    assert_eq!(json["trials"], 2);
    assert_eq!(json["steps_per_trial"], 40);
    assert_eq!(json["seed"], 7);
    assert_eq!(json["evaluation_order"], serde_json::json!(["tmp", "bip", "gc"]));
    assert_eq!(json["feedback_edges"], serde_json::json!([["gc", "bip"]]));
    assert_eq!(json["output"]["cells"], 12);
    assert_eq!(json["results"]["written"], 3);
    assert!(json["perf"].is_null());
    Ok(())
}

#[test]
fn run_overrides_trials_and_prints_summary() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;

    let mut cmd = Command::cargo_bin("retina")?;
    cmd.args(["simulate", "--trials", "1", "--perf", "-o"])
        .arg(dir.path())
        .arg(sample_script());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"trials\": 1"))
        .stdout(predicate::str::contains("avg_step_ns"));

    assert!(dir.path().join("bip").is_file());
    assert!(!dir.path().join("bip_trial1").exists());
    Ok(())
}

#[test]
fn check_prints_evaluation_order() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("retina")?;
    cmd.arg("check").arg(sample_script());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Evaluation order: tmp -> bip -> gc"))
        .stdout(predicate::str::contains("- gc -> bip"))
        .stdout(predicate::str::contains("Steps per trial: 40 x 2 trial(s)"));
    Ok(())
}

#[test]
fn run_with_unknown_target_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let script = dir.path().join("broken.toml");
    std::fs::write(
        &script,
        "[input]\nkind = \"impulse\"\nstart = 0\nstop = 1\namplitude = 1\n\n\
         [[connections]]\nfrom = [\"Input\"]\nto = \"missing\"\n",
    )?;

    let mut cmd = Command::cargo_bin("retina")?;
    cmd.arg("run").arg(&script).arg("--quiet");
    cmd.assert().failure();
    Ok(())
}

#[test]
fn check_missing_script_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let mut cmd = Command::cargo_bin("retina")?;
    cmd.arg("check").arg(dir.path().join("nope.toml"));
    cmd.assert().failure();
    Ok(())
}

#[test]
fn run_rejects_zero_trials() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let mut cmd = Command::cargo_bin("retina")?;
    cmd.args(["run", "--quiet", "--trials", "0", "-o"])
        .arg(dir.path())
        .arg(sample_script());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--trials must be at least 1"));
    Ok(())
}

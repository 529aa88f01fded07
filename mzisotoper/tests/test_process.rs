use std::error::Error;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;

    cmd.arg("not_real.txt").arg("-o").arg("-");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("IOError"));
    Ok(())
}

#[test]
fn test_malformed_limit() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;

    cmd.arg("./tests/data/formulas.txt").args(["-l", "abc"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid float literal"));
    Ok(())
}

#[test]
fn test_bad_isotope_table() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;

    cmd.arg("./tests/data/formulas.txt")
        .args(["-i", "./tests/data/bad_isotopes.dat"]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("formula:").not())
        .stderr(predicate::str::contains("UnorderedIsotopes"));
    Ok(())
}

#[test]
fn test_infinite_isotope_mass() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;

    cmd.arg("./tests/data/formulas.txt")
        .args(["-i", "./tests/data/infinite_isotopes.dat"]);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("formula:").not())
        .stderr(predicate::str::contains("InvalidMass"));
    Ok(())
}

#[test]
fn test_run_batch() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;
    cmd.env("RUST_LOG", "info");
    cmd.arg("./tests/data/formulas.txt").args(["-o", "-", "-t", "3"]);
    let result = cmd.assert().success();
    result
        .stdout(predicate::str::contains(
            "formula: H2O charge : 0 limit: 1.000000e-10\n18.010565 100.000000\n",
        ))
        .stdout(predicate::str::contains("formula: C6H12O6 charge : 1"))
        .stdout(predicate::str::contains("formula: (H2O").not())
        .stderr(predicate::str::contains("Expected right parenthesis"))
        .stderr(predicate::str::contains("Formulas: 5"))
        .stderr(predicate::str::contains("Failures: 1"));
    Ok(())
}

#[test]
fn test_output_order() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;
    cmd.arg("./tests/data/formulas.txt").args(["-t", "4"]);
    let output = cmd.output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    let headers: Vec<&str> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("formula: "))
        .filter_map(|line| line.split_once(' ').map(|(formula, _)| formula))
        .collect();
    assert_eq!(
        headers,
        vec![
            "H2O",
            "C6H12O6",
            "CH3[13C]OOH",
            "C254H377N65O75S6",
            "Fe2S2"
        ]
    );
    Ok(())
}

#[test]
fn test_stdin_json() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzisotoper")?;
    cmd.args(["-", "-f", "json", "-d", "3"])
        .write_stdin("H2O,1\nXx\n");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""formula":"H2O","charge":1"#))
        .stderr(predicate::str::contains("'Xx' is not an element"));
    Ok(())
}

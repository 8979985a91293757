//! Loading retina experiment descriptions

use std::path::Path;

use retina_runtime::RetinaScript;

use crate::error::{CliError, CliResult};

/// Load an experiment description from a TOML file
pub fn load_script(path: &Path) -> CliResult<RetinaScript> {
    if !path.exists() {
        return Err(CliError::script(format!(
            "Script not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    parse_script(&content)
        .map_err(|e| CliError::script(format!("Invalid script {}: {}", path.display(), e)))
}

/// Parse an experiment description
pub fn parse_script(content: &str) -> CliResult<RetinaScript> {
    Ok(toml::from_str(content)?)
}

/// Apply command-line overrides to the simulation section
pub fn apply_overrides(
    script: &mut RetinaScript,
    trials: Option<usize>,
    seed: Option<u64>,
    perf: bool,
) -> CliResult<()> {
    if let Some(trials) = trials {
        if trials == 0 {
            return Err(CliError::invalid_args("--trials must be at least 1"));
        }
        script.simulation.num_trials = trials;
    }
    if let Some(seed) = seed {
        script.simulation.seed = Some(seed);
    }
    if perf {
        script.simulation.perf_enabled = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [simulation]
        duration_ms = 10.0
        columns = 2
        rows = 2

        [input]
        kind = "impulse"
        start = 0
        stop = 5
        amplitude = 1

        [[modules]]
        type = "LinearFilter"
        name = "tmp"
        params = { tau = 2 }

        [[connections]]
        from = ["Input"]
        to = "tmp"
    "#;

    #[test]
    fn test_parse_and_override() {
        let mut script = parse_script(MINIMAL).unwrap();
        assert_eq!(script.simulation.num_trials, 1);
        apply_overrides(&mut script, Some(3), Some(9), true).unwrap();
        assert_eq!(script.simulation.num_trials, 3);
        assert_eq!(script.simulation.seed, Some(9));
        assert!(script.simulation.perf_enabled);
        assert!(apply_overrides(&mut script, Some(0), None, false).is_err());
    }

    #[test]
    fn test_missing_and_invalid_scripts() {
        assert!(load_script(Path::new("/definitely/not/here.toml")).is_err());
        assert!(matches!(parse_script("[input]\nkind = \"flash\""), Err(CliError::Malformed(_))));
    }
}

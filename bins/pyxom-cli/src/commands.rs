// CLI commands for grading submissions locally
use anyhow::{anyhow, bail, Context, Result};
use pyxom_common::config::{Config, SandboxBackend};
use pyxom_common::types::AttemptResult;
use pyxom_engine::{ExerciseSpec, PoolConfig, SecurityValidator, WorkerPool};
use serde::Deserialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct ExercisesJson {
    exercises: Vec<ExerciseSpec>,
}

/// Environment configuration with an optional backend override
pub fn load_config(backend: Option<&str>) -> Result<Config> {
    let mut config = Config::from_env();
    if let Some(name) = backend {
        config.backend = SandboxBackend::from_str(name)
            .ok_or_else(|| anyhow!("Unknown backend '{}' (expected process or docker)", name))?;
    }
    Ok(config)
}

/// Load one exercise from a single-exercise file or from a catalog
pub fn load_exercise(path: &Path, id: Option<&str>) -> Result<ExerciseSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if value.get("exercises").is_none() {
        let exercise: ExerciseSpec =
            serde_json::from_value(value).context("Invalid exercise definition")?;
        if let Some(wanted) = id {
            if exercise.id != wanted {
                bail!("File defines exercise '{}', not '{}'", exercise.id, wanted);
            }
        }
        return Ok(exercise);
    }

    let catalog: ExercisesJson = serde_json::from_value(value).context("Invalid exercise catalog")?;
    match id {
        Some(wanted) => catalog
            .exercises
            .into_iter()
            .find(|e| e.id == wanted)
            .ok_or_else(|| anyhow!("Exercise '{}' not found in {}", wanted, path.display())),
        None => {
            let mut exercises = catalog.exercises;
            if exercises.len() == 1 {
                return Ok(exercises.remove(0));
            }
            let ids: Vec<_> = exercises.iter().map(|e| e.id.as_str()).collect();
            bail!("Catalog has {} exercises, pick one with --id: {}", ids.len(), ids.join(", "))
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Grade `code` and print the report. Returns whether the attempt passed.
pub async fn grade(
    config: &Config,
    exercise_path: &Path,
    id: Option<&str>,
    code_path: &Path,
    request_hints: bool,
    json: bool,
) -> Result<bool> {
    let exercise = load_exercise(exercise_path, id)?;
    let code = read_source(code_path)?;

    if !json {
        println!("🧪 Grading {} against '{}' ({} backend)...", code_path.display(), exercise.id, config.backend);
    }

    let runner = pyxom_engine::build_runner(config)?;
    let outcome = runner.grade(&code, &exercise, request_hints).await;
    runner.pool().shutdown().await;
    let attempt = outcome.context("Grading failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&attempt.redacted())?);
    } else {
        print!("{}", format_report(&attempt.redacted()));
    }

    Ok(attempt.overall_passed)
}

/// Run only the security gate. Returns whether the code was accepted.
pub fn validate(code_path: &Path) -> Result<bool> {
    let code = read_source(code_path)?;
    match SecurityValidator::default().validate(&code) {
        Ok(()) => {
            println!("✅ {} passed the security gate", code_path.display());
            Ok(true)
        }
        Err(violation) => {
            println!("❌ {}", violation);
            Ok(false)
        }
    }
}

/// Execute once on a single-executor pool and print the raw streams
pub async fn run(config: &Config, code_path: &Path, stdin_path: Option<&Path>, timeout_ms: Option<u64>) -> Result<()> {
    let code = read_source(code_path)?;
    let stdin = match stdin_path {
        Some(path) => read_source(path)?,
        None => String::new(),
    };

    if let Err(violation) = SecurityValidator::default().validate(&code) {
        bail!("{}", violation);
    }

    let timeout_ms = config.clamp_timeout(timeout_ms.unwrap_or(config.default_timeout_ms));
    let factory = pyxom_engine::build_factory(config)?;
    let pool = WorkerPool::new(
        PoolConfig {
            size: 1,
            ..PoolConfig::from_config(config)
        },
        factory,
    );

    let outcome = pool.submit(code, stdin, timeout_ms).await;
    pool.shutdown().await;

    match outcome {
        Ok(output) => {
            print!("{}", output.stdout);
            if !output.stderr.is_empty() {
                eprint!("{}", output.stderr);
            }
            if let Some(value) = output.return_value {
                println!("\n↩️  {}", value);
            }
            eprintln!("⏱️  {} ms", output.duration_ms);
            Ok(())
        }
        Err(e) => {
            if let Some((stdout, stderr)) = e.partial_output() {
                print!("{}", stdout);
                eprint!("{}", stderr);
            }
            bail!("{}", e)
        }
    }
}

/// Human-readable attempt report
pub fn format_report(attempt: &AttemptResult) -> String {
    let mut out = String::new();

    if let Some(rejection) = &attempt.rejection {
        let _ = writeln!(out, "⛔ Rejected: {}", rejection.message);
    }

    if !attempt.test_run_results.is_empty() {
        let _ = writeln!(out, "\n📋 Tests:\n");
        let _ = writeln!(out, "{:<4} {:<24} {:<8} {:<8} {:<10}", "#", "NAME", "RESULT", "POINTS", "TIME");
        let _ = writeln!(out, "{}", "─".repeat(60));
        for (idx, run) in attempt.test_run_results.iter().enumerate() {
            let name = run.test_case.name.clone().unwrap_or_else(|| format!("test {}", idx + 1));
            let verdict = if run.passed { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "{:<4} {:<24} {:<8} {:<8} {} ms",
                idx + 1,
                name,
                verdict,
                format!("{}/{}", run.points_earned, run.test_case.weight()),
                run.duration_ms
            );
            if let Some(error) = &run.error {
                let _ = writeln!(out, "     ↳ {}", error);
            } else if !run.passed {
                let _ = writeln!(out, "     ↳ expected {:?}, got {:?}", run.test_case.expected, run.normalized_actual_output);
            }
        }
    }

    if !attempt.static_check_run_results.is_empty() {
        let _ = writeln!(out, "\n🔍 Static checks:\n");
        for check in &attempt.static_check_run_results {
            let mark = if check.passed { "✅" } else { "❌" };
            let _ = writeln!(out, "  {} {} ({}/{})", mark, check.check.description, check.points_earned, check.check.points);
            if let Some(message) = check.message.as_ref().or(check.error.as_ref()) {
                let _ = writeln!(out, "     ↳ {}", message);
            }
        }
    }

    if !attempt.triggered_hints.is_empty() {
        let _ = writeln!(out, "\n💡 Hints:");
        for hint in &attempt.triggered_hints {
            let _ = writeln!(out, "  - {}", hint.text);
        }
    }

    if !attempt.triggered_pitfalls.is_empty() {
        let _ = writeln!(out, "\n⚠️  Common pitfalls:");
        for pitfall in &attempt.triggered_pitfalls {
            let _ = writeln!(out, "  - {}", pitfall.text);
        }
    }

    for explanation in &attempt.error_explanations {
        let _ = writeln!(out, "\n📘 {} ({}): {}", explanation.title, explanation.kind, explanation.explanation);
        for suggestion in &explanation.suggestions {
            let _ = writeln!(out, "  - {}", suggestion);
        }
    }

    let mark = if attempt.overall_passed { "✅" } else { "❌" };
    let _ = writeln!(
        out,
        "\n{} {}/{} tests, {}/{} checks, {}/{} points in {} ms",
        mark,
        attempt.tests_passed_count,
        attempt.total_tests,
        attempt.static_checks_passed_count,
        attempt.total_static_checks,
        attempt.total_points_earned,
        attempt.max_possible_points,
        attempt.duration_ms
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyxom_common::types::{ErrorExplanation, Hint, SingleTestRunResult, TestCase};
    use std::path::PathBuf;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("pyxom-cli-{}-{}", std::process::id(), name));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_config_backend_override() {
        assert_eq!(load_config(Some("docker")).unwrap().backend, SandboxBackend::Docker);
        assert_eq!(load_config(Some("process")).unwrap().backend, SandboxBackend::Process);
        assert!(load_config(Some("wasm")).is_err());
    }

    #[test]
    fn test_load_single_exercise() {
        let path = write_temp("single.json", r#"{ "id": "solo", "tests": [ { "input": "", "expected": "hi" } ] }"#);
        let exercise = load_exercise(&path, None).unwrap();
        assert_eq!(exercise.id, "solo");
        assert!(load_exercise(&path, Some("other")).is_err());
    }

    #[test]
    fn test_load_from_catalog() {
        let path = write_temp(
            "catalog.json",
            r#"{ "exercises": [ { "id": "a", "tests": [] }, { "id": "b", "tests": [] } ] }"#,
        );
        assert_eq!(load_exercise(&path, Some("b")).unwrap().id, "b");
        assert!(load_exercise(&path, None).is_err());
        assert!(load_exercise(&path, Some("c")).is_err());
    }

    #[test]
    fn test_bundled_catalog_loads() {
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/exercises.json"));
        let exercise = load_exercise(path, Some("ej01_suma_producto")).unwrap();
        assert_eq!(exercise.max_possible_points(), 16);
    }

    #[test]
    fn test_format_report() {
        let attempt = AttemptResult {
            timestamp: 0,
            overall_passed: false,
            test_run_results: vec![SingleTestRunResult {
                test_case: TestCase::new("5\n3", "Suma: 8").named("Test Básico").with_points(5),
                actual_output: "Suma: 53\n".into(),
                normalized_actual_output: "Suma: 53".into(),
                passed: false,
                duration_ms: 12,
                error: Some("TypeError: can't multiply sequence by non-int of type 'str'".into()),
                error_kind: Some("TypeError".into()),
                points_earned: 0,
            }],
            static_check_run_results: vec![],
            total_tests: 1,
            tests_passed_count: 0,
            total_static_checks: 0,
            static_checks_passed_count: 0,
            duration_ms: 40,
            total_points_earned: 0,
            max_possible_points: 5,
            triggered_hints: vec![Hint {
                id: "h1".into(),
                text: "Usa int()".into(),
                condition: None,
                cost: None,
            }],
            triggered_pitfalls: vec![],
            error_explanations: vec![ErrorExplanation {
                kind: "TypeError".into(),
                title: "Error de Tipo de Datos".into(),
                explanation: "Operación no válida para el tipo".into(),
                suggestions: vec!["Usa int() o str() para convertir entre tipos".into()],
            }],
            rejection: None,
        };

        let report = format_report(&attempt);
        assert!(report.contains("Test Básico"));
        assert!(report.contains("0/5"));
        assert!(report.contains("TypeError: can't multiply"));
        assert!(report.contains("Usa int()"));
        assert!(report.contains("0/1 tests"));
        assert!(report.contains("Error de Tipo de Datos (TypeError)"));
        assert!(report.contains("Usa int() o str()"));
    }
}

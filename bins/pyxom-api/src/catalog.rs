// Exercise catalog loaded from config/exercises.json

use anyhow::{Context, Result};
use pyxom_engine::ExerciseSpec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct ExercisesJson {
    #[serde(default)]
    pub exercises: Vec<ExerciseSpec>,
}

/// Listing entry; never carries test data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSummary {
    pub id: String,
    pub title: String,
    pub total_tests: usize,
    pub total_static_checks: usize,
    pub max_possible_points: u64,
}

#[derive(Debug, Default)]
pub struct Catalog {
    exercises: Vec<ExerciseSpec>,
}

impl Catalog {
    /// Load the catalog. A missing file yields an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Exercise catalog not found, starting empty");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let parsed: ExercisesJson = serde_json::from_str(content)?;

        let mut exercises: Vec<ExerciseSpec> = Vec::with_capacity(parsed.exercises.len());
        for exercise in parsed.exercises {
            if exercises.iter().any(|e| e.id == exercise.id) {
                anyhow::bail!("Duplicate exercise id '{}'", exercise.id);
            }
            if let Some(declared) = exercise.max_points {
                let computed = exercise.max_possible_points();
                if declared != computed {
                    warn!(
                        exercise_id = %exercise.id,
                        declared = declared,
                        computed = computed,
                        "Declared maxPoints differs from test and check points"
                    );
                }
            }
            info!(exercise_id = %exercise.id, tests = exercise.tests.len(), "Exercise registered");
            exercises.push(exercise);
        }

        Ok(Self { exercises })
    }

    pub fn get(&self, id: &str) -> Option<&ExerciseSpec> {
        self.exercises.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn summaries(&self) -> Vec<ExerciseSummary> {
        self.exercises
            .iter()
            .map(|e| ExerciseSummary {
                id: e.id.clone(),
                title: e.title.clone(),
                total_tests: e.tests.len(),
                total_static_checks: e.static_code_checks.len(),
                max_possible_points: e.max_possible_points(),
            })
            .collect()
    }
}

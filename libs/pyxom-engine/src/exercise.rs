use crate::static_checks::StaticCodeCheck;
use pyxom_common::types::{CommonPitfall, Hint, TestCase};
use serde::{Deserialize, Serialize};

/// Everything needed to grade one exercise
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSpec {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub static_code_checks: Vec<StaticCodeCheck>,
    #[serde(default)]
    pub hints: Vec<Hint>,
    #[serde(default)]
    pub common_pitfalls: Vec<CommonPitfall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timeout_ms: Option<u64>,
    /// Informational; the graded maximum is always derived from tests and checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hints_to_show_automatically: Option<usize>,
}

impl ExerciseSpec {
    pub fn new(id: impl Into<String>, tests: Vec<TestCase>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            tests,
            static_code_checks: Vec::new(),
            hints: Vec::new(),
            common_pitfalls: Vec::new(),
            global_timeout_ms: None,
            max_points: None,
            max_hints_to_show_automatically: None,
        }
    }

    /// Sum of every test and static check weight
    pub fn max_possible_points(&self) -> u64 {
        max_possible_points(&self.tests, &self.static_code_checks)
    }
}

/// Total weight of `tests` and `checks`, widened so it cannot overflow
pub fn max_possible_points(tests: &[TestCase], checks: &[StaticCodeCheck]) -> u64 {
    let test_points: u64 = tests.iter().map(|t| u64::from(t.weight())).sum();
    let check_points: u64 = checks.iter().map(|c| u64::from(c.weight())).sum();
    test_points + check_points
}

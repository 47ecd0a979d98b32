/// Static Code Checks
///
/// **Responsibility:**
/// Grade properties of the source itself (no `eval`, must define `factorial`,
/// must be recursive, ...) without running it.
///
/// Declarative rules are serializable so exercises can be authored as JSON.
/// `CheckRule::Custom` carries an arbitrary predicate for exercises built in code.
/// A predicate that panics is recorded as a failed check with `error` set.

use crate::lexer::{block_extent, Token, TokenKind};
use pyxom_common::types::{StaticCheckRunResult, StaticCheckSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Outcome of a single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckVerdict {
    Pass,
    Fail,
    /// Failure with a message that overrides the authored `failureMessage`
    FailWith(String),
}

type CheckFn = dyn Fn(&str, &[Token<'_>]) -> CheckVerdict + Send + Sync;

/// Predicate over `(source, tokens)`
#[derive(Clone)]
pub struct CustomCheck(Arc<CheckFn>);

impl CustomCheck {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&str, &[Token<'_>]) -> CheckVerdict + Send + Sync + 'static,
    {
        CustomCheck(Arc::new(check))
    }
}

impl fmt::Debug for CustomCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomCheck(..)")
    }
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CheckRule {
    /// `name(...)` must not appear, bare or as a method
    ForbidCall { name: String },
    #[serde(rename_all = "camelCase")]
    RequireCall {
        name: String,
        #[serde(default = "one")]
        min_count: usize,
    },
    RequireKeyword { keyword: String },
    ForbidKeyword { keyword: String },
    DefinesFunction { name: String },
    /// `function` is defined and calls itself from its own body
    RequiresRecursion { function: String },
    #[serde(skip)]
    Custom(CustomCheck),
}

impl CheckRule {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&str, &[Token<'_>]) -> CheckVerdict + Send + Sync + 'static,
    {
        CheckRule::Custom(CustomCheck::new(check))
    }

    fn evaluate(&self, code: &str, tokens: &[Token<'_>]) -> CheckVerdict {
        let verdict = |ok: bool| if ok { CheckVerdict::Pass } else { CheckVerdict::Fail };
        match self {
            CheckRule::ForbidCall { name } => verdict(count_calls(tokens, name) == 0),
            CheckRule::RequireCall { name, min_count } => verdict(count_calls(tokens, name) >= *min_count),
            CheckRule::RequireKeyword { keyword } => verdict(tokens.iter().any(|t| t.is_name(keyword))),
            CheckRule::ForbidKeyword { keyword } => verdict(!tokens.iter().any(|t| t.is_name(keyword))),
            CheckRule::DefinesFunction { name } => verdict(find_def(tokens, name).is_some()),
            CheckRule::RequiresRecursion { function } => {
                let recursive = find_def(tokens, function).map_or(false, |def_idx| {
                    let body = block_extent(tokens, def_idx);
                    count_calls(&tokens[body], function) > 0
                });
                verdict(recursive)
            }
            CheckRule::Custom(check) => (check.0)(code, tokens),
        }
    }

    /// Failure text used when the author gave none
    fn default_failure(&self) -> String {
        match self {
            CheckRule::ForbidCall { name } => format!("Calling {}() is not allowed in this exercise", name),
            CheckRule::RequireCall { name, min_count } if *min_count > 1 => {
                format!("Expected at least {} calls to {}()", min_count, name)
            }
            CheckRule::RequireCall { name, .. } => format!("Expected a call to {}()", name),
            CheckRule::RequireKeyword { keyword } => format!("Expected the solution to use '{}'", keyword),
            CheckRule::ForbidKeyword { keyword } => format!("'{}' is not allowed in this exercise", keyword),
            CheckRule::DefinesFunction { name } => format!("Expected a function named '{}'", name),
            CheckRule::RequiresRecursion { function } => {
                format!("Expected '{}' to call itself recursively", function)
            }
            CheckRule::Custom(_) => "Static check failed".to_string(),
        }
    }
}

fn count_calls(tokens: &[Token<'_>], name: &str) -> usize {
    tokens
        .windows(2)
        .filter(|pair| pair[0].is_name(name) && pair[1].is_op("("))
        .count()
}

fn find_def(tokens: &[Token<'_>], name: &str) -> Option<usize> {
    tokens
        .windows(2)
        .position(|pair| pair[0].is_name("def") && pair[1].kind == TokenKind::Name && pair[1].text == name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCodeCheck {
    pub id: String,
    pub description: String,
    pub rule: CheckRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl StaticCodeCheck {
    pub fn new(id: impl Into<String>, description: impl Into<String>, rule: CheckRule) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            rule,
            points: None,
            success_message: None,
            failure_message: None,
        }
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    /// Points awarded on pass (checks without points are ungraded)
    pub fn weight(&self) -> u32 {
        self.points.unwrap_or(0)
    }

    pub fn summary(&self) -> StaticCheckSummary {
        StaticCheckSummary {
            id: self.id.clone(),
            description: self.description.clone(),
            points: self.weight(),
        }
    }

    /// Run this check against already tokenized source
    pub fn run(&self, code: &str, tokens: &[Token<'_>]) -> StaticCheckRunResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.rule.evaluate(code, tokens)));

        let (passed, message, error) = match outcome {
            Ok(CheckVerdict::Pass) => (true, self.success_message.clone(), None),
            Ok(CheckVerdict::Fail) => (
                false,
                Some(self.failure_message.clone().unwrap_or_else(|| self.rule.default_failure())),
                None,
            ),
            Ok(CheckVerdict::FailWith(message)) => (false, Some(message), None),
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(check_id = %self.id, error = %detail, "Static check panicked");
                (false, None, Some(format!("Static check '{}' failed to run: {}", self.id, detail)))
            }
        };

        StaticCheckRunResult {
            check: self.summary(),
            passed,
            message,
            error,
            points_earned: if passed { self.weight() } else { 0 },
        }
    }
}

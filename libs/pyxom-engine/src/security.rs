/// Security Validator - Static Gate in Front of the Executors
///
/// **Responsibility:**
/// Reject submissions that use forbidden imports, forbidden builtins,
/// reflection escapes or obvious infinite loops before any executor is touched.
///
/// **Matching Rules:**
/// - Works on the token stream, never on raw substrings
/// - Imports match on the root module and on dotted prefixes (`os.path` hits `os`)
/// - Builtins match only as bare names (`obj.open` is an attribute, not the builtin)
/// - Strings and comments are opaque
///
/// The gate is advisory. Code hidden inside f-string replacement fields is
/// not inspected, and the executor's process or container isolation is the
/// real boundary.

use crate::lexer::{block_extent, starts_statement, tokenize, Token, TokenKind};
use pyxom_common::types::{AttemptRejection, AttemptResult};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Largest accepted submission
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    DeniedImport,
    DeniedBuiltin,
    DeniedAttribute,
    InfiniteLoop,
    SourceTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityViolation {
    pub kind: ViolationKind,
    /// The offending module, name or loop header
    pub construct: String,
    pub line: Option<usize>,
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::DeniedImport => {
                write!(f, "Import '{}' is not allowed for security reasons", self.construct)?
            }
            ViolationKind::DeniedBuiltin => {
                write!(f, "Function '{}' is not allowed for security reasons", self.construct)?
            }
            ViolationKind::DeniedAttribute => {
                write!(f, "Attribute '{}' is not allowed for security reasons", self.construct)?
            }
            ViolationKind::InfiniteLoop => {
                write!(f, "Potential infinite loop detected and blocked: {}", self.construct)?
            }
            ViolationKind::SourceTooLarge => {
                write!(f, "Source code exceeds maximum size: {}", self.construct)?
            }
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for SecurityViolation {}

impl SecurityViolation {
    fn at(kind: ViolationKind, construct: impl Into<String>, token: &Token<'_>) -> Self {
        Self {
            kind,
            construct: construct.into(),
            line: Some(token.line),
        }
    }

    /// Rejection record attached to the attempt result
    pub fn to_rejection(&self) -> AttemptRejection {
        AttemptRejection {
            kind: "SecurityViolation".to_string(),
            construct: self.construct.clone(),
            message: self.to_string(),
            line: self.line,
        }
    }

    /// Failed attempt for a submission that never reached an executor
    pub fn into_attempt(self, timestamp: i64, max_possible_points: u64) -> AttemptResult {
        AttemptResult {
            timestamp,
            overall_passed: false,
            test_run_results: Vec::new(),
            static_check_run_results: Vec::new(),
            total_tests: 0,
            tests_passed_count: 0,
            total_static_checks: 0,
            static_checks_passed_count: 0,
            duration_ms: 0,
            total_points_earned: 0,
            max_possible_points,
            triggered_hints: Vec::new(),
            triggered_pitfalls: Vec::new(),
            error_explanations: Vec::new(),
            rejection: Some(self.to_rejection()),
        }
    }
}

/// What the validator rejects. Plain data so deployments can tighten or
/// relax it without code changes.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub denied_modules: Vec<String>,
    pub denied_builtins: Vec<String>,
    pub denied_attributes: Vec<String>,
    /// Integer literals passed to `range(...)` at or above this are rejected
    pub max_range_literal: u128,
    pub max_source_bytes: usize,
}

const DENIED_MODULES: &[&str] = &[
    // process and OS access
    "os", "sys", "subprocess", "multiprocessing", "threading", "_thread", "signal", "pty",
    "posix", "nt", "resource", "fcntl", "ctypes", "cffi", "mmap",
    // networking
    "socket", "ssl", "select", "selectors", "asyncio", "urllib", "http", "requests", "ftplib",
    "smtplib", "telnetlib", "xmlrpc", "webbrowser",
    // filesystem
    "io", "shutil", "tempfile", "glob", "pathlib", "fileinput", "zipfile", "tarfile",
    // serialization backdoors and stores
    "pickle", "marshal", "shelve", "dbm", "sqlite3",
    // reflection and dynamic code
    "builtins", "importlib", "inspect", "gc", "code", "codeop", "runpy", "types", "sysconfig",
];

const DENIED_BUILTINS: &[&str] = &[
    "eval", "exec", "compile", "__import__", "open", "globals", "locals", "vars", "getattr",
    "setattr", "delattr", "breakpoint",
];

const DENIED_ATTRIBUTES: &[&str] = &[
    "__subclasses__", "__globals__", "__builtins__", "__code__", "__bases__", "__base__",
    "__mro__", "__getattribute__", "__loader__", "__spec__", "__closure__", "__self__",
    "__func__", "f_globals", "f_locals", "f_back", "gi_frame", "tb_frame",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            denied_modules: owned(DENIED_MODULES),
            denied_builtins: owned(DENIED_BUILTINS),
            denied_attributes: owned(DENIED_ATTRIBUTES),
            max_range_literal: 10_000_000,
            max_source_bytes: MAX_SOURCE_CODE_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityValidator {
    modules: HashSet<String>,
    builtins: HashSet<String>,
    attributes: HashSet<String>,
    max_range_literal: u128,
    max_source_bytes: usize,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(SecurityPolicy::default())
    }
}

impl SecurityValidator {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            modules: policy.denied_modules.into_iter().collect(),
            builtins: policy.denied_builtins.into_iter().collect(),
            attributes: policy.denied_attributes.into_iter().collect(),
            max_range_literal: policy.max_range_literal,
            max_source_bytes: policy.max_source_bytes,
        }
    }

    /// Check a submission. Returns the first violation in source order.
    pub fn validate(&self, code: &str) -> Result<(), SecurityViolation> {
        if code.len() > self.max_source_bytes {
            return Err(SecurityViolation {
                kind: ViolationKind::SourceTooLarge,
                construct: format!("{} bytes (limit {})", code.len(), self.max_source_bytes),
                line: None,
            });
        }

        let tokens = tokenize(code);
        let result = self.scan(&tokens);
        if let Err(ref violation) = result {
            debug!(kind = ?violation.kind, construct = %violation.construct, line = ?violation.line, "Submission rejected");
        }
        result
    }

    fn scan(&self, tokens: &[Token<'_>]) -> Result<(), SecurityViolation> {
        for idx in 0..tokens.len() {
            let token = &tokens[idx];
            if token.kind != TokenKind::Name {
                continue;
            }

            match token.text {
                "import" if starts_statement(tokens, idx) => self.check_import(tokens, idx)?,
                "from" if starts_statement(tokens, idx) => self.check_from_import(tokens, idx)?,
                "while" if starts_statement(tokens, idx) => check_while_loop(tokens, idx)?,
                "range" => self.check_range(tokens, idx)?,
                name => {
                    let after_dot = idx > 0 && tokens[idx - 1].is_op(".");
                    if self.attributes.contains(name) {
                        return Err(SecurityViolation::at(ViolationKind::DeniedAttribute, name, token));
                    }
                    if !after_dot && self.builtins.contains(name) {
                        return Err(SecurityViolation::at(ViolationKind::DeniedBuiltin, name, token));
                    }
                }
            }
        }
        Ok(())
    }

    fn denied_module(&self, path: &str) -> Option<String> {
        let mut prefix = String::new();
        for part in path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(part);
            if self.modules.contains(&prefix) {
                return Some(prefix);
            }
        }
        None
    }

    /// `import a.b as c, d`
    fn check_import(&self, tokens: &[Token<'_>], idx: usize) -> Result<(), SecurityViolation> {
        let mut i = idx + 1;
        loop {
            let (path, next) = dotted_name(tokens, i);
            if path.is_empty() {
                return Ok(());
            }
            if let Some(module) = self.denied_module(&path) {
                return Err(SecurityViolation::at(ViolationKind::DeniedImport, module, &tokens[idx]));
            }
            i = next;
            if i < tokens.len() && tokens[i].is_name("as") {
                i += 2;
            }
            if i < tokens.len() && tokens[i].is_op(",") {
                i += 1;
            } else {
                return Ok(());
            }
        }
    }

    /// `from a.b import c`; relative imports are left alone
    fn check_from_import(&self, tokens: &[Token<'_>], idx: usize) -> Result<(), SecurityViolation> {
        if tokens.get(idx + 1).map_or(true, |t| t.is_op(".")) {
            return Ok(());
        }
        let (path, _) = dotted_name(tokens, idx + 1);
        match self.denied_module(&path) {
            Some(module) => Err(SecurityViolation::at(ViolationKind::DeniedImport, module, &tokens[idx])),
            None => Ok(()),
        }
    }

    fn check_range(&self, tokens: &[Token<'_>], idx: usize) -> Result<(), SecurityViolation> {
        let after_dot = idx > 0 && tokens[idx - 1].is_op(".");
        if after_dot || !tokens.get(idx + 1).map_or(false, |t| t.is_op("(")) {
            return Ok(());
        }

        let mut depth = 0usize;
        let mut arg: Vec<&Token<'_>> = Vec::new();
        for token in &tokens[idx + 1..] {
            match token.text {
                "(" | "[" | "{" if token.kind == TokenKind::Op => {
                    depth += 1;
                    if depth == 1 {
                        continue;
                    }
                }
                ")" | "]" | "}" if token.kind == TokenKind::Op => {
                    depth -= 1;
                    if depth == 0 {
                        self.check_range_arg(&arg, &tokens[idx])?;
                        break;
                    }
                }
                "," if depth == 1 && token.kind == TokenKind::Op => {
                    self.check_range_arg(&arg, &tokens[idx])?;
                    arg.clear();
                    continue;
                }
                _ => {}
            }
            arg.push(token);
        }
        Ok(())
    }

    fn check_range_arg(&self, arg: &[&Token<'_>], range: &Token<'_>) -> Result<(), SecurityViolation> {
        let value = match arg {
            [n] => parse_int_literal(n.text),
            [a, op, b] if a.kind == TokenKind::Number && b.kind == TokenKind::Number => {
                let (a, b) = match (parse_int_literal(a.text), parse_int_literal(b.text)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Ok(()),
                };
                match op.text {
                    "*" => Some(a.saturating_mul(b)),
                    "**" => Some(a.saturating_pow(b.min(u32::MAX as u128) as u32)),
                    _ => None,
                }
            }
            _ => None,
        };

        match value {
            Some(v) if v >= self.max_range_literal => {
                let literal: Vec<&str> = arg.iter().map(|t| t.text).collect();
                Err(SecurityViolation::at(
                    ViolationKind::InfiniteLoop,
                    format!("range({})", literal.join(" ")),
                    range,
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Read `a.b.c` starting at `start`; returns the path and the index after it
fn dotted_name(tokens: &[Token<'_>], start: usize) -> (String, usize) {
    let mut path = String::new();
    let mut i = start;
    while i < tokens.len() && tokens[i].kind == TokenKind::Name {
        path.push_str(tokens[i].text);
        i += 1;
        if i + 1 < tokens.len() && tokens[i].is_op(".") && tokens[i + 1].kind == TokenKind::Name {
            path.push('.');
            i += 1;
        } else {
            break;
        }
    }
    (path, i)
}

fn parse_int_literal(text: &str) -> Option<u128> {
    if !text.as_bytes().first().map_or(false, |b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    let lower = digits.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        u128::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = lower.strip_prefix("0o") {
        u128::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u128::from_str_radix(bin, 2).ok()
    } else {
        lower.parse().ok()
    }
}

/// `while True:` / `while 1:` whose own suite never leaves the loop
fn check_while_loop(tokens: &[Token<'_>], idx: usize) -> Result<(), SecurityViolation> {
    let condition = match (tokens.get(idx + 1), tokens.get(idx + 2)) {
        (Some(cond), Some(colon)) if colon.is_op(":") => cond,
        _ => return Ok(()),
    };
    let always_true = condition.is_name("True") || (condition.kind == TokenKind::Number && condition.text == "1");
    if !always_true {
        return Ok(());
    }

    let body = block_extent(tokens, idx);
    let mut nested_loops = Vec::new();
    for i in body.clone() {
        let t = &tokens[i];
        if (t.is_name("while") || t.is_name("for")) && starts_statement(tokens, i) {
            nested_loops.push(block_extent(tokens, i));
        }
    }

    let exits = body.clone().any(|i| {
        let t = &tokens[i];
        let leaves_function = t.is_name("return") || t.is_name("raise");
        let exits_process = (t.is_name("exit") || t.is_name("quit"))
            && tokens.get(i + 1).map_or(false, |n| n.is_op("("));
        let breaks_here = t.is_name("break") && !nested_loops.iter().any(|r| r.contains(&i));
        leaves_function || exits_process || breaks_here
    });

    if exits {
        Ok(())
    } else {
        Err(SecurityViolation::at(
            ViolationKind::InfiniteLoop,
            format!("while {}:", condition.text),
            &tokens[idx],
        ))
    }
}

//! In-memory sandbox for pool and runner tests.
//!
//! The submitted "code" is a tiny script, one command per line, with
//! `$stdin` expanded to the trimmed test input:
//!
//! - `sleep <ms>`          wait before continuing
//! - `print <text>`        append `<text>\n` to stdout
//! - `echo`                append the raw stdin to stdout
//! - `raise <Kind>: <msg>` fail with a runtime error, keeping stdout so far
//! - `crash`               fail with an infrastructure error
//! - `hang`                never finish

use super::{ExecutionOutput, ExecutionRequest, Sandbox, SandboxFactory};
use crate::error::ExecutionError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ScriptStats {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub terminated: AtomicUsize,
    pub executed: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Task ids in the order executions began
    pub order: Mutex<Vec<String>>,
}

impl ScriptStats {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

/// Decrements the in-flight counter even when the execution future is dropped
struct InFlight<'a>(&'a ScriptStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a ScriptStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default, Clone)]
pub struct ScriptedFactory {
    pub stats: Arc<ScriptStats>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SandboxFactory for ScriptedFactory {
    fn create(&self, executor_id: usize) -> Box<dyn Sandbox> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedSandbox {
            executor_id,
            running: false,
            stats: self.stats.clone(),
        })
    }

    fn backend(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedSandbox {
    executor_id: usize,
    running: bool,
    stats: Arc<ScriptStats>,
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn start(&mut self) -> Result<(), ExecutionError> {
        if !self.running {
            self.running = true;
            self.stats.started.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn execute(&mut self, request: &ExecutionRequest) -> Result<ExecutionOutput, ExecutionError> {
        assert!(self.running, "executor {} used before start", self.executor_id);
        let _guard = InFlight::enter(&self.stats);
        self.stats.order.lock().unwrap().push(request.task_id.clone());
        self.stats.executed.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let stdin = request.stdin.trim();
        let mut stdout = String::new();

        for raw in request.code.lines() {
            let line = raw.replace("$stdin", stdin);
            let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            match command {
                "sleep" => {
                    let ms = arg.trim().parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                "print" => {
                    stdout.push_str(arg);
                    stdout.push('\n');
                }
                "echo" => stdout.push_str(&request.stdin),
                "raise" => {
                    return Err(ExecutionError::Runtime {
                        message: arg.to_string(),
                        stdout,
                        stderr: format!("Traceback (most recent call last):\n{}\n", arg),
                    })
                }
                "crash" => return Err(ExecutionError::Infrastructure("executor crashed".to_string())),
                "hang" => std::future::pending::<()>().await,
                _ => {}
            }
        }

        Ok(ExecutionOutput {
            stdout,
            stderr: String::new(),
            return_value: None,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn ping(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn terminate(&mut self) {
        if self.running {
            self.running = false;
            self.stats.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }
}

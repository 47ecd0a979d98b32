//! Sandboxed grading engine for Python exercise submissions.
//!
//! A submission flows through the security gate, the static checks, the
//! worker pool and the evaluator, and comes back as one `AttemptResult`
//! with hints and pitfalls attached.

pub mod error;
pub mod evaluator;
pub mod exercise;
pub mod feedback;
pub mod lexer;
pub mod pool;
pub mod runner;
pub mod sandbox;
pub mod security;
pub mod static_checks;

pub use error::{ExecutionError, GradingError};
pub use exercise::ExerciseSpec;
pub use pool::{PoolConfig, PoolStatus, WorkerPool};
pub use runner::{RunnerConfig, TestRunner};
pub use security::{SecurityPolicy, SecurityValidator, SecurityViolation};
pub use static_checks::{CheckRule, CheckVerdict, StaticCodeCheck};

use anyhow::Result;
use pyxom_common::config::{Config, SandboxBackend};
use sandbox::docker::{DockerLimits, DockerSandboxFactory};
use sandbox::process::ProcessSandboxFactory;
use sandbox::SandboxFactory;
use std::sync::Arc;

/// Sandbox factory for the configured backend
pub fn build_factory(config: &Config) -> Result<Arc<dyn SandboxFactory>> {
    let factory: Arc<dyn SandboxFactory> = match config.backend {
        SandboxBackend::Process => Arc::new(ProcessSandboxFactory::new(config.python_path.clone())),
        SandboxBackend::Docker => Arc::new(DockerSandboxFactory::new(DockerLimits {
            image: config.sandbox_image.clone(),
            memory_mb: config.sandbox_memory_mb,
            cpu_limit: config.sandbox_cpu_limit,
        })?),
    };
    Ok(factory)
}

/// Pool and runner wired from one configuration. Must be called inside a Tokio runtime.
pub fn build_runner(config: &Config) -> Result<TestRunner> {
    let factory = build_factory(config)?;
    let pool = WorkerPool::new(PoolConfig::from_config(config), factory);
    Ok(TestRunner::new(pool, RunnerConfig::from_config(config)))
}

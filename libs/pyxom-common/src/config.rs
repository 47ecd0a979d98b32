use std::env;
use std::fmt;

/// Which executor implementation backs the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxBackend {
    /// Long-lived local `python3` harness processes
    Process,
    /// Long-lived network-disabled Docker containers
    Docker,
}

impl SandboxBackend {
    /// Parse a backend from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<SandboxBackend> {
        match s.to_lowercase().as_str() {
            "process" | "local" => Some(SandboxBackend::Process),
            "docker" => Some(SandboxBackend::Docker),
            _ => None,
        }
    }
}

impl fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxBackend::Process => write!(f, "process"),
            SandboxBackend::Docker => write!(f, "docker"),
        }
    }
}

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub pool_size: usize,
    pub pool_idle_timeout_ms: u64,
    pub pool_reap_interval_ms: u64,
    pub pool_max_queue: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_hints_auto: usize,
    pub backend: SandboxBackend,
    pub python_path: String,
    pub sandbox_image: String,
    pub sandbox_memory_mb: u32,
    pub sandbox_cpu_limit: f32,
    pub bind_addr: String,
    pub exercises_path: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            pool_size: env_or("POOL_SIZE", 3usize).max(1),
            pool_idle_timeout_ms: env_or("POOL_IDLE_TIMEOUT_MS", 300_000),
            pool_reap_interval_ms: env_or("POOL_REAP_INTERVAL_MS", 60_000),
            pool_max_queue: env_or("POOL_MAX_QUEUE", 256),
            default_timeout_ms: env_or("DEFAULT_TIMEOUT_MS", 10_000),
            max_timeout_ms: env_or("MAX_TIMEOUT_MS", 30_000),
            max_hints_auto: env_or("MAX_HINTS_AUTO", 3),
            backend: env::var("SANDBOX_BACKEND")
                .ok()
                .and_then(|v| SandboxBackend::from_str(&v))
                .unwrap_or(SandboxBackend::Process),
            python_path: env::var("PYTHON_PATH").unwrap_or_else(|_| "python3".to_string()),
            sandbox_image: env::var("SANDBOX_IMAGE")
                .unwrap_or_else(|_| "python:3.12-slim".to_string()),
            sandbox_memory_mb: env_or("SANDBOX_MEMORY_MB", 256),
            sandbox_cpu_limit: env_or("SANDBOX_CPU_LIMIT", 0.5),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            exercises_path: env::var("EXERCISES_PATH")
                .unwrap_or_else(|_| "config/exercises.json".to_string()),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    /// Clamp a requested per-test timeout into `1..=max_timeout_ms`
    pub fn clamp_timeout(&self, timeout_ms: u64) -> u64 {
        timeout_ms.clamp(1, self.max_timeout_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

pub mod types;
pub mod protocol;
pub mod config;

// Re-export commonly used types for convenience
pub use types::{AttemptResult, CommonPitfall, FeedbackCondition, Hint, TestCase};
pub use config::Config;

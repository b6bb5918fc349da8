//! Hearth Shell - External tool execution
//!
//! Every other Hearth component reaches the operating system through this
//! crate:
//! - `CommandRunner` runs a tool with a timeout and captures its output
//! - Outcome classifiers turn human-readable tool output into results
//! - `Platform` selects the tool set for the host

pub mod outcome;
pub mod platform;
pub mod runner;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use outcome::{Outcome, OutcomeClassifier, PatternClassifier};
pub use platform::Platform;
pub use runner::{
    CommandOutput, CommandRunner, Result, SharedRunner, ShellError, SystemCommandRunner,
};

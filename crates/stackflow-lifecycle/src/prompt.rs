//! Human confirmation channel

use crate::error::{LifecycleError, Result};

/// Yes/no and free-text questions put to the operator
pub trait Prompter: Send + Sync {
    /// Ask a yes/no question; `default` is used on empty input
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;

    /// Pick one of `choices`; returns the chosen entry
    fn select(&self, question: &str, choices: &[String]) -> Result<String>;
}

/// Answers every question with its default (or yes) without asking.
///
/// Used when the operator bypassed confirmations explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, _question: &str, _default: bool) -> Result<bool> {
        Ok(true)
    }

    fn select(&self, question: &str, _choices: &[String]) -> Result<String> {
        Err(LifecycleError::InvalidInput(format!(
            "cannot answer \"{}\" non-interactively, pass the value explicitly",
            question
        )))
    }
}

/// Ask and turn a "no" into [`LifecycleError::UserAborted`]
pub fn require(prompter: &dyn Prompter, question: &str) -> Result<()> {
    if prompter.confirm(question, false)? {
        Ok(())
    } else {
        Err(LifecycleError::UserAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    impl Prompter for Never {
        fn confirm(&self, _question: &str, _default: bool) -> Result<bool> {
            Ok(false)
        }

        fn select(&self, _question: &str, _choices: &[String]) -> Result<String> {
            Err(LifecycleError::UserAborted)
        }
    }

    #[test]
    fn test_require_declined_aborts() {
        let err = require(&Never, "proceed?").unwrap_err();
        assert!(err.is_user_aborted());
        assert!(require(&AssumeYes, "proceed?").is_ok());
    }

    #[test]
    fn test_assume_yes_cannot_select() {
        let err = AssumeYes
            .select("pick a release", &["v1".to_string()])
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));
    }
}

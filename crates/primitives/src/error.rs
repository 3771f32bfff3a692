//! Primitive-level error type.

use thiserror::Error;

/// Errors returned by a primitive's output-computation or resource hooks.
///
/// The engine treats every variant as fatal to the current run; the
/// variant only shapes the message reported with the offending node.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BehaviorError {
    /// A bound input was missing or had an unusable shape.
    #[error("invalid input '{parameter}': {message}")]
    InvalidInput { parameter: String, message: String },

    /// The hook was asked for an output the primitive does not declare.
    #[error("unknown output parameter '{0}'")]
    UnknownOutput(String),

    /// The hook itself failed.
    #[error("output computation failed: {0}")]
    Compute(String),
}

impl BehaviorError {
    pub fn invalid_input(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

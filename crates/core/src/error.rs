use httpcase_template::TemplateError;
use thiserror::Error;

/// Any error that can occur while resolving a test document. Errors are
/// never recovered inside the core; they propagate to the public entry point
/// and the caller decides whether to abort the run or skip the affected
/// case.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Template preparation, resolution, or evaluation failed
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Malformed validator or parameter specification
    #[error("invalid params: {message}")]
    Params { message: String },
}

impl ParseError {
    /// Create a [ParseError::Params] from any message
    pub fn params(message: impl ToString) -> Self {
        Self::Params {
            message: message.to_string(),
        }
    }
}

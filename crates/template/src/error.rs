use thiserror::Error;

/// Any error that can occur while preparing, resolving, or evaluating
/// template content.
///
/// The error always holds owned data so it can be detached from the lifetime
/// of the source document. This requires a mild amount of cloning in error
/// cases, but those should be infrequent so it's fine.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Malformed arguments: wrong arity for a reserved helper, an argument
    /// that failed to convert to the type a function expects, or leftover
    /// arguments a function didn't consume
    #[error("invalid arguments: {message}")]
    Params { message: String },

    /// A referenced variable is not in the known set at preparation time, or
    /// not in the concrete mapping at evaluation time
    #[error("variable `{name}` is not found")]
    VariableNotFound { name: String },

    /// No function registered under this name
    #[error("function `{name}` is not found")]
    FunctionNotFound { name: String },

    /// A group of variables reference each other in a loop, so no resolution
    /// order exists for them
    #[error("circular reference between variables: {}", names.join(" -> "))]
    CircularReference { names: Vec<String> },

    /// A function call failed. The underlying error comes from the callable
    /// itself, so it's boxed to stay agnostic of the implementor's error type
    #[error("error calling function `{name}`")]
    Function {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl TemplateError {
    /// Create a [TemplateError::Params] from any message
    pub fn params(message: impl ToString) -> Self {
        Self::Params {
            message: message.to_string(),
        }
    }

    /// Create a [TemplateError::Function] wrapping another error
    pub fn function(
        name: impl Into<String>,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Function {
            name: name.into(),
            source: error.into(),
        }
    }
}

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DiscError {
    #[error("syntax error in catalog file: {message}")]
    Syntax { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error(
        "{path} would require {needed} sectors but there is only room for {available} sectors ({bytes} bytes)"
    )]
    Capacity {
        path: String,
        needed: u32,
        available: u32,
        bytes: u64,
    },

    #[error("the path table is {size} bytes, larger than one sector; this is not supported")]
    PathTableOverflow { size: usize },

    #[error("{message}")]
    UnsupportedImage { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl DiscError {
    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = DiscError> = std::result::Result<T, E>;

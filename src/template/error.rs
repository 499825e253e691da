//! Template error types

use std::fmt;

/// Errors that can occur during template operations
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
    /// A template failed to compile when it was registered
    Syntax {
        /// Registered template name
        name: String,
        /// Compiler error
        source: minijinja::Error,
    },
    /// No template is registered under the requested name
    Missing(String),
}

impl TemplateError {
    /// Create a missing template error
    pub fn missing(name: &str) -> Self {
        Self::Missing(name.to_string())
    }
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {}", e),
            Self::Syntax { name, source } => {
                write!(f, "template '{}' failed to compile: {}", name, source)
            }
            Self::Missing(name) => write!(f, "no template registered as '{}'", name),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            Self::Syntax { source, .. } => Some(source),
            Self::Missing(_) => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}

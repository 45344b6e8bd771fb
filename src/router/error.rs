use std::fmt;

/// Path pattern compilation error.
///
/// Always fatal at registration time, never surfaced at request time:
/// a route that fails to compile is never added to the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// A `:` marker with no parameter name after it.
    EmptyParamName {
        /// Byte offset of the marker in the pattern string
        offset: usize,
    },
    /// A custom character-class group `(...)` with no closing parenthesis.
    UnterminatedGroup { offset: usize },
    /// A custom group containing its own capture group, which would misalign
    /// capture positions against declared parameter names.
    CaptureInCustomGroup { offset: usize },
    /// A `\` escape at the end of the pattern with nothing to escape.
    DanglingEscape,
    /// The assembled expression was rejected by the regex engine.
    Regex { message: String },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::EmptyParamName { offset } => {
                write!(f, "parameter marker at offset {offset} has no name")
            }
            PatternError::UnterminatedGroup { offset } => {
                write!(f, "unterminated group starting at offset {offset}")
            }
            PatternError::CaptureInCustomGroup { offset } => {
                write!(
                    f,
                    "custom group at offset {offset} must not contain capture groups; \
                     use (?:...) for grouping"
                )
            }
            PatternError::DanglingEscape => write!(f, "dangling escape at end of pattern"),
            PatternError::Regex { message } => write!(f, "invalid pattern expression: {message}"),
        }
    }
}

impl std::error::Error for PatternError {}

/// Router configuration and reverse-URL errors.
///
/// Registration-time variants (`Pattern`, `EmptyMiddleware`, `RedirectTarget`)
/// must stop startup; they are never retried or suppressed.
#[derive(Debug)]
pub enum RouterError {
    /// A route pattern failed to compile.
    Pattern {
        pattern: String,
        source: PatternError,
    },
    /// A route was registered with an empty handler batch. Handler
    /// callability itself is enforced by the type system; an empty batch is
    /// the one invalid-middleware shape still expressible.
    EmptyMiddleware { pattern: String },
    /// No route carries the requested name.
    UnknownRoute { name: String },
    /// A redirect source or destination name could not be resolved to a path.
    RedirectTarget { target: String },
    /// `build_url` was called without a value for a required parameter.
    MissingParam { pattern: String, name: String },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Pattern { pattern, source } => {
                write!(f, "invalid route pattern {pattern:?}: {source}")
            }
            RouterError::EmptyMiddleware { pattern } => {
                write!(f, "route {pattern:?} registered with no handlers")
            }
            RouterError::UnknownRoute { name } => write!(f, "no route named {name:?}"),
            RouterError::RedirectTarget { target } => {
                write!(f, "redirect target {target:?} cannot be resolved to a path")
            }
            RouterError::MissingParam { pattern, name } => {
                write!(f, "missing value for parameter {name:?} of {pattern:?}")
            }
        }
    }
}

impl std::error::Error for RouterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouterError::Pattern { source, .. } => Some(source),
            _ => None,
        }
    }
}

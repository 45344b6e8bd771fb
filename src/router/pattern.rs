//! Path-pattern tokenizer and regex builder.
//!
//! A pattern is a sequence of literal text and parameter tokens. A parameter
//! token is `:name`, optionally constrained by a custom character class
//! (`:id(\d+)`) and optionally followed by a modifier: `?` (optional),
//! `*` (zero or more `/`-joined repeats) or `+` (one or more). A bare `*`
//! segment is a matcher-only wildcard: it widens matching but contributes
//! nothing to reverse URL generation.
//!
//! Compilation produces a regex with exactly one capture group per parameter
//! token, in declaration order, plus the token list needed to regenerate a
//! literal path from concrete parameter values.

use regex::{Regex, RegexBuilder};
use std::sync::Arc;

use super::error::PatternError;

const DEFAULT_PARAM_PATTERN: &str = "[^/]+";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Modifier {
    None,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone)]
pub(crate) struct ParamToken {
    pub name: Arc<str>,
    /// The `/` (or nothing) immediately before the marker; folded into the
    /// optional group so `/users/:id?` also matches `/users`.
    pub prefix: &'static str,
    /// Character class a single occurrence must match.
    pub pattern: String,
    pub modifier: Modifier,
}

#[derive(Debug, Clone)]
pub(crate) enum Token {
    Literal(String),
    Param(ParamToken),
    /// Bare `*`; `slash_prefixed` records whether a `/` preceded it.
    Wildcard { slash_prefixed: bool },
}

/// A compiled pattern: the matching regex plus the reverse-mapping metadata.
#[derive(Debug, Clone)]
pub(crate) struct CompiledPattern {
    pub regex: Regex,
    pub tokens: Vec<Token>,
    /// Parameter names in declaration order; one regex capture group each.
    pub params: Vec<Arc<str>>,
}

/// Compile-time knobs, mirroring the conventional path-matcher options.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PatternOptions {
    /// Anchor the match at the end of the path (full-equality matching).
    /// When false the pattern matches any path extending it on a segment
    /// boundary.
    pub end: bool,
    /// Refuse a trailing slash instead of tolerating it.
    pub strict: bool,
    /// Match case-sensitively.
    pub sensitive: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            end: true,
            strict: false,
            sensitive: false,
        }
    }
}

pub(crate) fn compile(pattern: &str, opts: PatternOptions) -> Result<CompiledPattern, PatternError> {
    let tokens = tokenize(pattern)?;
    let params: Vec<Arc<str>> = tokens
        .iter()
        .filter_map(|t| match t {
            Token::Param(p) => Some(Arc::clone(&p.name)),
            _ => None,
        })
        .collect();
    let regex = to_regex(&tokens, opts)?;
    Ok(CompiledPattern {
        regex,
        tokens,
        params,
    })
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.char_indices().peekable();

    // Move a trailing `/` of the pending literal into the next token's prefix.
    fn take_prefix(literal: &mut String) -> &'static str {
        if literal.ends_with('/') {
            literal.pop();
            "/"
        } else {
            ""
        }
    }

    fn flush(tokens: &mut Vec<Token>, literal: &mut String) {
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(literal)));
        }
    }

    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => literal.push(escaped),
                None => return Err(PatternError::DanglingEscape),
            },
            ':' => {
                let prefix = take_prefix(&mut literal);
                flush(&mut tokens, &mut literal);

                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(PatternError::EmptyParamName { offset });
                }

                let custom = match chars.peek() {
                    Some(&(group_offset, '(')) => {
                        chars.next();
                        Some(read_group(&mut chars, group_offset)?)
                    }
                    _ => None,
                };

                let modifier = match chars.peek() {
                    Some(&(_, '?')) => {
                        chars.next();
                        Modifier::Optional
                    }
                    Some(&(_, '*')) => {
                        chars.next();
                        Modifier::ZeroOrMore
                    }
                    Some(&(_, '+')) => {
                        chars.next();
                        Modifier::OneOrMore
                    }
                    _ => Modifier::None,
                };

                tokens.push(Token::Param(ParamToken {
                    name: Arc::from(name.as_str()),
                    prefix,
                    pattern: custom.unwrap_or_else(|| DEFAULT_PARAM_PATTERN.to_string()),
                    modifier,
                }));
            }
            '*' => {
                let prefix = take_prefix(&mut literal);
                flush(&mut tokens, &mut literal);
                tokens.push(Token::Wildcard {
                    slash_prefixed: prefix == "/",
                });
            }
            _ => literal.push(ch),
        }
    }
    flush(&mut tokens, &mut literal);
    Ok(tokens)
}

/// Read a custom character-class group, starting after the opening `(`.
/// Nested groups must be non-capturing so capture positions stay aligned
/// with declared parameter names.
fn read_group(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    group_offset: usize,
) -> Result<String, PatternError> {
    let mut inner = String::new();
    let mut depth = 1usize;
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                inner.push(ch);
                match chars.next() {
                    Some((_, escaped)) => inner.push(escaped),
                    None => return Err(PatternError::DanglingEscape),
                }
            }
            '(' => {
                if !matches!(chars.peek(), Some(&(_, '?'))) {
                    return Err(PatternError::CaptureInCustomGroup { offset });
                }
                depth += 1;
                inner.push(ch);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(inner);
                }
                inner.push(ch);
            }
            _ => inner.push(ch),
        }
    }
    Err(PatternError::UnterminatedGroup {
        offset: group_offset,
    })
}

fn to_regex(tokens: &[Token], opts: PatternOptions) -> Result<Regex, PatternError> {
    let mut src = String::from("^");
    for token in tokens {
        match token {
            Token::Literal(text) => src.push_str(&regex::escape(text)),
            Token::Wildcard { slash_prefixed } => {
                if *slash_prefixed {
                    // `/files/*` matches both `/files` and anything below it.
                    src.push_str("(?:/.*)?");
                } else {
                    src.push_str(".*");
                }
            }
            Token::Param(p) => {
                let prefix = regex::escape(p.prefix);
                match p.modifier {
                    Modifier::None => {
                        src.push_str(&format!("{prefix}({})", p.pattern));
                    }
                    Modifier::Optional => {
                        src.push_str(&format!("(?:{prefix}({}))?", p.pattern));
                    }
                    Modifier::ZeroOrMore => {
                        // One capture group holding all `/`-joined repeats.
                        src.push_str(&format!(
                            "(?:{prefix}((?:{pat})(?:/(?:{pat}))*))?",
                            pat = p.pattern
                        ));
                    }
                    Modifier::OneOrMore => {
                        src.push_str(&format!(
                            "(?:{prefix}((?:{pat})(?:/(?:{pat}))*))",
                            pat = p.pattern
                        ));
                    }
                }
            }
        }
    }
    if opts.end {
        if !opts.strict {
            src.push_str("/?");
        }
        src.push('$');
    } else {
        // Prefix matching, but only on a segment boundary.
        src.push_str("(?:/.*)?$");
    }

    RegexBuilder::new(&src)
        .case_insensitive(!opts.sensitive)
        .build()
        .map_err(|e| PatternError::Regex {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(pattern: &str) -> CompiledPattern {
        compile(pattern, PatternOptions::default()).expect("pattern should compile")
    }

    #[test]
    fn test_literal_pattern() {
        let c = compiled("/users");
        assert!(c.regex.is_match("/users"));
        assert!(c.regex.is_match("/users/"));
        assert!(!c.regex.is_match("/users/42"));
        assert!(c.params.is_empty());
    }

    #[test]
    fn test_named_param() {
        let c = compiled("/users/:id");
        assert_eq!(c.params.len(), 1);
        assert_eq!(c.params[0].as_ref(), "id");
        let caps = c.regex.captures("/users/42").expect("should match");
        assert_eq!(&caps[1], "42");
        assert!(!c.regex.is_match("/users"));
        assert!(!c.regex.is_match("/users/42/posts"));
    }

    #[test]
    fn test_optional_param() {
        let c = compiled("/users/:id?");
        assert!(c.regex.is_match("/users"));
        assert!(c.regex.is_match("/users/42"));
        let caps = c.regex.captures("/users").expect("should match");
        assert!(caps.get(1).is_none());
    }

    #[test]
    fn test_zero_or_more_param() {
        let c = compiled("/files/:path*");
        assert!(c.regex.is_match("/files"));
        let caps = c.regex.captures("/files/a/b/c").expect("should match");
        assert_eq!(&caps[1], "a/b/c");
    }

    #[test]
    fn test_one_or_more_param() {
        let c = compiled("/files/:path+");
        assert!(!c.regex.is_match("/files"));
        let caps = c.regex.captures("/files/a/b").expect("should match");
        assert_eq!(&caps[1], "a/b");
    }

    #[test]
    fn test_custom_character_class() {
        let c = compiled(r"/orders/:id(\d+)");
        assert!(c.regex.is_match("/orders/42"));
        assert!(!c.regex.is_match("/orders/abc"));
    }

    #[test]
    fn test_trailing_wildcard() {
        let c = compiled("/static/*");
        assert!(c.regex.is_match("/static"));
        assert!(c.regex.is_match("/static/css/site.css"));
        assert!(c.params.is_empty());
    }

    #[test]
    fn test_case_insensitive_by_default() {
        let c = compiled("/Users/:id");
        assert!(c.regex.is_match("/users/42"));
        let sensitive = compile(
            "/Users/:id",
            PatternOptions {
                sensitive: true,
                ..PatternOptions::default()
            },
        )
        .expect("pattern should compile");
        assert!(!sensitive.regex.is_match("/users/42"));
    }

    #[test]
    fn test_unanchored_prefix_match() {
        let c = compile(
            "/api",
            PatternOptions {
                end: false,
                ..PatternOptions::default()
            },
        )
        .expect("pattern should compile");
        assert!(c.regex.is_match("/api"));
        assert!(c.regex.is_match("/api/v1/users"));
        assert!(!c.regex.is_match("/apix"));
    }

    #[test]
    fn test_strict_trailing_slash() {
        let c = compile(
            "/users",
            PatternOptions {
                strict: true,
                ..PatternOptions::default()
            },
        )
        .expect("pattern should compile");
        assert!(c.regex.is_match("/users"));
        assert!(!c.regex.is_match("/users/"));
    }

    #[test]
    fn test_escaped_marker_is_literal() {
        let c = compiled(r"/ratio/1\:2");
        assert!(c.regex.is_match("/ratio/1:2"));
        assert!(c.params.is_empty());
    }

    #[test]
    fn test_empty_param_name_rejected() {
        let err = compile("/users/:", PatternOptions::default()).unwrap_err();
        assert!(matches!(err, PatternError::EmptyParamName { .. }));
    }

    #[test]
    fn test_unterminated_group_rejected() {
        let err = compile(r"/orders/:id(\d+", PatternOptions::default()).unwrap_err();
        assert!(matches!(err, PatternError::UnterminatedGroup { .. }));
    }

    #[test]
    fn test_capture_in_custom_group_rejected() {
        let err = compile(r"/orders/:id((\d+))", PatternOptions::default()).unwrap_err();
        assert!(matches!(err, PatternError::CaptureInCustomGroup { .. }));
    }

    #[test]
    fn test_dangling_escape_rejected() {
        let err = compile(r"/users\", PatternOptions::default()).unwrap_err();
        assert!(matches!(err, PatternError::DanglingEscape));
    }

    #[test]
    fn test_params_in_declaration_order() {
        let c = compiled("/a/:x/:y/:z");
        let names: Vec<&str> = c.params.iter().map(|p| p.as_ref()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }
}

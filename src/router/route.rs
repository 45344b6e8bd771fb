//! A compiled route: one path pattern bound to HTTP methods and an ordered
//! middleware stack.

use http::Method;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{PatternError, RouterError};
use super::pattern::{self, CompiledPattern, Modifier, PatternOptions, Token};
use crate::context::ParamVec;
use crate::middleware::Middleware;

/// Per-route compilation options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Name for reverse lookup via
    /// [`Router::url_for`](crate::router::Router::url_for).
    pub name: Option<String>,
    /// Match any path extending the pattern on a segment boundary instead of
    /// anchoring at the end.
    pub prefix: bool,
    /// Refuse a trailing slash instead of tolerating it.
    pub strict: bool,
    /// Match case-sensitively.
    pub sensitive: bool,
    /// Skip capture collection: the route only answers match/no-match and
    /// extracts no parameters. For routes that gate on path shape alone.
    pub ignore_captures: bool,
}

/// Query material for reverse URL generation.
///
/// The raw form is appended verbatim; the structured form is serialized with
/// `BTreeMap` key ordering so the same map always yields the same URL.
#[derive(Debug, Clone)]
pub enum UrlQuery {
    Raw(String),
    Pairs(BTreeMap<String, String>),
}

enum StackEntry {
    /// Interceptor for the parameter at `param_index` in declaration order.
    /// Interceptors always precede plain handlers in the stack.
    Interceptor {
        param_index: usize,
        mw: Arc<dyn Middleware>,
    },
    Handler(Arc<dyn Middleware>),
}

impl StackEntry {
    fn middleware(&self) -> &Arc<dyn Middleware> {
        match self {
            StackEntry::Interceptor { mw, .. } => mw,
            StackEntry::Handler(mw) => mw,
        }
    }
}

/// A compiled matcher plus its bound methods and middleware stack.
///
/// Immutable once registered, except for parameter-interceptor insertion,
/// which only happens while the router is still being configured (`&mut`
/// access); at request time routes are shared read-only.
pub struct Route {
    pattern: String,
    compiled: CompiledPattern,
    methods: Vec<Method>,
    name: Option<String>,
    stack: Vec<StackEntry>,
    ignore_captures: bool,
}

impl Route {
    /// Compile `pattern` into a route answering to `methods`.
    ///
    /// Fails with [`PatternError`] when the pattern cannot be parsed; this is
    /// fatal at registration time and never surfaces at request time.
    pub fn compile(
        pattern: &str,
        methods: &[Method],
        opts: RouteOptions,
    ) -> Result<Self, PatternError> {
        let compiled = pattern::compile(
            pattern,
            PatternOptions {
                end: !opts.prefix,
                strict: opts.strict,
                sensitive: opts.sensitive,
            },
        )?;
        Ok(Self {
            pattern: pattern.to_string(),
            compiled,
            methods: methods.to_vec(),
            name: opts.name,
            stack: Vec::new(),
            ignore_captures: opts.ignore_captures,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared parameter names, in the order they appear in the pattern.
    #[must_use]
    pub fn param_names(&self) -> &[Arc<str>] {
        &self.compiled.params
    }

    /// Whether this route answers to `method`.
    ///
    /// A route declared for `GET` implicitly also answers `HEAD` (HEAD-as-GET
    /// convention); an explicit `HEAD` declaration is simply a member of the
    /// method set.
    #[must_use]
    pub fn accepts(&self, method: &Method) -> bool {
        if self.methods.contains(method) {
            return true;
        }
        *method == Method::HEAD && self.methods.contains(&Method::GET)
    }

    /// Whether `method` is an explicit member of the declared method set,
    /// ignoring the HEAD-as-GET convention.
    #[must_use]
    pub fn explicitly_accepts(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// Pure match test; no side effects.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.compiled.regex.is_match(path)
    }

    /// Raw (not yet decoded) captures, positionally aligned with
    /// [`param_names`](Self::param_names). Empty when the path does not match
    /// or when capture collection is disabled for this route. An unmatched
    /// optional group yields an empty string at its position.
    #[must_use]
    pub fn captures(&self, path: &str) -> Vec<String> {
        self.match_captures(path).unwrap_or_default()
    }

    /// Match test and capture collection in one pass: `None` when the path
    /// does not match, `Some(captures)` otherwise (empty in ignore mode).
    pub(crate) fn match_captures(&self, path: &str) -> Option<Vec<String>> {
        if self.ignore_captures {
            return self.matches(path).then(Vec::new);
        }
        let caps = self.compiled.regex.captures(path)?;
        Some(
            (0..self.compiled.params.len())
                .map(|i| {
                    caps.get(i + 1)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                })
                .collect(),
        )
    }

    /// Decode raw captures into a parameter map, merged over `existing`
    /// (supporting nested routers with their own capture groups).
    ///
    /// Each capture is percent-decoded; a malformed escape sequence falls
    /// back to the raw value instead of failing the request. Unmatched
    /// optional captures (empty strings) are skipped.
    #[must_use]
    pub fn extract_params(&self, captures: &[String], existing: Option<&ParamVec>) -> ParamVec {
        let mut out = existing.cloned().unwrap_or_default();
        for (name, raw) in self.compiled.params.iter().zip(captures) {
            if raw.is_empty() {
                continue;
            }
            let decoded = match urlencoding::decode(raw) {
                Ok(cow) => cow.into_owned(),
                Err(_) => raw.clone(),
            };
            out.push((Arc::clone(name), decoded));
        }
        out
    }

    /// Reverse-generate a path by substituting `params` into the compiled
    /// template. Matcher-only constructs (wildcard groups) are stripped;
    /// values are percent-encoded. Optional parameters may be omitted;
    /// omitting a required one is an error.
    pub fn build_url(
        &self,
        params: &[(&str, &str)],
        query: Option<&UrlQuery>,
    ) -> Result<String, RouterError> {
        let lookup = |name: &str| {
            params
                .iter()
                .rev()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| *v)
        };

        let mut out = String::new();
        for token in &self.compiled.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Wildcard { .. } => {}
                Token::Param(p) => match lookup(&p.name) {
                    Some(value) if !value.is_empty() => {
                        out.push_str(p.prefix);
                        match p.modifier {
                            Modifier::ZeroOrMore | Modifier::OneOrMore => {
                                // Repeat values are `/`-joined segments;
                                // encode each segment, keep the separators.
                                let encoded: Vec<String> = value
                                    .split('/')
                                    .map(|seg| urlencoding::encode(seg).into_owned())
                                    .collect();
                                out.push_str(&encoded.join("/"));
                            }
                            _ => out.push_str(&urlencoding::encode(value)),
                        }
                    }
                    _ => match p.modifier {
                        Modifier::Optional | Modifier::ZeroOrMore => {}
                        Modifier::None | Modifier::OneOrMore => {
                            return Err(RouterError::MissingParam {
                                pattern: self.pattern.clone(),
                                name: p.name.to_string(),
                            });
                        }
                    },
                },
            }
        }
        if out.is_empty() {
            out.push('/');
        }

        match query {
            None => {}
            Some(UrlQuery::Raw(q)) => {
                let q = q.strip_prefix('?').unwrap_or(q);
                if !q.is_empty() {
                    out.push('?');
                    out.push_str(q);
                }
            }
            Some(UrlQuery::Pairs(pairs)) => {
                if !pairs.is_empty() {
                    let mut ser = url::form_urlencoded::Serializer::new(String::new());
                    for (k, v) in pairs {
                        ser.append_pair(k, v);
                    }
                    out.push('?');
                    out.push_str(&ser.finish());
                }
            }
        }
        Ok(out)
    }

    /// Append a plain handler to the end of the stack.
    pub fn handler(&mut self, mw: Arc<dyn Middleware>) -> &mut Self {
        self.stack.push(StackEntry::Handler(mw));
        self
    }

    /// Insert an interceptor for parameter `name`, keeping interceptors
    /// ordered by the declaration-order index of the parameter they intercept
    /// and ahead of every plain handler. Interceptors therefore run in
    /// path-declaration order regardless of registration order. No-op when
    /// the route does not declare `name`.
    pub fn register_param_interceptor(
        &mut self,
        name: &str,
        mw: Arc<dyn Middleware>,
    ) -> &mut Self {
        let Some(param_index) = self
            .compiled
            .params
            .iter()
            .position(|p| p.as_ref() == name)
        else {
            return self;
        };
        // First position holding either a plain handler or an interceptor
        // for a later-declared parameter; append after all interceptors
        // otherwise.
        let at = self
            .stack
            .iter()
            .position(|entry| match entry {
                StackEntry::Handler(_) => true,
                StackEntry::Interceptor { param_index: i, .. } => *i > param_index,
            })
            .unwrap_or(self.stack.len());
        self.stack.insert(at, StackEntry::Interceptor { param_index, mw });
        self
    }

    /// The route's middleware in execution order: interceptors (declaration
    /// order), then plain handlers (registration order).
    pub fn stack_middleware(&self) -> impl Iterator<Item = &Arc<dyn Middleware>> {
        self.stack.iter().map(StackEntry::middleware)
    }

    #[must_use]
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }
}

//! Command template substitution.
//!
//! Command templates reference case variables as `{name}` and fields of the
//! bound test context as `{data.field}`. Lookup is restricted to the scope's
//! declared variables and the context's declared fields; there is no
//! open-ended reflection. Doubled braces escape to literal braces. After
//! substitution, all runs of whitespace collapse to single spaces so
//! multi-line templates read well without affecting execution.

use crate::context::TestContext;
use std::collections::BTreeMap;

/// Conventional name binding the test context inside a template.
pub const CONTEXT_VAR: &str = "data";

/// Variable scope for one command invocation.
#[derive(Debug, Default)]
pub struct Scope<'a> {
    data: Option<&'a TestContext>,
    vars: BTreeMap<&'a str, &'a str>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the test context under the conventional `data` name.
    pub fn with_data(ctx: &'a TestContext) -> Self {
        Self {
            data: Some(ctx),
            vars: BTreeMap::new(),
        }
    }

    /// Add a plain string variable.
    pub fn var(mut self, name: &'a str, value: &'a str) -> Self {
        self.vars.insert(name, value);
        self
    }

    /// Add every entry of a string map as a variable.
    pub fn vars(mut self, vars: &'a BTreeMap<String, String>) -> Self {
        for (k, v) in vars {
            self.vars.insert(k, v);
        }
        self
    }

    /// The bound test context, if any.
    pub fn data(&self) -> Option<&'a TestContext> {
        self.data
    }
}

/// Error from template substitution.
#[derive(Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// A `{` without a matching `}`.
    Unclosed(String),
    /// A placeholder naming no declared variable.
    UnknownVariable(String),
    /// A `data.` placeholder naming no declared context field or input.
    UnknownField(String),
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::Unclosed(rest) => {
                write!(f, "unclosed placeholder: {{{rest}")
            }
            TemplateError::UnknownVariable(name) => {
                write!(f, "template references undeclared variable '{name}'")
            }
            TemplateError::UnknownField(name) => {
                write!(f, "template references unknown context field 'data.{name}'")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// Substitute placeholders and collapse whitespace runs to single spaces.
/// Doubled braces (`{{`, `}}`) escape to literal braces, so shell syntax
/// like `${{HOME}}` and awk bodies stay writable.
pub fn substitute(template: &str, scope: &Scope) -> Result<String, TemplateError> {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                result.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                result.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(TemplateError::Unclosed(name)),
                    }
                }
                result.push_str(&resolve(&name, scope)?);
            }
            c => result.push(c),
        }
    }

    Ok(collapse_whitespace(&result))
}

fn resolve(name: &str, scope: &Scope) -> Result<String, TemplateError> {
    if let Some(field) = name.strip_prefix("data.") {
        let ctx = scope
            .data()
            .ok_or_else(|| TemplateError::UnknownVariable(CONTEXT_VAR.to_string()))?;
        return ctx
            .lookup(field)
            .ok_or_else(|| TemplateError::UnknownField(field.to_string()));
    }

    scope
        .vars
        .get(name)
        .map(|v| v.to_string())
        .ok_or_else(|| TemplateError::UnknownVariable(name.to_string()))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

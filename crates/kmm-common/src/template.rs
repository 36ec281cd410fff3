//! Template engine with `${...}` placeholder syntax
//!
//! Uses minijinja with custom syntax configuration:
//! - Variable delimiters: `${...}`
//! - Block delimiters: `{%...%}`
//! - Comment delimiters: `{#...#}`
//!
//! Undefined variables are errors, and the rendered text keeps its trailing
//! newline so generated files come out byte for byte.

use std::sync::OnceLock;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::{Error, Result};

static SHARED: OnceLock<std::result::Result<TemplateEngine, String>> = OnceLock::new();

/// Strict `${...}` renderer
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine with `${...}` variables and strict undefined handling
    pub fn new() -> Result<Self> {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("${", "}")
            .block_delimiters("{%", "%}")
            .comment_delimiters("{#", "#}")
            .build()
            .map_err(|e| Error::template("<syntax>", e.to_string()))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_trim_blocks(true);

        Ok(Self { env })
    }

    /// Process-wide engine, built on first use
    pub fn shared() -> Result<&'static Self> {
        SHARED
            .get_or_init(|| Self::new().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| Error::template("<syntax>", e.clone()))
    }

    /// Render `template` against `ctx`.
    ///
    /// `field` names what is being rendered and is reported in errors.
    pub fn render<S: Serialize>(&self, field: &str, template: &str, ctx: S) -> Result<String> {
        self.env
            .render_str(template, ctx)
            .map_err(|e| Error::template(field, format!("{e} in {template:?}")))
    }
}

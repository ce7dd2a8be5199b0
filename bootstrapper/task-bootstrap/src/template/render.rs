use handlebars::Handlebars;
use serde_json::{Map, Value};
use thiserror::Error;

use super::mustache::{to_handlebars, SyntaxError};
use crate::env::EnvSnapshot;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid template syntax: {0}")]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Engine(#[from] handlebars::RenderError),
}

/// Rendering data built from the environment.
///
/// Any value whose lower-cased form is exactly `false` becomes a boolean
/// `false`, so conditional sections treat it as falsy while `{{VAR}}` still
/// prints `false`. Every other value is kept verbatim as a string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubstitutionContext {
    data: Map<String, Value>,
}

impl SubstitutionContext {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        let data = env
            .iter()
            .map(|(k, v)| (k.to_string(), coerce(v)))
            .collect();
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

fn coerce(value: &str) -> Value {
    if value.to_lowercase() == "false" {
        Value::Bool(false)
    } else {
        Value::String(value.to_string())
    }
}

/// Mustache renderer: `{{VAR}}` is HTML-escaped, `{{{VAR}}}` is raw,
/// `{{#VAR}}`/`{{^VAR}}` sections follow mustache truthiness and unknown
/// variables render as empty text.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(mustache_escape);
        Self { handlebars }
    }

    pub fn render(
        &self,
        template: &str,
        context: &SubstitutionContext,
    ) -> Result<String, RenderError> {
        let source = to_handlebars(template)?;
        Ok(self.handlebars.render_template(&source, &context.data)?)
    }
}

fn mustache_escape(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    for c in data.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

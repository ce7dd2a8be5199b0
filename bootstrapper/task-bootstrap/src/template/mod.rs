//! Config template rendering.
//!
//! Every `CONFIG_TEMPLATE_<name>=<src>,<dest>` entry in the environment names
//! a template under the sandbox and the file it should be rendered to. All
//! environment variables are available as substitution values.

pub mod diff;
pub mod locate;
pub mod mustache;
pub mod render;

pub use diff::{line_diff, DiffLine};
pub use locate::locate_template;
pub use render::{RenderError, SubstitutionContext, TemplateRenderer};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::env::EnvSnapshot;

pub const CONFIG_TEMPLATE_PREFIX: &str = "CONFIG_TEMPLATE_";
pub const DEFAULT_TEMPLATE_MAX_BYTES: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error(
        "Provided value for {key} is invalid: Should be two strings separated by a comma, got: {value}"
    )]
    MalformedDeclaration { key: String, value: String },

    #[error("Missing required envvar: MESOS_SANDBOX (needed by {source_name})")]
    MissingSandbox { source_name: String },

    #[error("Path from {source_name} doesn't exist: {}", .path.display())]
    NotFound { source_name: String, path: PathBuf },

    #[error("Path from {source_name} is not a regular file: {}", .path.display())]
    NotRegularFile { source_name: String, path: PathBuf },

    #[error(
        "File '{}' from {source_name} is {size} bytes, exceeds maximum {max_bytes} bytes",
        .path.display()
    )]
    TooLarge {
        source_name: String,
        path: PathBuf,
        size: u64,
        max_bytes: u64,
    },

    #[error("Failed to read file from {source_name} at '{}': {source}", .path.display())]
    Read {
        source_name: String,
        path: PathBuf,
        source: io::Error,
    },

    #[error("File from {source_name} at '{}' is not valid UTF-8", .path.display())]
    NotUtf8 { source_name: String, path: PathBuf },

    #[error("Failed to render template from {source_name} at '{}': {source}", .path.display())]
    Render {
        source_name: String,
        path: PathBuf,
        source: RenderError,
    },

    #[error("Failed to write rendered template from {source_name} to '{}': {source}", .path.display())]
    Write {
        source_name: String,
        path: PathBuf,
        source: io::Error,
    },
}

/// One `CONFIG_TEMPLATE_*` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDeclaration {
    pub key: String,
    pub source_path: String,
    pub dest_path: String,
}

impl TemplateDeclaration {
    /// Parses `<src>,<dest>`. Anything other than exactly two non-empty
    /// parts is rejected.
    pub fn parse(key: &str, value: &str) -> Result<Self, TemplateError> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [src, dest] if !src.is_empty() && !dest.is_empty() => Ok(Self {
                key: key.to_string(),
                source_path: src.to_string(),
                dest_path: dest.to_string(),
            }),
            _ => Err(TemplateError::MalformedDeclaration {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Human-readable origin used in log and error messages.
    pub fn source_name(&self) -> String {
        format!("envvar '{}'", self.key)
    }

    /// Relative destinations land under the sandbox.
    pub fn destination(&self, sandbox: &Path) -> PathBuf {
        sandbox.join(&self.dest_path)
    }
}

/// All declarations in the environment, sorted by key.
pub fn declarations(env: &EnvSnapshot) -> Result<Vec<TemplateDeclaration>, TemplateError> {
    env.with_prefix(CONFIG_TEMPLATE_PREFIX)
        .map(|(k, v)| TemplateDeclaration::parse(k, v))
        .collect()
}

/// What a rendered declaration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub path: PathBuf,
    pub content: String,
}

/// Renders one declaration: read, substitute, print the diff to `diag`, write.
pub fn render_declaration<W: Write>(
    renderer: &TemplateRenderer,
    context: &SubstitutionContext,
    decl: &TemplateDeclaration,
    sandbox: &Path,
    max_bytes: u64,
    diag: &mut W,
) -> Result<RenderedArtifact, TemplateError> {
    let source_name = decl.source_name();
    let original = locate_template(sandbox, &decl.source_path, max_bytes, &source_name)?;
    let path = decl.destination(sandbox);

    let content = renderer
        .render(&original, context)
        .map_err(|e| TemplateError::Render {
            source_name: source_name.clone(),
            path: path.clone(),
            source: e,
        })?;

    info!(
        "Writing rendered '{}' from {} with the following changes ({} bytes -> {} bytes):",
        path.display(),
        source_name,
        original.len(),
        content.len()
    );
    for line in line_diff(&original, &content) {
        if let Err(e) = writeln!(diag, "{}", line) {
            debug!("Failed to print diff line for '{}': {}", path.display(), e);
        }
    }

    fs::write(&path, &content).map_err(|e| TemplateError::Write {
        source_name,
        path: path.clone(),
        source: e,
    })?;

    Ok(RenderedArtifact { path, content })
}

/// Renders every declared template in sorted key order. All declarations
/// are validated before any file is touched.
pub fn render_all<W: Write>(
    env: &EnvSnapshot,
    sandbox: Option<&Path>,
    max_bytes: u64,
    diag: &mut W,
) -> Result<Vec<RenderedArtifact>, TemplateError> {
    let decls = declarations(env)?;
    if decls.is_empty() {
        info!("No {}* envvars found, nothing to render", CONFIG_TEMPLATE_PREFIX);
        return Ok(Vec::new());
    }

    let sandbox = sandbox.ok_or_else(|| TemplateError::MissingSandbox {
        source_name: decls[0].source_name(),
    })?;

    let renderer = TemplateRenderer::new();
    let context = SubstitutionContext::from_env(env);

    let mut rendered = Vec::with_capacity(decls.len());
    for decl in &decls {
        rendered.push(render_declaration(
            &renderer, &context, decl, sandbox, max_bytes, diag,
        )?);
    }
    Ok(rendered)
}

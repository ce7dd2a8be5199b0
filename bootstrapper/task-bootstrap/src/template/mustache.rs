//! Mustache front end for the handlebars engine.
//!
//! Templates are written in mustache. Handlebars shares the variable syntax
//! but reads `{{#NAME}}` as a helper call, has no `{{^NAME}}` sections and
//! treats `\{{` as an escape. [`to_handlebars`] rewrites every mustache tag
//! into an equivalent handlebars expression so the engine sees no syntax of
//! its own:
//!
//! | mustache            | handlebars               |
//! |---------------------|--------------------------|
//! | `{{NAME}}`          | `{{[NAME]}}`             |
//! | `{{{NAME}}}`, `{{&NAME}}` | `{{{[NAME]}}}`     |
//! | `{{#NAME}}..{{/NAME}}` | `{{#if [NAME]}}..{{/if}}` |
//! | `{{^NAME}}..{{/NAME}}` | `{{#unless [NAME]}}..{{/unless}}` |
//! | `{{! note }}`, `{{> partial}}` | `{{!}}`         |
//!
//! Names are emitted as bracketed path segments so a variable called `if` or
//! `lookup` is never mistaken for a helper. Backslashes in front of a tag are
//! literal in mustache, so one extra backslash is written to cancel the
//! handlebars escape.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("unclosed tag starting on line {line}")]
    UnclosedTag { line: usize },

    #[error("empty tag on line {line}")]
    EmptyTag { line: usize },

    #[error("invalid name '{name}' on line {line}")]
    InvalidName { name: String, line: usize },

    #[error("section '{name}' opened on line {line} is never closed")]
    UnclosedSection { name: String, line: usize },

    #[error("unexpected closing tag '{found}' on line {line}")]
    UnbalancedSection { found: String, line: usize },

    #[error("delimiter changes are not supported (line {line})")]
    DelimiterChange { line: usize },
}

enum Tag<'a> {
    Variable(&'a str),
    Raw(&'a str),
    Section(&'a str),
    Inverted(&'a str),
    Close(&'a str),
    Comment,
    Delimiters,
}

struct OpenSection<'a> {
    name: &'a str,
    inverted: bool,
    line: usize,
}

/// Rewrites a mustache template into handlebars source with the same output.
pub fn to_handlebars(source: &str) -> Result<String, SyntaxError> {
    let mut out = String::with_capacity(source.len() + source.len() / 4);
    let mut open: Vec<OpenSection<'_>> = Vec::new();
    let mut pos = 0;

    while let Some(found) = source[pos..].find("{{") {
        let start = pos + found;
        out.push_str(&source[pos..start]);
        let line = line_of(source, start);

        let (tag, end) = next_tag(source, start, line)?;
        pos = end;

        match tag {
            Tag::Variable(".") => {
                if let Some(section) = open.iter().rev().find(|s| !s.inverted) {
                    push_tag(&mut out, &format!("{{{{{}}}}}", path(section.name, line)?));
                }
            }
            Tag::Variable(name) => push_tag(&mut out, &format!("{{{{{}}}}}", path(name, line)?)),
            Tag::Raw(name) => push_tag(&mut out, &format!("{{{{{{{}}}}}}}", path(name, line)?)),
            Tag::Section(name) => {
                push_tag(&mut out, &format!("{{{{#if {}}}}}", path(name, line)?));
                open.push(OpenSection {
                    name,
                    inverted: false,
                    line,
                });
            }
            Tag::Inverted(name) => {
                push_tag(&mut out, &format!("{{{{#unless {}}}}}", path(name, line)?));
                open.push(OpenSection {
                    name,
                    inverted: true,
                    line,
                });
            }
            Tag::Close(name) => match open.pop() {
                Some(section) if section.name == name => {
                    push_tag(
                        &mut out,
                        if section.inverted {
                            "{{/unless}}"
                        } else {
                            "{{/if}}"
                        },
                    );
                }
                _ => {
                    return Err(SyntaxError::UnbalancedSection {
                        found: name.to_string(),
                        line,
                    })
                }
            },
            Tag::Comment => push_tag(&mut out, "{{!}}"),
            Tag::Delimiters => return Err(SyntaxError::DelimiterChange { line }),
        }
    }
    out.push_str(&source[pos..]);

    match open.pop() {
        Some(section) => Err(SyntaxError::UnclosedSection {
            name: section.name.to_string(),
            line: section.line,
        }),
        None => Ok(out),
    }
}

/// Parses the tag opening at `start` and returns it with the offset just
/// past its closing braces.
fn next_tag(source: &str, start: usize, line: usize) -> Result<(Tag<'_>, usize), SyntaxError> {
    let body_start = start + 2;

    if source[body_start..].starts_with('{') {
        let inner = body_start + 1;
        let len = source[inner..]
            .find("}}}")
            .ok_or(SyntaxError::UnclosedTag { line })?;
        let name = non_empty(&source[inner..inner + len], line)?;
        return Ok((Tag::Raw(name), inner + len + 3));
    }

    let len = source[body_start..]
        .find("}}")
        .ok_or(SyntaxError::UnclosedTag { line })?;
    let body = &source[body_start..body_start + len];
    let end = body_start + len + 2;

    let tag = match body.chars().next() {
        Some('!') | Some('>') => Tag::Comment,
        Some('=') => Tag::Delimiters,
        Some('&') => Tag::Raw(non_empty(&body[1..], line)?),
        Some('#') => Tag::Section(non_empty(&body[1..], line)?),
        Some('^') => Tag::Inverted(non_empty(&body[1..], line)?),
        Some('/') => Tag::Close(non_empty(&body[1..], line)?),
        _ => Tag::Variable(non_empty(body, line)?),
    };
    Ok((tag, end))
}

fn non_empty(raw: &str, line: usize) -> Result<&str, SyntaxError> {
    match raw.trim() {
        "" => Err(SyntaxError::EmptyTag { line }),
        name => Ok(name),
    }
}

/// `a.b` becomes `[a].[b]`: mustache dotted names walk nested data.
fn path(name: &str, line: usize) -> Result<String, SyntaxError> {
    let invalid = |c: char| c.is_whitespace() || matches!(c, '[' | ']' | '{' | '}');
    let segments: Vec<&str> = name.split('.').collect();
    if segments.iter().any(|s| s.is_empty() || s.contains(invalid)) {
        return Err(SyntaxError::InvalidName {
            name: name.to_string(),
            line,
        });
    }
    Ok(segments
        .iter()
        .map(|s| format!("[{}]", s))
        .collect::<Vec<_>>()
        .join("."))
}

fn push_tag(out: &mut String, tag: &str) {
    if out.ends_with('\\') {
        out.push('\\');
    }
    out.push_str(tag);
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

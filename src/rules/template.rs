//! Destination templates.
//!
//! A template such as `Photos/{year}/{month}` or `Invoices/{vendor}/{stem}.{ext}`
//! is parsed once when a rule is created and rendered per file. Placeholders
//! are pattern captures or one of [`BUILTINS`]; `{{` and `}}` are literal
//! braces.
//!
//! A template denotes a directory (the file name is appended) unless its last
//! segment uses `{name}` or `{stem}`, in which case it denotes the full path.

use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::TemplateError;
use crate::models::FileDescriptor;

/// Placeholders available to every rule
pub const BUILTINS: &[&str] = &[
    "name", "stem", "ext", "parent", "date", "year", "month", "day", "rule",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
    /// Path separator
    Slash,
}

/// A parsed destination template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTemplate {
    source: String,
    segments: Vec<Segment>,
    full_path: bool,
}

/// Per-file values used to fill placeholders
pub struct TemplateContext<'a> {
    pub file: &'a FileDescriptor,
    pub captures: &'a BTreeMap<String, String>,
    pub rule_name: &'a str,
}

impl DestinationTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let syntax = |message: &str| TemplateError::Syntax {
            template: raw.to_string(),
            message: message.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(syntax("template is empty"));
        }

        let chars: Vec<char> = raw.chars().collect();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '{' => {
                    let close = chars[i + 1..]
                        .iter()
                        .position(|&c| c == '}')
                        .map(|offset| i + 1 + offset)
                        .ok_or_else(|| syntax("unclosed '{'"))?;
                    let name: String = chars[i + 1..close].iter().collect();
                    if !is_placeholder_name(&name) {
                        return Err(syntax(&format!("invalid placeholder '{{{}}}'", name)));
                    }
                    flush(&mut literal, &mut segments);
                    segments.push(Segment::Placeholder(name));
                    i = close + 1;
                }
                '}' => return Err(syntax("unmatched '}'")),
                '/' | '\\' => {
                    flush(&mut literal, &mut segments);
                    segments.push(Segment::Slash);
                    i += 1;
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }
        flush(&mut literal, &mut segments);

        let template = Self {
            source: raw.to_string(),
            full_path: last_segment_names_file(&segments),
            segments,
        };

        if template.has_parent_literal() {
            return Err(TemplateError::EscapesRoot {
                path: raw.to_string(),
            });
        }
        Ok(template)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template renders the full file path rather than a directory
    pub fn is_full_path(&self) -> bool {
        self.full_path
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Check every placeholder against the built-ins and `captures`
    pub fn validate(&self, captures: &[String]) -> Result<(), TemplateError> {
        for placeholder in self.placeholders() {
            if !BUILTINS.contains(&placeholder) && !captures.iter().any(|c| c == placeholder) {
                return Err(TemplateError::UnknownPlaceholder {
                    placeholder: placeholder.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Render to a `/`-separated path. Captures take precedence over built-ins.
    pub fn render(&self, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slash => out.push('/'),
                Segment::Placeholder(name) => {
                    let value = placeholder_value(name, ctx).ok_or_else(|| {
                        TemplateError::Unresolved {
                            placeholder: name.clone(),
                            file: ctx.file.relative_path.clone(),
                        }
                    })?;
                    out.push_str(&value);
                }
            }
        }

        let absolute = out.starts_with('/');
        let parts: Vec<&str> = out
            .split('/')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != ".")
            .collect();

        if parts.contains(&"..") {
            return Err(TemplateError::EscapesRoot { path: out });
        }

        let joined = parts.join("/");
        Ok(if absolute { format!("/{}", joined) } else { joined })
    }

    /// Resolve the destination file path of `ctx.file` under `root`
    pub fn destination(&self, root: &Path, ctx: &TemplateContext<'_>) -> Result<PathBuf, TemplateError> {
        let rendered = self.render(ctx)?;
        let mut path = if rendered.starts_with('/') {
            PathBuf::from("/")
        } else {
            root.to_path_buf()
        };
        for part in rendered.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }

        if self.full_path {
            if rendered.is_empty() {
                return Err(TemplateError::Unresolved {
                    placeholder: "name".to_string(),
                    file: ctx.file.relative_path.clone(),
                });
            }
            Ok(path)
        } else {
            Ok(path.join(&ctx.file.name))
        }
    }

    fn has_parent_literal(&self) -> bool {
        let mut current = String::new();
        let mut has_placeholder = false;
        for segment in self.segments.iter().chain(std::iter::once(&Segment::Slash)) {
            match segment {
                Segment::Slash => {
                    if !has_placeholder && current.trim() == ".." {
                        return true;
                    }
                    current.clear();
                    has_placeholder = false;
                }
                Segment::Literal(text) => current.push_str(text),
                Segment::Placeholder(_) => has_placeholder = true,
            }
        }
        false
    }
}

fn flush(literal: &mut String, segments: &mut Vec<Segment>) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn last_segment_names_file(segments: &[Segment]) -> bool {
    segments
        .iter()
        .rev()
        .take_while(|s| !matches!(s, Segment::Slash))
        .any(|s| matches!(s, Segment::Placeholder(name) if name == "name" || name == "stem"))
}

fn placeholder_value(name: &str, ctx: &TemplateContext<'_>) -> Option<String> {
    if let Some(value) = ctx.captures.get(name) {
        return Some(value.clone());
    }

    let file = ctx.file;
    let modified = || file.modified_at.and_then(DateTime::<Utc>::from_timestamp_millis);

    match name {
        "name" => Some(file.name.clone()),
        "stem" => Some(file.stem.clone()),
        "ext" => file.extension.clone(),
        "parent" => Some(file.parent().to_string()),
        "date" => modified().map(|dt| dt.format("%Y-%m-%d").to_string()),
        "year" => modified().map(|dt| format!("{:04}", dt.year())),
        "month" => modified().map(|dt| format!("{:02}", dt.month())),
        "day" => modified().map(|dt| format!("{:02}", dt.day())),
        "rule" => Some(ctx.rule_name.to_string()),
        _ => None,
    }
}

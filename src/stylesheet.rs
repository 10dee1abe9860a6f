//! Resolves a presentation template's `style.css` through its `@extends` chain.
//!
//! A sheet may start with `/* @extends parent */`. The parent is resolved
//! first and the child's own rules follow it, so the child wins on equal
//! specificity.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{PublishError, PublishResult};

/// File name of a template's stylesheet inside its directory.
pub const STYLESHEET_FILE: &str = "style.css";

/// Supplies the stylesheet text of a named presentation template.
#[async_trait]
pub trait StylesheetSource: Send + Sync {
    /// `Ok(None)` when the template has no stylesheet.
    async fn load(&self, template: &str) -> io::Result<Option<String>>;
}

#[async_trait]
impl StylesheetSource for BTreeMap<String, String> {
    async fn load(&self, template: &str) -> io::Result<Option<String>> {
        Ok(self.get(template).cloned())
    }
}

/// Reads `<templates_dir>/<name>/style.css`.
#[derive(Debug, Clone)]
pub struct FsStylesheetSource {
    templates_dir: PathBuf,
}

impl FsStylesheetSource {
    pub fn new<P: Into<PathBuf>>(templates_dir: P) -> Self {
        Self {
            templates_dir: templates_dir.into(),
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    pub fn path_of(&self, template: &str) -> PathBuf {
        self.templates_dir.join(template).join(STYLESHEET_FILE)
    }
}

#[async_trait]
impl StylesheetSource for FsStylesheetSource {
    async fn load(&self, template: &str) -> io::Result<Option<String>> {
        let path = self.path_of(template);
        match tokio::fs::read_to_string(&path).await {
            Ok(css) => {
                debug!("Loaded stylesheet for {} from {:?}", template, path);
                Ok(Some(css))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No stylesheet for {} at {:?}", template, path);
                Ok(None)
            }
            Err(err) => {
                warn!("Failed to read stylesheet {:?}: {}", path, err);
                Err(err)
            }
        }
    }
}

/// Splits a leading `/* @extends name */` directive off `css`.
///
/// Returns the parent name and the sheet with the directive and one following
/// newline removed, or `None` when the sheet does not start with a directive.
///
/// ```
/// use publishpipe::parse_extends_directive;
///
/// let (parent, rest) = parse_extends_directive("/* @extends base */\nh1 { color: red; }").unwrap();
/// assert_eq!(parent, "base");
/// assert_eq!(rest, "h1 { color: red; }");
/// assert!(parse_extends_directive("h1 {}").is_none());
/// ```
pub fn parse_extends_directive(css: &str) -> Option<(&str, &str)> {
    let body = css.strip_prefix("/*")?;
    let body = body.trim_start().strip_prefix("@extends")?;
    if !body.starts_with(char::is_whitespace) {
        return None;
    }

    let body = body.trim_start();
    let name_len = body
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'))
        .unwrap_or(body.len());
    let (name, rest) = body.split_at(name_len);
    if name.is_empty() {
        return None;
    }

    let rest = rest.trim_start().strip_prefix("*/")?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);
    Some((name, rest))
}

/// Names currently being resolved, outermost first.
#[derive(Debug, Default)]
struct InheritanceChain {
    names: Vec<String>,
}

impl InheritanceChain {
    fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|entry| entry == name)
    }

    fn push(&mut self, name: &str) {
        self.names.push(name.to_string());
    }

    const fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `a -> b -> a` for a chain `[a, b]` revisiting `a`.
    fn describe_cycle(&self, revisited: &str) -> String {
        let mut chain = self.names.clone();
        chain.push(revisited.to_string());
        chain.join(" -> ")
    }
}

/// Resolves the stylesheet of `template`, following `@extends` directives.
///
/// A template without a stylesheet resolves to an empty string.
///
/// # Errors
///
/// * [`PublishError::InheritanceCycle`] when the chain revisits a template
/// * [`PublishError::MissingParentStylesheet`] when a declared parent has no stylesheet
/// * [`PublishError::Io`] when the source fails to read a sheet
pub async fn resolve_stylesheet<S>(template: &str, source: &S) -> PublishResult<String>
where
    S: StylesheetSource + ?Sized,
{
    let mut chain = InheritanceChain::default();
    // Child sheets, innermost last, waiting for their parents to resolve.
    let mut children = Vec::new();
    let mut current = template.to_string();

    let root = loop {
        if chain.contains(&current) {
            return Err(PublishError::InheritanceCycle {
                chain: chain.describe_cycle(&current),
            });
        }

        let Some(css) = source.load(&current).await? else {
            if chain.is_empty() {
                return Ok(String::new());
            }
            return Err(PublishError::MissingParentStylesheet { name: current });
        };

        match parse_extends_directive(&css) {
            Some((parent, rest)) => {
                let parent = parent.to_string();
                children.push(rest.to_string());
                chain.push(&current);
                current = parent;
            }
            None => break css,
        }
    };

    Ok(children
        .into_iter()
        .rev()
        .fold(root, |resolved, child| format!("{resolved}\n{child}")))
}

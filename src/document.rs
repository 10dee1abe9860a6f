//! Markdown documents with YAML frontmatter.

use std::path::Path;

use tracing::debug;

use crate::error::{PublishError, PublishResult};
use crate::value::Namespace;

const FRONTMATTER_DELIMITER: &str = "---";

/// Separator placed between concatenated chapters.
pub const CHAPTER_SEPARATOR: &str = "\n\n---\n\n";

/// A loaded document: its frontmatter layer and markdown body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub frontmatter: Namespace,
    pub markdown: String,
}

fn strip_line_break(text: &str) -> Option<&str> {
    text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n'))
}

/// Splits a leading `---` YAML block off `raw`.
///
/// Text without a frontmatter block yields an empty namespace and the whole
/// text as body.
///
/// ```
/// use publishpipe::{Value, split_frontmatter};
///
/// let (frontmatter, body) = split_frontmatter("---\ntitle: Offer\n---\n# Hello\n").unwrap();
/// assert_eq!(frontmatter.get("title"), Some(&Value::from("Offer")));
/// assert_eq!(body, "# Hello\n");
/// ```
///
/// # Errors
///
/// [`PublishError::Frontmatter`] if the block is not a YAML mapping.
pub fn split_frontmatter(raw: &str) -> PublishResult<(Namespace, &str)> {
    let Some(after_open) = raw
        .strip_prefix(FRONTMATTER_DELIMITER)
        .and_then(strip_line_break)
    else {
        return Ok((Namespace::new(), raw));
    };

    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        if line.trim_end() == FRONTMATTER_DELIMITER {
            let yaml = &after_open[..offset];
            let body = &after_open[offset + line.len()..];

            let frontmatter = if yaml.trim().is_empty() {
                Namespace::new()
            } else {
                serde_yaml::from_str(yaml)?
            };
            return Ok((frontmatter, body));
        }
        offset += line.len();
    }

    // An unterminated block is ordinary markdown.
    Ok((Namespace::new(), raw))
}

async fn read_markdown(path: &Path) -> PublishResult<Document> {
    debug!("Reading markdown from {:?}", path);
    let raw = tokio::fs::read_to_string(path).await?;
    let (frontmatter, body) = split_frontmatter(&raw)?;
    Ok(Document {
        frontmatter,
        markdown: body.to_string(),
    })
}

/// Loads a single markdown file or, when `chapters` is non-empty, the chapters
/// resolved against `cwd`.
///
/// Chapter bodies are joined with [`CHAPTER_SEPARATOR`] and the first
/// chapter's frontmatter describes the whole document.
///
/// # Errors
///
/// [`PublishError::NoContentSource`] when neither source is given, or any
/// read or frontmatter error.
pub async fn load_document(
    markdown_path: Option<&Path>,
    chapters: Option<&[String]>,
    cwd: &Path,
) -> PublishResult<Document> {
    if let Some(chapters) = chapters.filter(|chapters| !chapters.is_empty()) {
        let mut frontmatter = None;
        let mut bodies = Vec::with_capacity(chapters.len());

        for chapter in chapters {
            let document = read_markdown(&cwd.join(chapter)).await?;
            frontmatter.get_or_insert(document.frontmatter);
            bodies.push(document.markdown);
        }

        return Ok(Document {
            frontmatter: frontmatter.unwrap_or_default(),
            markdown: bodies.join(CHAPTER_SEPARATOR),
        });
    }

    match markdown_path {
        Some(path) => read_markdown(path).await,
        None => Err(PublishError::NoContentSource),
    }
}

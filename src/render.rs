//! Prepares the HTML of a document: body and layout templates rendered, with
//! missing variables collected along the way.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::analyzer::find_missing_in_template;
use crate::config::ProjectConfig;
use crate::date::DateLocale;
use crate::document::load_document;
use crate::engine::TemplateEngine;
use crate::error::{PublishError, PublishResult};
use crate::presentation::PresentationModel;
use crate::stylesheet::{FsStylesheetSource, resolve_stylesheet};
use crate::value::Namespace;
use crate::warn::MissingVariables;

/// Layout template rendered inside each presentation template directory.
pub const LAYOUT_TEMPLATE: &str = "template.njk";

/// Warning context of the markdown body.
pub const MARKDOWN_CONTEXT: &str = "markdown";

/// Converts a rendered markdown body to HTML.
pub trait MarkdownConverter: Send + Sync {
    fn to_html(&self, markdown: &str) -> PublishResult<String>;
}

impl<F> MarkdownConverter for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn to_html(&self, markdown: &str) -> PublishResult<String> {
        Ok(self(markdown))
    }
}

#[derive(Debug, Clone)]
pub struct RenderedHtml {
    pub html: String,
    /// The document's own frontmatter.
    pub frontmatter: Namespace,
    pub presentation: PresentationModel,
    /// One entry per template that referenced missing variables.
    pub warnings: Vec<MissingVariables>,
}

/// Renders documents against the presentation templates in `templates_dir`.
#[derive(Debug)]
pub struct RenderPipeline<C> {
    templates_dir: PathBuf,
    converter: C,
}

impl<C: MarkdownConverter> RenderPipeline<C> {
    pub fn new<P: Into<PathBuf>>(templates_dir: P, converter: C) -> Self {
        Self {
            templates_dir: templates_dir.into(),
            converter,
        }
    }

    pub fn templates_dir(&self) -> &Path {
        &self.templates_dir
    }

    /// Loads the template directory on the blocking pool.
    async fn load_engine(template_dir: PathBuf, locale: DateLocale) -> PublishResult<TemplateEngine> {
        let is_dir = tokio::fs::metadata(&template_dir)
            .await
            .is_ok_and(|metadata| metadata.is_dir());
        if !is_dir {
            warn!("Template directory {:?} does not exist", template_dir);
            return Ok(TemplateEngine::new().with_date_locale(locale));
        }

        tokio::task::spawn_blocking(move || -> PublishResult<TemplateEngine> {
            let mut engine = TemplateEngine::new().with_date_locale(locale);
            engine.load_dir(&template_dir)?;
            Ok(engine)
        })
        .await
        .map_err(|err| PublishError::Io(io::Error::other(err)))?
    }

    /// Loads the document for `config` (or `markdown_path`), renders its body
    /// and then the layout of the configured presentation template.
    ///
    /// Missing variables never fail the render; they are returned as warnings.
    ///
    /// # Errors
    ///
    /// Document, template and stylesheet errors.
    pub async fn render_html(
        &self,
        markdown_path: Option<&Path>,
        config: &ProjectConfig,
        cwd: &Path,
    ) -> PublishResult<RenderedHtml> {
        let document = load_document(markdown_path, config.chapters.as_deref(), cwd).await?;
        let presentation = PresentationModel::build(config, &document.frontmatter);
        let template_dir = self.templates_dir.join(&presentation.template_name);
        info!("Rendering with template {:?}", template_dir);

        let engine = Self::load_engine(template_dir, config.date_locale()).await?;
        let mut warnings = Vec::new();

        let missing = find_missing_in_template(&document.markdown, &presentation.template_vars, &engine).await?;
        record(&mut warnings, MARKDOWN_CONTEXT.to_string(), missing);
        let body = engine.render_str(&document.markdown, &presentation.template_vars)?;
        let content_html = self.converter.to_html(&body)?;

        let css = resolve_stylesheet(
            &presentation.template_name,
            &FsStylesheetSource::new(&self.templates_dir),
        )
        .await?;
        let namespace = presentation.layout_namespace(&content_html, &css);

        let missing = engine.missing_variables(LAYOUT_TEMPLATE, &namespace).await?;
        record(
            &mut warnings,
            format!("template \"{}/{LAYOUT_TEMPLATE}\"", presentation.template_name),
            missing,
        );
        let html = engine.render(LAYOUT_TEMPLATE, &namespace)?;
        debug!("Rendered {} bytes of HTML", html.len());

        Ok(RenderedHtml {
            html,
            frontmatter: document.frontmatter,
            presentation,
            warnings,
        })
    }
}

fn record(warnings: &mut Vec<MissingVariables>, context: String, missing: Vec<String>) {
    if missing.is_empty() {
        return;
    }
    warn!("{} missing template variables in {}", missing.len(), context);
    warnings.push(MissingVariables { context, missing });
}

use std::collections::HashMap;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analyzer::find_missing_in_template;
use crate::date::DateLocale;
use crate::error::{ParseError, PublishError, PublishResult};
use crate::loader::IncludeLoader;
use crate::template::{INLINE_TEMPLATE_NAME, Renderer, Template};
use crate::value::Namespace;

/// Extensions picked up by [`TemplateEngine::load_dir`].
const TEMPLATE_EXTENSIONS: [&str; 4] = ["njk", "html", "md", "jinja"];

/// A set of named templates that can include and extend each other.
///
/// # Examples
///
/// ```
/// use publishpipe::{Namespace, TemplateEngine};
///
/// let mut engine = TemplateEngine::new();
/// engine.add_template("header.njk", "<h1>{{ title }}</h1>").unwrap();
/// engine
///     .add_template("page.njk", "{% include 'header.njk' %}{{ body }}")
///     .unwrap();
///
/// let mut namespace = Namespace::new();
/// namespace.insert("title", "Offer").insert("body", "...");
///
/// let output = engine.render("page.njk", &namespace).unwrap();
/// assert_eq!(output, "<h1>Offer</h1>...");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    templates: HashMap<String, Template>,
    /// Files found by `load_dir` that failed to parse; the error surfaces
    /// only when one of them is used.
    rejected: HashMap<String, Rejected>,
    date_locale: DateLocale,
}

#[derive(Debug, Clone)]
struct Rejected {
    source: String,
    error: ParseError,
}

impl TemplateEngine {
    /// Creates an engine with no templates and the default date locale.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the locale used by the `format` filter.
    #[must_use]
    pub const fn with_date_locale(mut self, locale: DateLocale) -> Self {
        self.date_locale = locale;
        self
    }

    pub const fn date_locale(&self) -> DateLocale {
        self.date_locale
    }

    /// Parses `source` and registers it under `name`.
    ///
    /// # Errors
    ///
    /// * [`PublishError::TemplateExists`] if `name` is already registered
    /// * [`PublishError::Parse`] if `source` contains syntax errors
    pub fn add_template<N: AsRef<str>, S: Into<String>>(&mut self, name: N, source: S) -> PublishResult<()> {
        let name = name.as_ref();
        if self.contains(name) {
            return Err(PublishError::TemplateExists(name.to_string()));
        }

        let template = Template::new(name, source)?;
        self.templates.insert(name.to_string(), template);
        Ok(())
    }

    fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name) || self.rejected.contains_key(name)
    }

    pub fn get_template(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// The template registered as `name`, or its parse error if `load_dir`
    /// could not parse it.
    pub(crate) fn resolve(&self, name: &str) -> PublishResult<Option<&Template>> {
        if let Some(template) = self.templates.get(name) {
            return Ok(Some(template));
        }
        match self.rejected.get(name) {
            Some(rejected) => Err(PublishError::Parse {
                template: name.to_string(),
                source: rejected.error.clone(),
            }),
            None => Ok(None),
        }
    }

    fn require(&self, name: &str) -> PublishResult<&Template> {
        self.resolve(name)?
            .ok_or_else(|| PublishError::MissingTemplate(name.to_string()))
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Registers every template file below `dir`, named by its path relative
    /// to `dir` with `/` separators (`partials/header.njk`). Hidden files and
    /// directories are skipped. Reads block the calling thread.
    ///
    /// A file that fails to parse is kept aside rather than failing the load;
    /// rendering, including or analyzing it returns the parse error.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files and duplicate names.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> PublishResult<usize> {
        let dir = dir.as_ref();
        let mut loaded = 0;

        for entry in WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        {
            let entry = entry.map_err(io::Error::from)?;
            let path = entry.path();
            if entry.file_type().is_dir() || !has_template_extension(path) {
                continue;
            }

            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            debug!("Loading template {} from {:?}", name, path);
            let source = std::fs::read_to_string(path)?;
            if self.contains(&name) {
                return Err(PublishError::TemplateExists(name));
            }
            match Template::new(name.as_str(), source.as_str()) {
                Ok(template) => {
                    self.templates.insert(name, template);
                }
                Err(PublishError::Parse { source: error, .. }) => {
                    warn!("Template {} does not parse and is skipped: {}", name, error);
                    self.rejected.insert(name, Rejected { source, error });
                    continue;
                }
                Err(other) => return Err(other),
            }
            loaded += 1;
        }

        info!("Loaded {} templates from {:?}", loaded, dir);
        Ok(loaded)
    }

    /// Renders the template registered as `name`.
    ///
    /// # Errors
    ///
    /// [`PublishError::MissingTemplate`] if `name` is unknown, or any error
    /// raised while rendering.
    pub fn render(&self, name: &str, namespace: &Namespace) -> PublishResult<String> {
        let template = self.require(name)?;
        self.renderer().render(template, namespace)
    }

    /// Renders `source` directly; includes resolve against this engine.
    pub fn render_str(&self, source: &str, namespace: &Namespace) -> PublishResult<String> {
        let template = Template::new(INLINE_TEMPLATE_NAME, source)?;
        self.renderer().render(&template, namespace)
    }

    /// Missing variables of the template registered as `name`, with includes
    /// resolved against this engine.
    ///
    /// # Errors
    ///
    /// [`PublishError::MissingTemplate`] if `name` is unknown, or a parse
    /// error from an included template.
    pub async fn missing_variables(&self, name: &str, namespace: &Namespace) -> PublishResult<Vec<String>> {
        let template = self.require(name)?;
        find_missing_in_template(template.source(), namespace, self).await
    }

    fn renderer(&self) -> Renderer<'_> {
        Renderer::new(Some(self), self.date_locale)
    }
}

#[async_trait]
impl IncludeLoader for TemplateEngine {
    async fn load(&self, name: &str) -> io::Result<Option<String>> {
        let source = match self.templates.get(name) {
            Some(template) => Some(template.source()),
            None => self.rejected.get(name).map(|rejected| rejected.source.as_str()),
        };
        Ok(source.map(str::to_string))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

fn has_template_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext))
}

/// Renders a one-off template string, such as an output filename pattern.
///
/// ```
/// use publishpipe::{DateLocale, Namespace, render_template_string};
///
/// let mut namespace = Namespace::new();
/// namespace.insert("client", "Acme").insert("due", "21-02-2026");
///
/// let name = render_template_string(
///     r#"{{client}}-{{due | format("YYYYMMDD")}}.pdf"#,
///     &namespace,
///     DateLocale::En,
/// )
/// .unwrap();
/// assert_eq!(name, "Acme-20260221.pdf");
/// ```
pub fn render_template_string(source: &str, namespace: &Namespace, locale: DateLocale) -> PublishResult<String> {
    let template = Template::new(INLINE_TEMPLATE_NAME, source)?;
    Renderer::new(None, locale).render(&template, namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn namespace(value: serde_json::Value) -> Namespace {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_add_template_rejects_duplicates() {
        let mut engine = TemplateEngine::new();
        engine.add_template("a", "A").unwrap();
        assert!(matches!(
            engine.add_template("a", "B"),
            Err(PublishError::TemplateExists(name)) if name == "a"
        ));
        assert!(matches!(
            engine.add_template("b", "{% if %}"),
            Err(PublishError::Parse { template, .. }) if template == "b"
        ));
    }

    #[test]
    fn test_render_missing_template() {
        let engine = TemplateEngine::new();
        assert!(matches!(
            engine.render("nope", &Namespace::new()),
            Err(PublishError::MissingTemplate(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_includes_and_inheritance() {
        let mut engine = TemplateEngine::new();
        engine
            .add_template("base.njk", "<main>{% block body %}base{% endblock %}</main>")
            .unwrap();
        engine.add_template("row.njk", "[{{ item }}]").unwrap();
        engine
            .add_template(
                "page.njk",
                "{% extends 'base.njk' %}{% block body %}{% for item in items %}{% include 'row.njk' %}{% endfor %}{% endblock %}",
            )
            .unwrap();

        let output = engine.render("page.njk", &namespace(json!({ "items": [1, 2] }))).unwrap();
        assert_eq!(output, "<main>[1][2]</main>");
    }

    #[test]
    fn test_imported_macros() {
        let mut engine = TemplateEngine::new();
        engine
            .add_template("forms.njk", "{% macro input(name) %}<input name=\"{{ name }}\">{% endmacro %}")
            .unwrap();
        engine
            .add_template(
                "page.njk",
                "{% import 'forms.njk' as forms %}{% from 'forms.njk' import input as field %}{{ forms.input('q') }}{{ field('r') }}",
            )
            .unwrap();

        let output = engine.render("page.njk", &Namespace::new()).unwrap();
        assert_eq!(output, "<input name=\"q\"><input name=\"r\">");

        let err = engine
            .render_str("{% from 'forms.njk' import missing %}", &Namespace::new())
            .unwrap_err();
        assert!(matches!(err, PublishError::Render { .. }));
    }

    #[test]
    fn test_render_str_uses_engine_templates() {
        let mut engine = TemplateEngine::new();
        engine.add_template("sig.njk", "-- {{ author }}").unwrap();
        let output = engine
            .render_str("Hi{% include 'sig.njk' %}", &namespace(json!({ "author": "Jo" })))
            .unwrap();
        assert_eq!(output, "Hi-- Jo");
    }

    #[test]
    fn test_date_locale_applies_to_format_filter() {
        let engine = TemplateEngine::new().with_date_locale(DateLocale::Nl);
        let ns = crate::merge_layers([Some(&namespace(json!({ "due": "03-10-2026" })))]);
        assert_eq!(engine.render_str("{{ due | format('D MMMM YYYY') }}", &ns).unwrap(), "3 oktober 2026");
    }

    #[test]
    fn test_load_dir_names_templates_by_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("partials")).unwrap();
        std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("page.njk"), "{% include 'partials/head.njk' %}").unwrap();
        std::fs::write(dir.path().join("partials/head.njk"), "{{ title }}").unwrap();
        std::fs::write(dir.path().join(".cache/old.njk"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut engine = TemplateEngine::new();
        assert_eq!(engine.load_dir(dir.path()).unwrap(), 2);
        let mut names = engine.template_names().collect::<Vec<_>>();
        names.sort_unstable();
        assert_eq!(names, vec!["page.njk", "partials/head.njk"]);
        assert_eq!(engine.render("page.njk", &namespace(json!({ "title": "T" }))).unwrap(), "T");
    }

    #[tokio::test]
    async fn test_load_dir_keeps_unparsable_templates_aside() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.njk"), "{{ title }}").unwrap();
        std::fs::write(dir.path().join("draft.md"), "{% if %}").unwrap();
        std::fs::write(dir.path().join("uses-draft.njk"), "{% include 'draft.md' %}").unwrap();

        let mut engine = TemplateEngine::new();
        assert_eq!(engine.load_dir(dir.path()).unwrap(), 2);
        let ns = namespace(json!({ "title": "T" }));
        assert_eq!(engine.render("page.njk", &ns).unwrap(), "T");

        assert!(matches!(
            engine.render("draft.md", &ns),
            Err(PublishError::Parse { template, .. }) if template == "draft.md"
        ));
        assert!(matches!(
            engine.render("uses-draft.njk", &ns),
            Err(PublishError::Parse { template, .. }) if template == "draft.md"
        ));
        assert!(matches!(
            engine.missing_variables("uses-draft.njk", &ns).await,
            Err(PublishError::Parse { template, .. }) if template == "draft.md"
        ));
        assert!(matches!(
            engine.add_template("draft.md", "ok"),
            Err(PublishError::TemplateExists(name)) if name == "draft.md"
        ));
    }

    #[tokio::test]
    async fn test_missing_variables_follow_engine_includes() {
        let mut engine = TemplateEngine::new();
        engine.add_template("head.njk", "{{ title }}{{ subtitle | default('') }}").unwrap();
        engine
            .add_template("page.njk", "{% include 'head.njk' %}{% include 'foot.njk' %}{{ body }}")
            .unwrap();

        let missing = engine
            .missing_variables("page.njk", &namespace(json!({ "body": "b" })))
            .await
            .unwrap();
        assert_eq!(missing, vec!["include:foot.njk", "title"]);
    }

    #[test]
    fn test_render_template_string_without_includes() {
        let ns = namespace(json!({ "client": "Acme" }));
        assert_eq!(render_template_string("{{ client }}.pdf", &ns, DateLocale::En).unwrap(), "Acme.pdf");
        assert!(render_template_string("{% include 'x' %}", &ns, DateLocale::En).is_err());
    }
}

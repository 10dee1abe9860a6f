use crate::config::{ProjectConfig, Theme};
use crate::value::Namespace;
use crate::variables::merge_layers;

pub const DEFAULT_TEMPLATE: &str = "default";
pub const DEFAULT_PAGE_SIZE: &str = "A4";
pub const DEFAULT_PAGE_MARGIN: &str = "2.5cm 2cm 2cm 2cm";

/// How a document is laid out, resolved from config and frontmatter.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationModel {
    pub template_name: String,
    pub theme: Theme,
    pub title_page: bool,
    pub proposal: bool,
    pub page_size: String,
    pub page_margin: String,
    /// Config frontmatter with the document's frontmatter layered on top.
    pub template_vars: Namespace,
}

impl PresentationModel {
    pub fn build(config: &ProjectConfig, frontmatter: &Namespace) -> Self {
        Self {
            template_name: config
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            theme: config.theme.unwrap_or_default(),
            title_page: config.title_page.unwrap_or(false),
            proposal: config.proposal.unwrap_or(false),
            page_size: config
                .page
                .size
                .clone()
                .unwrap_or_else(|| DEFAULT_PAGE_SIZE.to_string()),
            page_margin: config
                .page
                .margin
                .clone()
                .unwrap_or_else(|| DEFAULT_PAGE_MARGIN.to_string()),
            template_vars: merge_layers([Some(&config.frontmatter), Some(frontmatter)]),
        }
    }

    /// The namespace a layout template renders against. Frontmatter keys
    /// override the presentation keys of the same name.
    pub fn layout_namespace(&self, content_html: &str, css: &str) -> Namespace {
        let mut defaults = Namespace::new();
        defaults
            .insert("content", content_html)
            .insert("css", css)
            .insert("titlePage", self.title_page)
            .insert("proposal", self.proposal)
            .insert("theme", self.theme.as_str())
            .insert("pageSize", self.page_size.as_str())
            .insert("pageMargin", self.page_margin.as_str());
        merge_layers([Some(&defaults), Some(&self.template_vars)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let model = PresentationModel::build(&ProjectConfig::default(), &Namespace::new());
        assert_eq!(model.template_name, "default");
        assert_eq!(model.theme, Theme::Light);
        assert!(!model.title_page);
        assert_eq!(model.page_size, "A4");
        assert_eq!(model.page_margin, "2.5cm 2cm 2cm 2cm");
        assert!(model.template_vars.is_empty());
    }

    #[test]
    fn test_frontmatter_layers() {
        let config = ProjectConfig::from_toml_str(
            r#"
            template = "sethdev"
            theme = "dark"
            title_page = true
            [frontmatter]
            author = "Seth"
            date = "01-03-2026"
            "#,
            Path::new("publishpipe.toml"),
        )
        .unwrap();
        let mut frontmatter = Namespace::new();
        frontmatter.insert("author", "Jo").insert("theme", "custom");

        let model = PresentationModel::build(&config, &frontmatter);
        assert_eq!(model.template_name, "sethdev");
        assert!(matches!(model.template_vars.get("date"), Some(Value::Date(_))));

        let ns = model.layout_namespace("<p>hi</p>", "body{}");
        assert_eq!(ns.get("author"), Some(&Value::from("Jo")));
        assert_eq!(ns.get("content"), Some(&Value::from("<p>hi</p>")));
        assert_eq!(ns.get("titlePage"), Some(&Value::Bool(true)));
        assert_eq!(ns.get("pageSize"), Some(&Value::from("A4")));
        // frontmatter wins over presentation keys
        assert_eq!(ns.get("theme"), Some(&Value::from("custom")));
    }
}

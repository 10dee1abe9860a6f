//! Project configuration read from `publishpipe.toml`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tracing::{debug, info};

use crate::date::DateLocale;
use crate::error::{PublishError, PublishResult};
use crate::value::Namespace;

pub const CONFIG_FILE_NAME: &str = "publishpipe.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

/// Where a multi-page web build starts a new page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitOn {
    Chapters,
    H1,
    Both,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Paper size such as `A4` or `letter`.
    pub size: Option<String>,
    /// CSS margin shorthand, e.g. `2.5cm 2cm`.
    pub margin: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub multipage: Option<bool>,
    pub split_on: Option<SplitOn>,
}

/// Settings of one project directory. Every field is optional so that a
/// project file can override only what it needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Presentation template directory name.
    pub template: Option<String>,
    pub title_page: Option<bool>,
    pub theme: Option<Theme>,
    pub page: PageConfig,
    /// Single markdown file.
    pub content: Option<String>,
    /// Ordered markdown files, joined into one document.
    pub chapters: Option<Vec<String>>,
    /// Source patterns for batch builds.
    pub source: Option<Vec<String>>,
    pub proposal: Option<bool>,
    pub toc: Option<bool>,
    /// Locale tag for month names, e.g. `en` or `nl`.
    pub date_locale: Option<String>,
    /// Defaults for document frontmatter.
    pub frontmatter: Namespace,
    /// Output filename template.
    pub output: Option<String>,
    pub web: WebConfig,
}

impl ProjectConfig {
    /// Parses configuration text; `path` only labels errors.
    pub fn from_toml_str(text: &str, path: &Path) -> PublishResult<Self> {
        toml::from_str(text).map_err(|source| PublishError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `overlay` wins key by key; `page`, `web` and `frontmatter` are merged
    /// one level deep.
    #[must_use]
    pub fn merged_with(self, overlay: Self) -> Self {
        let mut frontmatter = self.frontmatter;
        for (key, value) in overlay.frontmatter {
            frontmatter.insert(key, value);
        }

        Self {
            template: overlay.template.or(self.template),
            title_page: overlay.title_page.or(self.title_page),
            theme: overlay.theme.or(self.theme),
            page: PageConfig {
                size: overlay.page.size.or(self.page.size),
                margin: overlay.page.margin.or(self.page.margin),
            },
            content: overlay.content.or(self.content),
            chapters: overlay.chapters.or(self.chapters),
            source: overlay.source.or(self.source),
            proposal: overlay.proposal.or(self.proposal),
            toc: overlay.toc.or(self.toc),
            date_locale: overlay.date_locale.or(self.date_locale),
            frontmatter,
            output: overlay.output.or(self.output),
            web: WebConfig {
                multipage: overlay.web.multipage.or(self.web.multipage),
                split_on: overlay.web.split_on.or(self.web.split_on),
            },
        }
    }

    pub fn date_locale(&self) -> DateLocale {
        DateLocale::resolve(self.date_locale.as_deref())
    }
}

/// Reads `publishpipe.toml` from `dir`. A missing file yields the default config.
///
/// # Errors
///
/// [`PublishError::Config`] for malformed TOML, [`PublishError::Io`] when the
/// file exists but cannot be read.
pub async fn load_config<P: AsRef<Path>>(dir: P) -> PublishResult<ProjectConfig> {
    let path = dir.as_ref().join(CONFIG_FILE_NAME);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            info!("Loading config from {:?}", path);
            ProjectConfig::from_toml_str(&text, &path)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("No config at {:?}, using defaults", path);
            Ok(ProjectConfig::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Loads the root config as defaults with the project's config layered on top.
pub async fn load_project_config(root: &Path, project: Option<&Path>) -> PublishResult<ProjectConfig> {
    let root_config = load_config(root).await?;
    match project {
        Some(project) if !same_dir(project, root) => {
            let project_config = load_config(project).await?;
            Ok(root_config.merged_with(project_config))
        }
        _ => Ok(root_config),
    }
}

/// Caches a project's configuration as an immutable snapshot.
///
/// The file watcher calls [`ConfigStore::invalidate`] when a config file
/// changes; the next [`ConfigStore::snapshot`] reads it again.
#[derive(Debug)]
pub struct ConfigStore {
    root: PathBuf,
    project: Option<PathBuf>,
    current: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(root: P, project: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project,
            current: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<Arc<ProjectConfig>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    /// The current configuration, loading it on first use.
    pub async fn snapshot(&self) -> PublishResult<Arc<ProjectConfig>> {
        if let Some(config) = self.cached() {
            return Ok(config);
        }

        let config = Arc::new(load_project_config(&self.root, self.project.as_deref()).await?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&config));
        Ok(config)
    }

    /// Drops the cached snapshot. Snapshots already handed out stay valid.
    pub fn invalidate(&self) {
        debug!("Invalidating config snapshot for {:?}", self.root);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub async fn reload(&self) -> PublishResult<Arc<ProjectConfig>> {
        self.invalidate();
        self.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn write_config(dir: &Path, text: &str) {
        std::fs::write(dir.join(CONFIG_FILE_NAME), text).unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let config = ProjectConfig::from_toml_str(
            r#"
            template = "sethdev"
            title_page = true
            theme = "dark"
            chapters = ["01-intro.md", "02-scope.md"]
            date_locale = "nl"
            output = "{{ client }}-{{ date | format('YYYYMMDD') }}.pdf"

            [page]
            size = "letter"

            [web]
            multipage = true
            split_on = "h1"

            [frontmatter]
            client = "Acme"
            date = "21-02-2026"
            "#,
            Path::new(CONFIG_FILE_NAME),
        )
        .unwrap();

        assert_eq!(config.template.as_deref(), Some("sethdev"));
        assert_eq!(config.theme, Some(Theme::Dark));
        assert_eq!(config.page.size.as_deref(), Some("letter"));
        assert_eq!(config.page.margin, None);
        assert_eq!(config.web.split_on, Some(SplitOn::H1));
        assert_eq!(config.date_locale(), DateLocale::Nl);
        assert_eq!(config.frontmatter.get("client"), Some(&Value::from("Acme")));
        assert_eq!(config.chapters.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let err = ProjectConfig::from_toml_str("theme = \"sepia\"", Path::new("x/publishpipe.toml"))
            .unwrap_err();
        assert!(matches!(err, PublishError::Config { ref path, .. } if path == Path::new("x/publishpipe.toml")));
    }

    #[test]
    fn test_merge_overrides_and_nests() {
        let root = ProjectConfig::from_toml_str(
            r#"
            template = "default"
            theme = "dark"
            [page]
            size = "A4"
            margin = "1cm"
            [frontmatter]
            author = "Seth"
            company = "SethDev"
            "#,
            Path::new("root"),
        )
        .unwrap();
        let project = ProjectConfig::from_toml_str(
            r#"
            template = "offer"
            [page]
            margin = "2cm"
            [frontmatter]
            author = "Jo"
            "#,
            Path::new("project"),
        )
        .unwrap();

        let merged = root.merged_with(project);
        assert_eq!(merged.template.as_deref(), Some("offer"));
        assert_eq!(merged.theme, Some(Theme::Dark));
        assert_eq!(merged.page.size.as_deref(), Some("A4"));
        assert_eq!(merged.page.margin.as_deref(), Some("2cm"));
        assert_eq!(merged.frontmatter.get("author"), Some(&Value::from("Jo")));
        assert_eq!(merged.frontmatter.get("company"), Some(&Value::from("SethDev")));
    }

    #[tokio::test]
    async fn test_missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_config(dir.path()).await.unwrap(), ProjectConfig::default());
    }

    #[tokio::test]
    async fn test_load_project_config_layers_project_over_root() {
        let root = tempfile::tempdir().unwrap();
        let project = root.path().join("projects/acme");
        std::fs::create_dir_all(&project).unwrap();
        write_config(root.path(), "template = \"default\"\ntoc = true\n");
        write_config(&project, "template = \"acme\"\n");

        let config = load_project_config(root.path(), Some(&project)).await.unwrap();
        assert_eq!(config.template.as_deref(), Some("acme"));
        assert_eq!(config.toc, Some(true));

        let config = load_project_config(root.path(), Some(root.path())).await.unwrap();
        assert_eq!(config.template.as_deref(), Some("default"));
        let config = load_project_config(root.path(), None).await.unwrap();
        assert_eq!(config.template.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_store_serves_snapshot_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "template = \"one\"\n");
        let store = ConfigStore::new(dir.path(), None);

        let first = store.snapshot().await.unwrap();
        write_config(dir.path(), "template = \"two\"\n");
        assert_eq!(store.snapshot().await.unwrap().template.as_deref(), Some("one"));

        let reloaded = store.reload().await.unwrap();
        assert_eq!(reloaded.template.as_deref(), Some("two"));
        assert_eq!(first.template.as_deref(), Some("one"));
    }
}

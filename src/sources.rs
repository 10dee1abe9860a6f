//! Source selection and output naming for batch builds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::date::DateLocale;
use crate::engine::render_template_string;
use crate::error::{PublishError, PublishResult};
use crate::scanner::find_missing_in_text;
use crate::value::Namespace;
use crate::variables::merge_layers;

/// Variable bound to the source file stem in output filename templates.
pub const FILE_STEM_VARIABLE: &str = "fn";

const MARKDOWN_SUFFIX: &str = ".md";

/// Strips a trailing `.md`, ignoring case: `Offer.MD` becomes `Offer`.
pub fn normalize_source_name(name: &str) -> &str {
    let split = name.len().saturating_sub(MARKDOWN_SUFFIX.len());
    match (name.get(..split), name.get(split..)) {
        (Some(stem), Some(suffix)) if suffix.eq_ignore_ascii_case(MARKDOWN_SUFFIX) => stem,
        _ => name,
    }
}

/// The file name of `path` without its `.md` extension.
pub fn source_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(MARKDOWN_SUFFIX) {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// Keeps the sources whose stem equals `name` (with any `.md` removed).
pub fn filter_sources_by_name<'a>(sources: &'a [PathBuf], name: &str) -> Vec<&'a PathBuf> {
    let requested = normalize_source_name(name);
    sources
        .iter()
        .filter(|source| source_stem(source) == requested)
        .collect()
}

/// Where one source document will be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Variables the filename template references but cannot resolve.
    pub missing: Vec<String>,
}

/// Renders `output_template` once per source, with `fn` bound to the source
/// stem on top of `variables`, and resolves the result against `base_dir`.
///
/// # Errors
///
/// [`PublishError::OutputCollision`] if two sources produce the same output
/// path, or a template error from the filename template.
pub fn plan_outputs(
    output_template: &str,
    sources: &[PathBuf],
    variables: &Namespace,
    base_dir: &Path,
    locale: DateLocale,
) -> PublishResult<Vec<OutputPlan>> {
    let mut plans = Vec::with_capacity(sources.len());
    let mut by_output: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for source in sources {
        let mut file_layer = Namespace::new();
        file_layer.insert(FILE_STEM_VARIABLE, source_stem(source));
        let namespace = merge_layers([Some(variables), Some(&file_layer)]);

        let output = base_dir.join(render_template_string(output_template, &namespace, locale)?);
        by_output
            .entry(output.clone())
            .or_default()
            .push(source.clone());
        plans.push(OutputPlan {
            source: source.clone(),
            output,
            missing: find_missing_in_text(output_template, &namespace),
        });
    }

    if let Some((output, sources)) = by_output.into_iter().find(|(_, sources)| sources.len() > 1) {
        return Err(PublishError::OutputCollision { output, sources });
    }
    Ok(plans)
}

use std::fmt;

use owo_colors::OwoColorize;

/// Missing variables found while preparing one template for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVariables {
    /// Where the variables were looked up, e.g. `markdown`.
    pub context: String,
    /// Sorted paths and `include:` markers.
    pub missing: Vec<String>,
}

impl fmt::Display for MissingVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_missing_variable_warning(&self.context, &self.missing))
    }
}

/// Formats the terminal warning listing `missing` for `context`.
pub fn format_missing_variable_warning(context: &str, missing: &[String]) -> String {
    let header = format!(
        "⚠️ [publishpipe] Missing template variables in {context} ({})",
        missing.len()
    );
    std::iter::once(header.yellow().bold().to_string())
        .chain(missing.iter().map(|item| format!("  - {item}").yellow().to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

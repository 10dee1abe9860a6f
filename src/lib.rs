mod analyzer;
mod ast;
mod config;
mod date;
mod document;
mod engine;
mod error;
mod filters;
mod loader;
mod ops;
mod parser;
mod partial;
mod presentation;
mod render;
mod scanner;
mod sources;
mod stylesheet;
mod template;
mod value;
mod variables;
mod warn;

// Public exports.
pub use analyzer::{MISSING_INCLUDE_PREFIX, find_missing_in_template};
pub use ast::{BinaryOp, Branch, CompareOp, Expr, Macro, MacroParam, Node, OpaqueExpr, Statement};
pub use config::{
    CONFIG_FILE_NAME, ConfigStore, PageConfig, ProjectConfig, SplitOn, Theme, WebConfig, load_config,
    load_project_config,
};
pub use date::{
    DEFAULT_DATE_PATTERN, DateLocale, coerce_namespace, coerce_value, format_date, format_value,
    parse_fixed_format_date,
};
pub use document::{CHAPTER_SEPARATOR, Document, load_document, split_frontmatter};
pub use engine::{TemplateEngine, render_template_string};
pub use error::{ParseError, ParseErrorKind, PublishError, PublishResult};
pub use loader::{FsIncludeLoader, IncludeLoader};
pub use parser::parse_template;
pub use partial::{Truth, evaluate_condition};
pub use presentation::{DEFAULT_PAGE_MARGIN, DEFAULT_PAGE_SIZE, DEFAULT_TEMPLATE, PresentationModel};
pub use render::{LAYOUT_TEMPLATE, MARKDOWN_CONTEXT, MarkdownConverter, RenderPipeline, RenderedHtml};
pub use scanner::{extract_referenced_paths, find_missing_in_text};
pub use sources::{
    FILE_STEM_VARIABLE, OutputPlan, filter_sources_by_name, normalize_source_name, plan_outputs,
    source_stem,
};
pub use stylesheet::{
    FsStylesheetSource, STYLESHEET_FILE, StylesheetSource, parse_extends_directive, resolve_stylesheet,
};
pub use template::{INLINE_TEMPLATE_NAME, Template};
pub use value::{Namespace, Value};
pub use variables::merge_layers;
pub use warn::{MissingVariables, format_missing_variable_warning};

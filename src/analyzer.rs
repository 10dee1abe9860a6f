//! Reports the variables a template will look up but the namespace lacks.
//!
//! The analysis follows only the branches that can run for the given
//! namespace. Conditions the partial evaluator cannot decide keep every branch
//! live. Includes are followed through an [`IncludeLoader`]; each name is
//! analyzed at most once per call, so mutually including templates terminate.

use std::collections::{BTreeSet, HashSet};

use crate::ast::{Expr, Node, Statement};
use crate::error::{PublishError, PublishResult};
use crate::filters::DEFAULT_FILTERS;
use crate::loader::IncludeLoader;
use crate::parser::parse_template;
use crate::partial::{PartialEvaluator, Truth};
use crate::template::INLINE_TEMPLATE_NAME;
use crate::value::Namespace;

/// Prefix of the entry reported for an include that could not be loaded.
pub const MISSING_INCLUDE_PREFIX: &str = "include:";

/// An include found on a live path, waiting to be analyzed.
#[derive(Debug)]
struct PendingInclude {
    name: String,
    ignore_missing: bool,
    locals: Vec<String>,
}

/// Walks one parsed template, collecting missing paths and live includes.
struct Walk<'a> {
    namespace: &'a Namespace,
    missing: &'a mut BTreeSet<String>,
    includes: Vec<PendingInclude>,
}

impl<'a> Walk<'a> {
    fn new(namespace: &'a Namespace, missing: &'a mut BTreeSet<String>) -> Self {
        Self {
            namespace,
            missing,
            includes: Vec::new(),
        }
    }

    /// Names declared by `set` stay in `locals` for the following siblings;
    /// callers that open a scope truncate afterwards.
    fn walk_nodes(&mut self, nodes: &[Node], locals: &mut Vec<String>) {
        for node in nodes {
            self.walk_node(node, locals);
        }
    }

    fn walk_node(&mut self, node: &Node, locals: &mut Vec<String>) {
        match node {
            Node::Text(_) => {}
            Node::Output(expr) => self.collect(expr, locals),
            Node::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    let truth = PartialEvaluator::new(self.namespace, locals).truth(&branch.condition);
                    match truth {
                        Truth::True => {
                            self.walk_nodes(&branch.body, locals);
                            return;
                        }
                        Truth::False => {}
                        Truth::Unknown => self.walk_nodes(&branch.body, locals),
                    }
                }
                if let Some(otherwise) = otherwise {
                    self.walk_nodes(otherwise, locals);
                }
            }
            Node::Include {
                name,
                ignore_missing,
                with_context,
            } => {
                // Names that only resolve at render time cannot be analyzed.
                let Some(name) = PartialEvaluator::new(self.namespace, locals).string(name) else {
                    return;
                };
                self.includes.push(PendingInclude {
                    name,
                    ignore_missing: *ignore_missing,
                    locals: if *with_context { locals.clone() } else { Vec::new() },
                });
            }
            Node::Block { body, .. } => self.walk_nodes(body, locals),
            Node::Other(statement) => self.walk_statement(statement, locals),
        }
    }

    fn walk_statement(&mut self, statement: &Statement, locals: &mut Vec<String>) {
        for expr in statement.arguments() {
            self.collect(expr, locals);
        }
        for (binds, body) in statement.bodies() {
            let scope = locals.len();
            locals.extend(binds.into_iter().map(str::to_string));
            self.walk_nodes(body, locals);
            locals.truncate(scope);
        }
        locals.extend(statement.declares().into_iter().map(str::to_string));
    }

    fn collect(&mut self, expr: &Expr, locals: &[String]) {
        if let Expr::Filter { name, args, .. } = expr {
            if DEFAULT_FILTERS.contains(&name.as_str()) {
                // The target is optional; only the fallback can be missing.
                for arg in args {
                    self.collect(arg, locals);
                }
                return;
            }
        }

        if let Some(path) = expr.as_path() {
            let is_local = expr
                .root_name()
                .is_some_and(|root| locals.iter().any(|local| local == root));
            if !is_local && !self.namespace.has_value_at(&path) {
                self.missing.insert(path);
            }
        }

        for child in expr.children() {
            self.collect(child, locals);
        }
    }
}

fn parse(name: &str, source: &str) -> PublishResult<Vec<Node>> {
    parse_template(source).map_err(|source| PublishError::Parse {
        template: name.to_string(),
        source,
    })
}

/// Walks `nodes` and queues their live includes on `stack` in source order.
fn analyze_nodes(
    nodes: &[Node],
    namespace: &Namespace,
    mut locals: Vec<String>,
    missing: &mut BTreeSet<String>,
    stack: &mut Vec<PendingInclude>,
) {
    let mut walk = Walk::new(namespace, missing);
    walk.walk_nodes(nodes, &mut locals);
    // Reversed so the first include found is the next one popped.
    stack.extend(walk.includes.into_iter().rev());
}

/// Finds every variable path referenced on a live path of `source` that
/// `namespace` does not supply, following includes through `loader`.
///
/// Unloadable includes are reported as `include:<name>` unless marked
/// `ignore missing`; a loader I/O error is always reported. The result is
/// sorted and free of duplicates.
///
/// # Errors
///
/// Returns [`PublishError::Parse`] if `source` or any live include fails to
/// parse.
pub async fn find_missing_in_template<L>(
    source: &str,
    namespace: &Namespace,
    loader: &L,
) -> PublishResult<Vec<String>>
where
    L: IncludeLoader + ?Sized,
{
    let mut missing = BTreeSet::new();
    let mut seen = HashSet::new();
    let mut stack = Vec::new();

    let root = parse(INLINE_TEMPLATE_NAME, source)?;
    analyze_nodes(&root, namespace, Vec::new(), &mut missing, &mut stack);

    while let Some(include) = stack.pop() {
        if !seen.insert(include.name.clone()) {
            continue;
        }

        let source = match loader.load(&include.name).await {
            Ok(Some(source)) => source,
            Ok(None) if include.ignore_missing => continue,
            Ok(None) | Err(_) => {
                missing.insert(format!("{MISSING_INCLUDE_PREFIX}{}", include.name));
                continue;
            }
        };

        let nodes = parse(&include.name, &source)?;
        analyze_nodes(&nodes, namespace, include.locals, &mut missing, &mut stack);
    }

    Ok(missing.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    fn namespace(value: serde_json::Value) -> Namespace {
        serde_json::from_value(value).unwrap()
    }

    fn templates(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect()
    }

    async fn missing(source: &str, ns: serde_json::Value) -> Vec<String> {
        find_missing_in_template(source, &namespace(ns), &BTreeMap::new())
            .await
            .unwrap()
    }

    struct FailingLoader;

    #[async_trait]
    impl IncludeLoader for FailingLoader {
        async fn load(&self, _name: &str) -> io::Result<Option<String>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    /// Serves templates from a map and records every name it is asked for.
    struct RecordingLoader {
        templates: BTreeMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IncludeLoader for RecordingLoader {
        async fn load(&self, name: &str) -> io::Result<Option<String>> {
            self.requested.lock().unwrap().push(name.to_string());
            Ok(self.templates.get(name).cloned())
        }
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_prunes_dead_branches() {
        let source = "{% if flag %}{{ a }}{% else %}{{ b }}{% endif %}";
        assert_eq!(missing(source, json!({ "flag": true })).await, vec!["a"]);
        assert_eq!(missing(source, json!({ "flag": false })).await, vec!["b"]);
        assert!(missing(source, json!({ "flag": true, "a": 1 })).await.is_empty());
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_elif_chain_stops_at_first_true_branch() {
        let source = "{% if a %}{{ x }}{% elif b %}{{ y }}{% elif c %}{{ z }}{% else %}{{ w }}{% endif %}";
        assert_eq!(missing(source, json!({ "b": 1, "c": 1 })).await, vec!["y"]);
        assert_eq!(missing(source, json!({})).await, vec!["w"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_unknown_conditions_keep_every_branch() {
        let source = "{% if n > 3 %}{{ a }}{% elif flag %}{{ b }}{% else %}{{ c }}{% endif %}";
        assert_eq!(missing(source, json!({ "n": 5 })).await, vec!["a", "c"]);
        // an unknown branch followed by a true one skips the else
        assert_eq!(missing(source, json!({ "n": 5, "flag": true })).await, vec!["a", "b"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_defined_test_guards_its_body() {
        let source = "{% if client.vat is defined %}{{ client.vat }}{% endif %}{{ client.name }}";
        assert_eq!(missing(source, json!({ "client": {} })).await, vec!["client.name"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_reports_lookup_prefixes() {
        assert_eq!(missing("{{ client.address.city }}", json!({})).await, vec![
            "client",
            "client.address",
            "client.address.city"
        ]);
        assert_eq!(
            missing("{{ client.address.city }}", json!({ "client": { "address": {} } })).await,
            vec!["client.address.city"]
        );
        assert_eq!(missing("{{ items[0] }}", json!({ "items": ["x"] })).await, Vec::<String>::new());
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_default_filter_marks_target_optional() {
        assert!(missing("{{ title | default('Untitled') }}", json!({})).await.is_empty());
        assert!(missing("{{ title | d('x', true) }}", json!({})).await.is_empty());
        assert_eq!(missing("{{ title | default(fallback) }}", json!({})).await, vec!["fallback"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_filter_names_and_arguments() {
        assert_eq!(missing("{{ due | format(pattern) }}", json!({ "due": "01-01-2026" })).await, vec![
            "pattern"
        ]);
        assert!(missing("{{ name | upper }}", json!({ "name": "x" })).await.is_empty());
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_walks_loop_bodies_without_reporting_locals() {
        let source = "{% for item in items %}{{ item.name }}{{ loop.index }}{{ currency }}{% else %}{{ empty }}{% endfor %}";
        assert_eq!(missing(source, json!({ "items": [] })).await, vec!["currency", "empty"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_set_declares_a_local_for_later_siblings() {
        let source = "{{ total }}{% set total = 3 %}{{ total }}";
        assert_eq!(missing(source, json!({})).await, vec!["total"]);
        let source = "{% set label = name %}{% if label %}{{ a }}{% else %}{{ b }}{% endif %}";
        assert_eq!(missing(source, json!({ "name": "x" })).await, vec!["a", "b"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_follows_includes_on_live_paths() {
        let loader = templates(&[
            ("header.njk", "{{ title }}{% include 'logo.njk' %}"),
            ("logo.njk", "{{ logo.url }}"),
            ("footer.njk", "{{ footer }}"),
        ]);
        let source = "{% include 'header.njk' %}{% if false %}{% include 'footer.njk' %}{% endif %}";
        let result = find_missing_in_template(source, &namespace(json!({ "logo": {} })), &loader)
            .await
            .unwrap();
        assert_eq!(result, vec!["logo.url", "title"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_include_names_from_namespace() {
        let loader = templates(&[("dark.njk", "{{ accent }}")]);
        let source = "{% include theme ~ '.njk' %}{% include partial %}{% include skipped %}";
        let result = find_missing_in_template(
            source,
            &namespace(json!({ "theme": "dark", "partial": "dark.njk" })),
            &loader,
        )
        .await
        .unwrap();
        // `theme ~ '.njk'` cannot be evaluated; `skipped` is undefined
        assert_eq!(result, vec!["accent"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_mutual_includes_terminate() {
        let loader = templates(&[
            ("a.njk", "{{ from_a }}{% include 'b.njk' %}"),
            ("b.njk", "{{ from_b }}{% include 'a.njk' %}"),
        ]);
        let result = find_missing_in_template("{% include 'a.njk' %}", &Namespace::new(), &loader)
            .await
            .unwrap();
        assert_eq!(result, vec!["from_a", "from_b"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_missing_includes() {
        let loader = templates(&[("empty.njk", "")]);
        let source = "{% include 'nope.njk' %}{% include 'gone.njk' ignore missing %}{% include 'empty.njk' %}";
        let result = find_missing_in_template(source, &Namespace::new(), &loader)
            .await
            .unwrap();
        assert_eq!(result, vec!["include:nope.njk"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_loader_errors_are_reported_as_missing_includes() {
        let source = "{% include 'a.njk' ignore missing %}{{ x }}";
        let result = find_missing_in_template(source, &Namespace::new(), &FailingLoader)
            .await
            .unwrap();
        assert_eq!(result, vec!["include:a.njk", "x"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_locals_carry_into_included_templates() {
        let loader = templates(&[("row.njk", "{{ row.total }}{{ vat }}")]);
        let with = "{% for row in rows %}{% include 'row.njk' %}{% endfor %}";
        let result = find_missing_in_template(with, &Namespace::new(), &loader)
            .await
            .unwrap();
        assert_eq!(result, vec!["vat"]);

        let without = "{% for row in rows %}{% include 'row.njk' without context %}{% endfor %}";
        let result = find_missing_in_template(without, &Namespace::new(), &loader)
            .await
            .unwrap();
        assert_eq!(result, vec!["row", "row.total", "vat"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_parse_errors_propagate() {
        let err = find_missing_in_template("{% if %}", &Namespace::new(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Parse { ref template, .. } if template == INLINE_TEMPLATE_NAME));

        let loader = templates(&[("broken.njk", "{{ a")]);
        let err = find_missing_in_template("{% include 'broken.njk' %}", &Namespace::new(), &loader)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Parse { ref template, .. } if template == "broken.njk"));
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_walks_blocks_and_nested_constructs() {
        let source = "{% extends 'base.njk' %}{% block body %}{% for x in xs %}{% if x.on %}{{ deep }}{% endif %}{% endfor %}{% endblock %}";
        assert_eq!(missing(source, json!({ "xs": [] })).await, vec!["deep"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_includes_load_in_depth_first_order() {
        let loader = RecordingLoader {
            templates: templates(&[
                ("A", "{% include 'C' %}{% include 'B' %}"),
                ("B", "{{ b }}"),
                ("C", "{% include 'D' %}"),
                ("D", "{{ d }}"),
                ("E", "{{ e }}"),
            ]),
            requested: Mutex::new(Vec::new()),
        };
        let source = "{% include 'A' %}{% for x in xs %}{% include 'B' %}{% endfor %}{% include 'E' %}";
        let result = find_missing_in_template(source, &namespace(json!({ "xs": [] })), &loader)
            .await
            .unwrap();

        assert_eq!(result, vec!["b", "d", "e"]);
        assert_eq!(*loader.requested.lock().unwrap(), vec!["A", "C", "D", "B", "E"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_filter_block_body_is_walked() {
        assert_eq!(missing("{% filter upper %}{{ z }}{% endfilter %}", json!({})).await, vec!["z"]);
        assert_eq!(
            missing("{% filter replace(old, 'x') %}{{ z }}{% endfilter %}", json!({ "z": 1 })).await,
            vec!["old"]
        );
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_macro_params_are_locals() {
        assert!(missing("{% macro m() %}{% endmacro %}", json!({})).await.is_empty());

        let source = "{% macro field(label, kind=default_kind) %}{{ label }}{{ kind }}{{ site }}{{ caller() }}{% endmacro %}{{ field('Name') }}";
        assert_eq!(missing(source, json!({})).await, vec!["default_kind", "site"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_call_block_binds_its_params() {
        let source = "{% macro table(items) %}{% for r in items %}{{ caller(r) }}{% endfor %}{% endmacro %}{% call(row) table(rows) %}{{ row.name }}{{ footer }}{% endcall %}";
        assert_eq!(missing(source, json!({})).await, vec!["footer", "rows"]);
    }

    #[tokio::test]
    #[ntest::timeout(1000)]
    async fn test_imported_names_are_locals() {
        let source = "{% import 'forms.njk' as forms %}{{ forms.input('q') }}{% from 'forms.njk' import label as lbl, hint %}{{ lbl() }}{{ hint() }}{{ other() }}";
        assert_eq!(missing(source, json!({})).await, vec!["other"]);
    }
}

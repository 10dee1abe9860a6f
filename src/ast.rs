use crate::value::Value;

/// Comparison operators, including membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    /// `~` string concatenation.
    Concat,
}

/// A template expression.
///
/// The variants the analyzer reasons about are listed directly; everything
/// else lives in [`OpaqueExpr`] and is only reachable through
/// [`Expr::children`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A bare name such as `client`.
    Var(String),
    /// `base.key` or `base[key]`.
    Lookup { base: Box<Expr>, key: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// `target is defined`. `is undefined` parses as `Not(Defined(..))`.
    Defined(Box<Expr>),
    /// `target | name(args...)`
    Filter {
        name: String,
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    Other(OpaqueExpr),
}

/// Expressions the renderer evaluates but the analyzer treats as unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum OpaqueExpr {
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// `target is [not] name(args...)` for tests other than `defined`/`undefined`.
    Test {
        name: String,
        target: Box<Expr>,
        args: Vec<Expr>,
        negated: bool,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// `then if condition else otherwise`
    InlineIf {
        then: Box<Expr>,
        condition: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// The dotted path this expression names, if it is a plain lookup chain.
    ///
    /// `a.b`, `a["b"]` and `a[0]` yield `a.b` and `a.0`; lookups with computed
    /// keys yield `None`.
    pub fn as_path(&self) -> Option<String> {
        match self {
            Self::Var(name) => Some(name.clone()),
            Self::Lookup { base, key } => {
                let base = base.as_path()?;
                match key.as_ref() {
                    Self::Literal(Value::String(segment)) => Some(format!("{base}.{segment}")),
                    Self::Literal(Value::Int(index)) => Some(format!("{base}.{index}")),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// The root variable name of a lookup chain (`a` for `a.b[c]`).
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Self::Var(name) => Some(name),
            Self::Lookup { base, .. } => base.root_name(),
            _ => None,
        }
    }

    /// Direct sub-expressions, in source order.
    pub fn children(&self) -> Vec<&Self> {
        match self {
            Self::Literal(_) | Self::Var(_) => Vec::new(),
            Self::Lookup { base, key } => vec![base.as_ref(), key.as_ref()],
            Self::And(left, right) | Self::Or(left, right) => vec![left.as_ref(), right.as_ref()],
            Self::Not(inner) | Self::Defined(inner) => vec![inner.as_ref()],
            Self::Filter { target, args, .. } => {
                let mut children = vec![target.as_ref()];
                children.extend(args);
                children
            }
            Self::Other(opaque) => opaque.children(),
        }
    }
}

impl OpaqueExpr {
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Compare { left, right, .. } | Self::Binary { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Self::Neg(inner) => vec![inner.as_ref()],
            Self::Call { callee, args } => {
                let mut children = vec![callee.as_ref()];
                children.extend(args);
                children
            }
            Self::Test { target, args, .. } => {
                let mut children = vec![target.as_ref()];
                children.extend(args);
                children
            }
            Self::List(items) => items.iter().collect(),
            Self::Dict(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
            Self::InlineIf {
                then,
                condition,
                otherwise,
            } => {
                let mut children = vec![then.as_ref(), condition.as_ref()];
                children.extend(otherwise.as_deref());
                children
            }
        }
    }
}

/// One `if`/`elif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
}

/// A template node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text between tags, whitespace control already applied.
    Text(String),
    /// `{{ expr }}`
    Output(Expr),
    /// `if` / `elif` arms in source order, plus the optional `else` body.
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    Include {
        name: Expr,
        ignore_missing: bool,
        with_context: bool,
    },
    Block { name: String, body: Vec<Node> },
    Other(Statement),
}

/// A macro parameter, optionally with a default value.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Expr>,
}

/// `{% macro name(params) %}body{% endmacro %}`
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: Vec<Node>,
}

impl Macro {
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|param| param.name.as_str())
    }
}

/// Name bound inside a macro to the body of the `call` block invoking it.
pub const CALLER: &str = "caller";

/// Statements the analyzer only scopes: it binds their names and walks their bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    For {
        targets: Vec<String>,
        iter: Expr,
        body: Vec<Node>,
        otherwise: Option<Vec<Node>>,
    },
    Set { name: String, value: Expr },
    Extends(Expr),
    Macro(Macro),
    /// `{% call(params) target(args) %}body{% endcall %}`
    Call {
        params: Vec<MacroParam>,
        call: Expr,
        body: Vec<Node>,
    },
    /// `{% filter name(args) %}body{% endfilter %}`
    FilterBlock {
        name: String,
        args: Vec<Expr>,
        body: Vec<Node>,
    },
    /// `{% import template as alias %}`
    Import { template: Expr, alias: String },
    /// `{% from template import name as alias, ... %}` as `(name, alias)` pairs.
    FromImport {
        template: Expr,
        names: Vec<(String, String)>,
    },
}

impl Statement {
    /// Names introduced into the enclosing scope by this statement.
    pub fn declares(&self) -> Vec<&str> {
        match self {
            Self::Set { name, .. } | Self::Macro(Macro { name, .. }) => vec![name.as_str()],
            Self::Import { alias, .. } => vec![alias.as_str()],
            Self::FromImport { names, .. } => names.iter().map(|(_, alias)| alias.as_str()).collect(),
            Self::For { .. } | Self::Extends(_) | Self::Call { .. } | Self::FilterBlock { .. } => Vec::new(),
        }
    }

    /// Nested bodies, each paired with the names bound only inside it.
    pub fn bodies(&self) -> Vec<(Vec<&str>, &[Node])> {
        match self {
            Self::For {
                targets,
                body,
                otherwise,
                ..
            } => {
                let binds: Vec<&str> = targets.iter().map(String::as_str).chain(["loop"]).collect();
                let mut bodies = vec![(binds, body.as_slice())];
                if let Some(otherwise) = otherwise {
                    bodies.push((Vec::new(), otherwise.as_slice()));
                }
                bodies
            }
            Self::Macro(definition) => {
                let binds: Vec<&str> = definition.param_names().chain([CALLER]).collect();
                vec![(binds, definition.body.as_slice())]
            }
            Self::Call { params, body, .. } => {
                let binds: Vec<&str> = params.iter().map(|param| param.name.as_str()).collect();
                vec![(binds, body.as_slice())]
            }
            Self::FilterBlock { body, .. } => vec![(Vec::new(), body.as_slice())],
            Self::Set { .. } | Self::Extends(_) | Self::Import { .. } | Self::FromImport { .. } => Vec::new(),
        }
    }

    /// Expressions evaluated where the statement stands whose variables
    /// count as references: call targets, filter arguments and parameter
    /// defaults.
    pub fn arguments(&self) -> Vec<&Expr> {
        match self {
            Self::Macro(definition) => definition
                .params
                .iter()
                .filter_map(|param| param.default.as_ref())
                .collect(),
            Self::Call { params, call, .. } => params
                .iter()
                .filter_map(|param| param.default.as_ref())
                .chain([call])
                .collect(),
            Self::FilterBlock { args, .. } => args.iter().collect(),
            Self::For { .. }
            | Self::Set { .. }
            | Self::Extends(_)
            | Self::Import { .. }
            | Self::FromImport { .. } => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    fn attr(base: Box<Expr>, key: &str) -> Box<Expr> {
        Box::new(Expr::Lookup {
            base,
            key: Box::new(Expr::Literal(Value::from(key))),
        })
    }

    #[test]
    fn test_as_path_for_lookup_chains() {
        assert_eq!(attr(attr(var("a"), "b"), "c").as_path().as_deref(), Some("a.b.c"));

        let indexed = Expr::Lookup {
            base: var("items"),
            key: Box::new(Expr::Literal(Value::Int(0))),
        };
        assert_eq!(indexed.as_path().as_deref(), Some("items.0"));

        let computed = Expr::Lookup {
            base: var("items"),
            key: var("i"),
        };
        assert_eq!(computed.as_path(), None);
        assert_eq!(computed.root_name(), Some("items"));
    }

    #[test]
    fn test_children_cover_opaque_expressions() {
        let expr = Expr::Other(OpaqueExpr::InlineIf {
            then: var("a"),
            condition: var("b"),
            otherwise: Some(var("c")),
        });
        let names: Vec<_> = expr.children().iter().filter_map(|e| e.root_name()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_statement_scopes() {
        let stmt = Statement::For {
            targets: vec!["item".to_string()],
            iter: Expr::Var("items".to_string()),
            body: vec![Node::Text("x".to_string())],
            otherwise: Some(Vec::new()),
        };
        let bodies = stmt.bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0].0, ["item", "loop"]);
        assert!(bodies[1].0.is_empty());
        assert!(stmt.declares().is_empty());
        assert!(stmt.arguments().is_empty());

        let set = Statement::Set {
            name: "total".to_string(),
            value: Expr::Literal(Value::Int(1)),
        };
        assert_eq!(set.declares(), ["total"]);
    }

    #[test]
    fn test_macro_scopes() {
        let definition = Statement::Macro(Macro {
            name: "field".to_string(),
            params: vec![
                MacroParam {
                    name: "label".to_string(),
                    default: None,
                },
                MacroParam {
                    name: "kind".to_string(),
                    default: Some(Expr::Var("default_kind".to_string())),
                },
            ],
            body: Vec::new(),
        });
        assert_eq!(definition.declares(), ["field"]);
        assert_eq!(definition.bodies()[0].0, ["label", "kind", "caller"]);
        assert_eq!(definition.arguments(), [&Expr::Var("default_kind".to_string())]);

        let import = Statement::FromImport {
            template: Expr::Literal(Value::from("forms.njk")),
            names: vec![
                ("field".to_string(), "field".to_string()),
                ("button".to_string(), "btn".to_string()),
            ],
        };
        assert_eq!(import.declares(), ["field", "btn"]);
        assert!(import.bodies().is_empty());
    }
}

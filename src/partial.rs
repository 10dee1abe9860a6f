//! Best-effort evaluation of template expressions without rendering.
//!
//! Only literals, lookups, `and`/`or`/`not` and `is defined` are understood.
//! Anything else, and any name bound by the template itself, is unknown.

use crate::ast::Expr;
use crate::value::{Namespace, Value};

/// Three-valued truth used to decide which conditional branches are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    const fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    const fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }

    const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Unknown,
        }
    }

    const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Partial {
    Known(Value),
    Unknown,
}

impl Partial {
    fn truth(&self) -> Truth {
        match self {
            Self::Known(value) => Truth::from_bool(value.is_truthy()),
            Self::Unknown => Truth::Unknown,
        }
    }
}

impl From<Truth> for Partial {
    fn from(truth: Truth) -> Self {
        match truth {
            Truth::True => Self::Known(Value::Bool(true)),
            Truth::False => Self::Known(Value::Bool(false)),
            Truth::Unknown => Self::Unknown,
        }
    }
}

/// Evaluates expressions against a namespace, treating `locals` as unknowable.
pub(crate) struct PartialEvaluator<'a> {
    namespace: &'a Namespace,
    locals: &'a [String],
}

impl<'a> PartialEvaluator<'a> {
    pub(crate) const fn new(namespace: &'a Namespace, locals: &'a [String]) -> Self {
        Self { namespace, locals }
    }

    fn is_local(&self, expr: &Expr) -> bool {
        expr.root_name()
            .is_some_and(|root| self.locals.iter().any(|local| local == root))
    }

    fn evaluate(&self, expr: &Expr) -> Partial {
        if self.is_local(expr) {
            return Partial::Unknown;
        }

        match expr {
            Expr::Literal(value) => Partial::Known(value.clone()),
            Expr::Var(_) | Expr::Lookup { .. } => self.lookup(expr),
            Expr::And(left, right) => self.truth(left).and(self.truth(right)).into(),
            Expr::Or(left, right) => self.truth(left).or(self.truth(right)).into(),
            Expr::Not(inner) => self.truth(inner).not().into(),
            Expr::Defined(target) if self.is_local(target) => Partial::Unknown,
            Expr::Defined(target) => match target.as_path() {
                Some(path) => Truth::from_bool(self.namespace.has_value_at(&path)).into(),
                None => match self.evaluate(target) {
                    Partial::Known(value) => Truth::from_bool(!value.is_undefined()).into(),
                    Partial::Unknown => Partial::Unknown,
                },
            },
            Expr::Filter { .. } | Expr::Other(_) => Partial::Unknown,
        }
    }

    fn lookup(&self, expr: &Expr) -> Partial {
        if let Some(path) = expr.as_path() {
            return Partial::Known(self.namespace.get_path(&path).cloned().unwrap_or_default());
        }

        let Expr::Lookup { base, key } = expr else {
            return Partial::Unknown;
        };
        match (self.evaluate(base), self.evaluate(key)) {
            (Partial::Known(base), Partial::Known(key)) => Partial::Known(
                base.get_segment(&key.to_string())
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => Partial::Unknown,
        }
    }

    /// Truthiness of `expr`, or [`Truth::Unknown`] when it cannot be decided.
    pub(crate) fn truth(&self, expr: &Expr) -> Truth {
        self.evaluate(expr).truth()
    }

    /// The non-empty string `expr` evaluates to, if any.
    pub(crate) fn string(&self, expr: &Expr) -> Option<String> {
        match self.evaluate(expr) {
            Partial::Known(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

/// Decides `condition` against `namespace` with no template-local names in scope.
///
/// ```
/// use publishpipe::{Namespace, Truth, evaluate_condition, parse_template, Node};
///
/// let nodes = parse_template("{% if flag and other is defined %}{% endif %}").unwrap();
/// let Node::If { branches, .. } = &nodes[0] else { unreachable!() };
///
/// let mut ns = Namespace::new();
/// ns.insert("flag", true);
/// assert_eq!(evaluate_condition(&branches[0].condition, &ns), Truth::False);
/// ```
pub fn evaluate_condition(condition: &Expr, namespace: &Namespace) -> Truth {
    PartialEvaluator::new(namespace, &[]).truth(condition)
}

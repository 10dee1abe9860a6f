use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::{CALLER, Expr, Macro, Node, OpaqueExpr, Statement};
use crate::date::DateLocale;
use crate::engine::TemplateEngine;
use crate::error::{PublishError, PublishResult};
use crate::filters::{apply_filter, apply_test};
use crate::ops;
use crate::parser::parse_template;
use crate::value::{Namespace, Value};

/// Name given to templates rendered straight from a string.
pub const INLINE_TEMPLATE_NAME: &str = "<inline>";

/// Bounds nested includes and `extends` chains, which may be cyclic at render time.
const MAX_NESTING_DEPTH: usize = 64;

/// A parsed template that can be rendered against a [`Namespace`].
///
/// # Example
///
/// ```rust
/// use publishpipe::{Namespace, Template};
///
/// let template = Template::new("greeting", "Hello, {{ name }}!").unwrap();
///
/// let mut namespace = Namespace::new();
/// namespace.insert("name", "World");
///
/// assert_eq!(template.render(&namespace).unwrap(), "Hello, World!");
/// ```
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Parse`] carrying `name` if the syntax is invalid.
    pub fn new<N: Into<String>, S: Into<String>>(name: N, source: S) -> PublishResult<Self> {
        let name = name.into();
        let source = source.into();
        let nodes = parse_template(&source).map_err(|source| PublishError::Parse {
            template: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            source,
            nodes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Renders without access to other templates; any include or `extends` fails.
    pub fn render(&self, namespace: &Namespace) -> PublishResult<String> {
        Renderer::new(None, DateLocale::default()).render(self, namespace)
    }
}

/// A macro in scope, with the variables visible where it was bound.
#[derive(Debug, Clone)]
struct Callable {
    definition: Rc<Macro>,
    captured: BTreeMap<String, Value>,
}

impl Callable {
    fn new(definition: Rc<Macro>) -> Self {
        Self {
            definition,
            captured: BTreeMap::new(),
        }
    }
}

/// Variable lookup during rendering: template-local scopes over the global namespace.
struct Context<'n> {
    globals: &'n Namespace,
    scopes: Vec<BTreeMap<String, Value>>,
    /// Keyed by the name they are called as, e.g. `field` or `forms.field`.
    macros: BTreeMap<String, Callable>,
}

impl<'n> Context<'n> {
    fn new(globals: &'n Namespace) -> Self {
        Self {
            globals,
            scopes: vec![BTreeMap::new()],
            macros: BTreeMap::new(),
        }
    }

    /// Every template-local variable currently visible, innermost winning.
    fn locals(&self) -> BTreeMap<String, Value> {
        self.scopes
            .iter()
            .flat_map(|scope| scope.iter().map(|(name, value)| (name.clone(), value.clone())))
            .collect()
    }

    fn lookup(&self, name: &str) -> Value {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), value);
        }
    }

    fn push(&mut self, scope: BTreeMap<String, Value>) {
        self.scopes.push(scope);
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }
}

type BlockOverrides<'t> = HashMap<&'t str, &'t [Node]>;

/// Collects every block in `nodes`; the first definition of a name wins.
fn collect_blocks<'t>(nodes: &'t [Node], blocks: &mut BlockOverrides<'t>) {
    for node in nodes {
        if let Node::Block { name, body } = node {
            blocks.entry(name.as_str()).or_insert(body.as_slice());
            collect_blocks(body, blocks);
        }
    }
}

fn parent_of(template: &Template) -> Option<&Expr> {
    template.nodes.iter().find_map(|node| match node {
        Node::Other(Statement::Extends(parent)) => Some(parent),
        _ => None,
    })
}

fn loop_value(index: usize, length: usize) -> Value {
    let mut entries = BTreeMap::new();
    entries.insert("index".to_string(), Value::from(index + 1));
    entries.insert("index0".to_string(), Value::from(index));
    entries.insert("revindex".to_string(), Value::from(length - index));
    entries.insert("revindex0".to_string(), Value::from(length - index - 1));
    entries.insert("first".to_string(), Value::Bool(index == 0));
    entries.insert("last".to_string(), Value::Bool(index + 1 == length));
    entries.insert("length".to_string(), Value::from(length));
    Value::Map(entries)
}

/// Renders templates, resolving includes and parents from an optional engine.
pub(crate) struct Renderer<'e> {
    engine: Option<&'e TemplateEngine>,
    locale: DateLocale,
    macro_depth: Cell<usize>,
}

impl<'e> Renderer<'e> {
    pub(crate) const fn new(engine: Option<&'e TemplateEngine>, locale: DateLocale) -> Self {
        Self {
            engine,
            locale,
            macro_depth: Cell::new(0),
        }
    }

    pub(crate) fn render(&self, template: &Template, namespace: &Namespace) -> PublishResult<String> {
        let mut context = Context::new(namespace);
        let mut output = String::new();
        self.render_document(template, &mut context, &mut output, 0)?;
        Ok(output)
    }

    fn lookup_template(&self, name: &str) -> PublishResult<Option<&'e Template>> {
        match self.engine {
            Some(engine) => engine.resolve(name),
            None => Ok(None),
        }
    }

    /// Renders `template`, following its `extends` chain to the root layout.
    fn render_document<'t>(
        &'t self,
        template: &'t Template,
        context: &mut Context<'_>,
        output: &mut String,
        depth: usize,
    ) -> PublishResult<()> {
        let mut blocks = BlockOverrides::new();
        let mut current = template;
        let mut depth = depth;

        while let Some(parent) = parent_of(current) {
            collect_blocks(&current.nodes, &mut blocks);
            let parent_name = self.eval(parent, context)?.to_string();
            current = self
                .lookup_template(&parent_name)?
                .ok_or(PublishError::MissingTemplate(parent_name))?;
            depth += 1;
            if depth > MAX_NESTING_DEPTH {
                return Err(PublishError::render(format!(
                    "template nesting deeper than {MAX_NESTING_DEPTH} levels in '{}'",
                    template.name
                )));
            }
        }

        self.render_nodes(&current.nodes, context, output, &blocks, depth)
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        context: &mut Context<'_>,
        output: &mut String,
        blocks: &BlockOverrides<'_>,
        depth: usize,
    ) -> PublishResult<()> {
        for node in nodes {
            self.render_node(node, context, output, blocks, depth)?;
        }
        Ok(())
    }

    fn render_node(
        &self,
        node: &Node,
        context: &mut Context<'_>,
        output: &mut String,
        blocks: &BlockOverrides<'_>,
        depth: usize,
    ) -> PublishResult<()> {
        match node {
            Node::Text(text) => output.push_str(text),
            Node::Output(expr) => {
                let value = self.eval(expr, context)?;
                output.push_str(&value.to_string());
            }
            Node::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    if self.eval(&branch.condition, context)?.is_truthy() {
                        return self.render_nodes(&branch.body, context, output, blocks, depth);
                    }
                }
                if let Some(otherwise) = otherwise {
                    self.render_nodes(otherwise, context, output, blocks, depth)?;
                }
            }
            Node::Include {
                name,
                ignore_missing,
                with_context,
            } => {
                let name = self.eval(name, context)?.to_string();
                let Some(included) = self.lookup_template(&name)? else {
                    if *ignore_missing {
                        return Ok(());
                    }
                    return Err(PublishError::MissingTemplate(name));
                };
                if depth >= MAX_NESTING_DEPTH {
                    return Err(PublishError::render(format!(
                        "include of '{name}' nested deeper than {MAX_NESTING_DEPTH} levels"
                    )));
                }

                if *with_context {
                    context.push(BTreeMap::new());
                    let result = self.render_document(included, context, output, depth + 1);
                    context.pop();
                    result?;
                } else {
                    let empty = Namespace::new();
                    let mut isolated = Context::new(&empty);
                    self.render_document(included, &mut isolated, output, depth + 1)?;
                }
            }
            Node::Block { name, body } => {
                let body = blocks.get(name.as_str()).copied().unwrap_or(body);
                self.render_nodes(body, context, output, blocks, depth)?;
            }
            Node::Other(Statement::For {
                targets,
                iter,
                body,
                otherwise,
            }) => {
                self.render_for(targets, iter, body, otherwise.as_deref(), context, output, blocks, depth)?;
            }
            Node::Other(Statement::Set { name, value }) => {
                let value = self.eval(value, context)?;
                context.set(name, value);
            }
            // Parents are resolved by render_document.
            Node::Other(Statement::Extends(_)) => {}
            Node::Other(Statement::Macro(definition)) => {
                context
                    .macros
                    .insert(definition.name.clone(), Callable::new(Rc::new(definition.clone())));
            }
            Node::Other(Statement::Call { params, call, body }) => {
                let caller = Callable {
                    definition: Rc::new(Macro {
                        name: CALLER.to_string(),
                        params: params.clone(),
                        body: body.clone(),
                    }),
                    captured: context.locals(),
                };
                let Expr::Other(OpaqueExpr::Call { callee, args }) = call else {
                    return Err(PublishError::render("call blocks must call a macro"));
                };
                let callable = Self::resolve_macro(callee, context)?;
                let args = self.eval_all(args, context)?;
                output.push_str(&self.invoke(&callable, args, context, Some(caller))?);
            }
            Node::Other(Statement::FilterBlock { name, args, body }) => {
                let mut rendered = String::new();
                self.render_nodes(body, context, &mut rendered, blocks, depth)?;
                let args = self.eval_all(args, context)?;
                let value = apply_filter(name, Value::String(rendered), &args, self.locale)?;
                output.push_str(&value.to_string());
            }
            Node::Other(Statement::Import { template, alias }) => {
                for definition in self.exported_macros(template, context)? {
                    context.macros.insert(
                        format!("{alias}.{}", definition.name),
                        Callable::new(Rc::new(definition.clone())),
                    );
                }
            }
            Node::Other(Statement::FromImport { template, names }) => {
                let exported = self.exported_macros(template, context)?;
                for (name, alias) in names {
                    let definition = exported
                        .iter()
                        .find(|definition| &definition.name == name)
                        .ok_or_else(|| PublishError::render(format!("cannot import '{name}': no such macro")))?;
                    context
                        .macros
                        .insert(alias.clone(), Callable::new(Rc::new((*definition).clone())));
                }
            }
        }
        Ok(())
    }

    /// Top-level macros of the template named by `template`.
    fn exported_macros(&self, template: &Expr, context: &Context<'_>) -> PublishResult<Vec<&'e Macro>> {
        let name = self.eval(template, context)?.to_string();
        let imported = self
            .lookup_template(&name)?
            .ok_or(PublishError::MissingTemplate(name))?;
        Ok(imported
            .nodes
            .iter()
            .filter_map(|node| match node {
                Node::Other(Statement::Macro(definition)) => Some(definition),
                _ => None,
            })
            .collect())
    }

    fn resolve_macro(callee: &Expr, context: &Context<'_>) -> PublishResult<Callable> {
        callee
            .as_path()
            .and_then(|path| context.macros.get(&path))
            .cloned()
            .ok_or_else(|| PublishError::render("call blocks must call a macro"))
    }

    /// Renders a macro body with `args` bound positionally to its parameters.
    fn invoke(
        &self,
        callable: &Callable,
        args: Vec<Value>,
        context: &Context<'_>,
        caller: Option<Callable>,
    ) -> PublishResult<String> {
        let depth = self.macro_depth.get();
        if depth >= MAX_NESTING_DEPTH {
            return Err(PublishError::render(format!(
                "macro '{}' nested deeper than {MAX_NESTING_DEPTH} levels",
                callable.definition.name
            )));
        }

        let mut params = BTreeMap::new();
        let mut args = args.into_iter();
        for param in &callable.definition.params {
            let value = match (args.next(), &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval(default, context)?,
                (None, None) => Value::Undefined,
            };
            params.insert(param.name.clone(), value);
        }

        let mut scope = Context {
            globals: context.globals,
            scopes: vec![callable.captured.clone(), params],
            macros: context.macros.clone(),
        };
        if let Some(caller) = caller {
            scope.macros.insert(CALLER.to_string(), caller);
        }

        let mut output = String::new();
        self.macro_depth.set(depth + 1);
        let result = self.render_nodes(&callable.definition.body, &mut scope, &mut output, &BlockOverrides::new(), 0);
        self.macro_depth.set(depth);
        result.map(|()| output)
    }

    fn bind_targets(targets: &[String], item: Value, scope: &mut BTreeMap<String, Value>) -> PublishResult<()> {
        if let [target] = targets {
            scope.insert(target.clone(), item);
            return Ok(());
        }

        let parts = match item {
            Value::Seq(parts) => parts,
            other => {
                return Err(PublishError::render(format!(
                    "cannot unpack {} into {} loop variables",
                    other.kind(),
                    targets.len()
                )));
            }
        };
        if parts.len() != targets.len() {
            return Err(PublishError::render(format!(
                "cannot unpack {} values into {} loop variables",
                parts.len(),
                targets.len()
            )));
        }
        for (target, part) in targets.iter().zip(parts) {
            scope.insert(target.clone(), part);
        }
        Ok(())
    }

    fn render_for(
        &self,
        targets: &[String],
        iter: &Expr,
        body: &[Node],
        otherwise: Option<&[Node]>,
        context: &mut Context<'_>,
        output: &mut String,
        blocks: &BlockOverrides<'_>,
        depth: usize,
    ) -> PublishResult<()> {
        let items: Vec<Value> = match self.eval(iter, context)? {
            Value::Seq(items) => items,
            Value::Map(entries) if targets.len() > 1 => entries
                .into_iter()
                .map(|(key, value)| Value::Seq(vec![Value::String(key), value]))
                .collect(),
            Value::Map(entries) => entries.into_keys().map(Value::String).collect(),
            Value::String(text) => text.chars().map(|ch| Value::String(ch.to_string())).collect(),
            Value::Undefined | Value::Null => Vec::new(),
            other => {
                return Err(PublishError::render(format!("cannot iterate over {}", other.kind())));
            }
        };

        if items.is_empty() {
            if let Some(otherwise) = otherwise {
                self.render_nodes(otherwise, context, output, blocks, depth)?;
            }
            return Ok(());
        }

        let length = items.len();
        for (index, item) in items.into_iter().enumerate() {
            let mut scope = BTreeMap::new();
            Self::bind_targets(targets, item, &mut scope)?;
            scope.insert("loop".to_string(), loop_value(index, length));

            context.push(scope);
            let result = self.render_nodes(body, context, output, blocks, depth);
            context.pop();
            result?;
        }
        Ok(())
    }

    fn eval_all(&self, exprs: &[Expr], context: &Context<'_>) -> PublishResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, context)).collect()
    }

    fn eval(&self, expr: &Expr, context: &Context<'_>) -> PublishResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => Ok(context.lookup(name)),
            Expr::Lookup { base, key } => {
                let base = self.eval(base, context)?;
                let key = self.eval(key, context)?;
                Ok(base.get_segment(&key.to_string()).cloned().unwrap_or_default())
            }
            Expr::And(left, right) => {
                let left = self.eval(left, context)?;
                if left.is_truthy() {
                    self.eval(right, context)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, context)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(right, context)
                }
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, context)?.is_truthy())),
            Expr::Defined(target) => Ok(Value::Bool(!self.eval(target, context)?.is_undefined())),
            Expr::Filter { name, target, args } => {
                let value = self.eval(target, context)?;
                let args = self.eval_all(args, context)?;
                apply_filter(name, value, &args, self.locale)
            }
            Expr::Other(opaque) => self.eval_opaque(opaque, context),
        }
    }

    fn eval_opaque(&self, expr: &OpaqueExpr, context: &Context<'_>) -> PublishResult<Value> {
        match expr {
            OpaqueExpr::Compare { op, left, right } => {
                let left = self.eval(left, context)?;
                let right = self.eval(right, context)?;
                ops::compare(*op, &left, &right).map(Value::Bool)
            }
            OpaqueExpr::Binary { op, left, right } => {
                let left = self.eval(left, context)?;
                let right = self.eval(right, context)?;
                ops::binary(*op, left, right)
            }
            OpaqueExpr::Neg(inner) => ops::negate(&self.eval(inner, context)?),
            OpaqueExpr::Call { callee, args } => {
                if let Some(callable) = callee.as_path().and_then(|path| context.macros.get(&path)) {
                    let args = self.eval_all(args, context)?;
                    return self.invoke(callable, args, context, None).map(Value::String);
                }
                match callee.as_ref() {
                    Expr::Var(name) if name == "range" => range(&self.eval_all(args, context)?),
                    _ => Err(PublishError::render("only macros and range() can be called in templates")),
                }
            }
            OpaqueExpr::Test {
                name,
                target,
                args,
                negated,
            } => {
                let value = self.eval(target, context)?;
                let args = self.eval_all(args, context)?;
                Ok(Value::Bool(apply_test(name, &value, &args)? != *negated))
            }
            OpaqueExpr::List(items) => self.eval_all(items, context).map(Value::Seq),
            OpaqueExpr::Dict(entries) => entries
                .iter()
                .map(|(key, value)| Ok((self.eval(key, context)?.to_string(), self.eval(value, context)?)))
                .collect::<PublishResult<BTreeMap<_, _>>>()
                .map(Value::Map),
            OpaqueExpr::InlineIf {
                then,
                condition,
                otherwise,
            } => {
                if self.eval(condition, context)?.is_truthy() {
                    self.eval(then, context)
                } else {
                    otherwise
                        .as_deref()
                        .map_or(Ok(Value::Undefined), |otherwise| self.eval(otherwise, context))
                }
            }
        }
    }
}

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
fn range(args: &[Value]) -> PublishResult<Value> {
    let ints = args
        .iter()
        .map(|arg| match arg {
            Value::Int(i) => Ok(*i),
            other => Err(PublishError::render(format!("range() expects integers, got {}", other.kind()))),
        })
        .collect::<PublishResult<Vec<_>>>()?;

    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(PublishError::render("range() expects 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(PublishError::render("range() step must not be zero"));
    }

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        let Some(next) = current.checked_add(step) else {
            break;
        };
        current = next;
    }
    Ok(Value::Seq(items))
}

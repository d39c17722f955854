// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::evaluator::EvaluatorHandle;
use crate::item::SearchItem;
use crate::lexer::*;
use crate::typing::ValueTypeFlags;
use crate::value::Value;
use crate::*;

use core::{cmp, fmt, ops::Deref};

pub struct NodeRef<T> {
    r: Rc<T>,
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        Self { r: self.r.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for NodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.r.as_ref().fmt(f)
    }
}

impl<T> cmp::PartialEq for NodeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::as_ptr(&self.r).eq(&Rc::as_ptr(&other.r))
    }
}

impl<T> cmp::Eq for NodeRef<T> {}

impl<T> Deref for NodeRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.r
    }
}

impl<T> AsRef<T> for NodeRef<T> {
    fn as_ref(&self) -> &T {
        self.deref()
    }
}

impl<T> NodeRef<T> {
    pub fn new(t: T) -> Self {
        Self { r: Rc::new(t) }
    }
}

pub type Ref<T> = NodeRef<T>;

/// A node of a parsed search expression.
///
/// Nodes are immutable once built. The `with_*` derivations return a new
/// node that shares `parameters` and `evaluator` with the original.
#[derive(Clone)]
pub struct Expr {
    pub types: ValueTypeFlags,
    pub outer: Span,
    pub inner: Span,
    pub alias: Option<Rc<str>>,
    pub parameters: Rc<[ExprRef]>,
    pub evaluator: EvaluatorHandle,
    pub has_escaped_nested: bool,
    /// Payload of literal nodes.
    pub value: Value,
}

pub type ExprRef = Ref<Expr>;

impl Expr {
    pub fn new(
        types: ValueTypeFlags,
        outer: Span,
        inner: Option<Span>,
        evaluator: EvaluatorHandle,
        parameters: Vec<ExprRef>,
    ) -> ExprRef {
        let inner = inner.unwrap_or_else(|| outer.clone());
        Ref::new(Expr {
            types,
            outer,
            inner,
            alias: None,
            parameters: parameters.into(),
            evaluator,
            has_escaped_nested: false,
            value: Value::Null,
        })
    }

    /// A node without evaluator that yields its own value.
    pub fn literal(types: ValueTypeFlags, span: Span, value: Value) -> ExprRef {
        let mut expr = Expr::new(types, span, None, EvaluatorHandle::invalid(), vec![])
            .as_ref()
            .clone();
        expr.value = value;
        Ref::new(expr)
    }

    /// Literal node for a number or text value produced at evaluation time.
    pub fn constant(value: Value, span: Span) -> ExprRef {
        let types = match &value {
            Value::Number(_) => ValueTypeFlags::NUMBER,
            Value::Bool(_) => ValueTypeFlags::BOOLEAN,
            _ => ValueTypeFlags::TEXT,
        };
        Expr::literal(types, span, value)
    }

    /// A call node bound to `evaluator`.
    pub fn call(
        evaluator: EvaluatorHandle,
        outer: Span,
        inner: Option<Span>,
        parameters: Vec<ExprRef>,
    ) -> ExprRef {
        Expr::new(ValueTypeFlags::FUNCTION, outer, inner, evaluator, parameters)
    }

    /// A node replaying a fixed list of items.
    pub fn stream(items: Vec<SearchItem>, span: Span) -> ExprRef {
        Expr::new(
            ValueTypeFlags::SET,
            span,
            None,
            crate::builtins::replay_evaluator(items),
            vec![],
        )
    }

    /// Binds `evaluator` to a new call whose first argument is this node.
    pub fn apply(
        this: &ExprRef,
        evaluator: EvaluatorHandle,
        extra_args: Vec<ExprRef>,
        outer: Span,
    ) -> ExprRef {
        let mut parameters = Vec::with_capacity(extra_args.len() + 1);
        parameters.push(this.clone());
        parameters.extend(extra_args);
        Expr::call(evaluator, outer, None, parameters)
    }

    fn derive(&self, f: impl FnOnce(&mut Expr)) -> ExprRef {
        let mut expr = self.clone();
        f(&mut expr);
        Ref::new(expr)
    }

    pub fn with_alias(&self, alias: impl AsRef<str>) -> ExprRef {
        self.derive(|e| e.alias = Some(alias.as_ref().into()))
    }

    pub fn with_types(&self, types: ValueTypeFlags) -> ExprRef {
        self.derive(|e| e.types = types)
    }

    /// Re-anchors the node on `outer`, keeping its inner span.
    pub fn with_outer_span(&self, outer: &Span) -> ExprRef {
        self.derive(|e| e.outer = outer.clone())
    }

    pub fn with_escaped_nested(&self, has_escaped_nested: bool) -> ExprRef {
        self.derive(|e| e.has_escaped_nested = has_escaped_nested)
    }

    pub fn text(&self) -> &str {
        self.outer.text()
    }

    pub fn inner_text(&self) -> &str {
        self.inner.text()
    }

    /// Display name: the alias when present, else the literal value or text.
    pub fn name(&self) -> String {
        match (&self.alias, self.is_literal()) {
            (Some(alias), _) => alias.to_string(),
            (None, true) => self.value.to_string(),
            (None, false) => self.text().to_string(),
        }
    }

    pub fn is_literal(&self) -> bool {
        !self.evaluator.is_valid() && self.types.intersects(ValueTypeFlags::ANY_VALUE)
    }

    pub fn is_expandable(&self) -> bool {
        self.types.is_expandable()
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Expr");
        s.field("types", &format_args!("{}", self.types))
            .field("text", &self.text());
        if let Some(alias) = &self.alias {
            s.field("alias", alias);
        }
        if self.evaluator.is_valid() {
            s.field("evaluator", &self.evaluator.name());
        }
        if !self.value.is_null() {
            s.field("value", &self.value);
        }
        if !self.parameters.is_empty() {
            s.field("parameters", &self.parameters);
        }
        s.finish()
    }
}

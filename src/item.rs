// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::ExprRef;
use crate::interpreter::error::EvaluationError;
use crate::value::Value;
use crate::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One step of an evaluation: an item, or `None` as a "nothing yet" placeholder.
pub type ItemResult = Result<Option<SearchItem>, EvaluationError>;

/// Lazy result sequence produced by evaluators and the engine.
pub type ItemStream = Box<dyn Iterator<Item = ItemResult> + Send>;

/// Opaque result record owned by the host's item model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: Rc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Rc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Rc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Rc<str>>,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<Rc<str>, Value>,
    /// Set on items that stand for a sub-expression, e.g. one group of `groupby`.
    #[serde(skip)]
    pub expression: Option<ExprRef>,
}

impl Default for SearchItem {
    fn default() -> Self {
        Self {
            id: "".into(),
            label: None,
            description: None,
            provider: None,
            value: Value::Null,
            fields: BTreeMap::new(),
            expression: None,
        }
    }
}

impl SearchItem {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: id.as_ref().into(),
            ..Default::default()
        }
    }

    /// Item whose id is the display form of `value`.
    pub fn from_value(value: Value) -> Self {
        Self {
            id: value.to_string().into(),
            value,
            ..Default::default()
        }
    }

    /// Item standing for `expr`.
    pub fn from_expression(expr: ExprRef) -> Self {
        let name = expr.name();
        Self {
            id: name.as_str().into(),
            label: Some(name.as_str().into()),
            expression: Some(expr),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl AsRef<str>) -> Self {
        self.label = Some(label.as_ref().into());
        self
    }

    pub fn with_description(mut self, description: impl AsRef<str>) -> Self {
        self.description = Some(description.as_ref().into());
        self
    }

    pub fn with_provider(mut self, provider: impl AsRef<str>) -> Self {
        self.provider = Some(provider.as_ref().into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_field(mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.as_ref().into(), value.into());
        self
    }

    pub fn is_expression(&self) -> bool {
        self.expression.is_some()
    }

    /// Direct field lookup by name.
    ///
    /// Knows `id`, `label`, `description`, `provider`, `value` and the
    /// entries of `fields`. Missing and null fields yield `None`.
    pub fn field(&self, name: &str) -> Option<Value> {
        let text = |s: &Option<Rc<str>>| s.as_ref().map(|s| Value::String(s.clone()));
        let v = match name {
            "id" => Some(Value::String(self.id.clone())),
            "label" => text(&self.label),
            "description" => text(&self.description),
            "provider" => text(&self.provider),
            "value" => Some(self.value.clone()),
            _ => self.fields.get(name).cloned(),
        };
        v.filter(|v| !v.is_null())
    }

    /// The value when set, else the label, else the id.
    pub fn display_value(&self) -> Value {
        match (&self.value, &self.label) {
            (Value::Null, Some(label)) => Value::String(label.clone()),
            (Value::Null, None) => Value::String(self.id.clone()),
            (v, _) => v.clone(),
        }
    }
}

/// Stream over already computed items.
pub fn stream_of(items: Vec<SearchItem>) -> ItemStream {
    Box::new(items.into_iter().map(|i| Ok(Some(i))))
}

pub fn empty_stream() -> ItemStream {
    Box::new(core::iter::empty())
}

pub fn error_stream(e: EvaluationError) -> ItemStream {
    Box::new(core::iter::once(Err(e)))
}

struct Deferred<F> {
    init: Option<F>,
    stream: Option<ItemStream>,
}

impl<F> Iterator for Deferred<F>
where
    F: FnOnce() -> Result<ItemStream, EvaluationError> + Send,
{
    type Item = ItemResult;

    fn next(&mut self) -> Option<ItemResult> {
        if let Some(init) = self.init.take() {
            match init() {
                Ok(s) => self.stream = Some(s),
                Err(e) => return Some(Err(e)),
            }
        }
        self.stream.as_mut()?.next()
    }
}

/// Stream whose construction runs on the first call to `next`.
pub fn deferred<F>(init: F) -> ItemStream
where
    F: FnOnce() -> Result<ItemStream, EvaluationError> + Send + 'static,
{
    Box::new(Deferred {
        init: Some(init),
        stream: None,
    })
}

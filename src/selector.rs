// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::item::SearchItem;
use crate::registry::RegistrationError;
use crate::value::Value;
use crate::*;

use std::collections::BTreeMap;

use parking_lot::RwLock;
use regex::Regex;

/// Input handed to a selector extractor.
pub struct SelectorArgs<'a> {
    pub item: &'a SearchItem,
    /// The full selector text that matched.
    pub selector: &'a str,
    /// Named capture groups of the match.
    pub captures: &'a BTreeMap<String, String>,
}

impl SelectorArgs<'_> {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(|s| s.as_str())
    }
}

pub type Extractor = dyn Fn(&SelectorArgs) -> Option<Value> + Send + Sync;

/// A pattern bound to a value extractor.
pub struct SelectorBinding {
    pub pattern: Regex,
    pub priority: i32,
    pub provider: Option<Rc<str>>,
    pub description: Rc<str>,
    extractor: Rc<Extractor>,
}

impl SelectorBinding {
    pub fn new<F>(pattern: &str, priority: i32, extractor: F) -> Result<Self, RegistrationError>
    where
        F: Fn(&SelectorArgs) -> Option<Value> + Send + Sync + 'static,
    {
        let pattern = Regex::new(pattern).map_err(|e| RegistrationError::InvalidSelector {
            pattern: pattern.into(),
            message: e.to_string().into(),
        })?;
        Ok(Self {
            pattern,
            priority,
            provider: None,
            description: "".into(),
            extractor: Rc::new(extractor),
        })
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }

    /// Only skipped when both sides name a provider and they differ.
    fn accepts(&self, provider: Option<&str>) -> bool {
        match (&self.provider, provider) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }

    pub fn extract(&self, args: &SelectorArgs) -> Option<Value> {
        (self.extractor)(args)
    }
}

/// One successful pattern match.
pub struct SelectorMatch {
    pub binding: Rc<SelectorBinding>,
    pub text: String,
    pub captures: BTreeMap<String, String>,
}

impl SelectorMatch {
    /// Canonical selector name from the `name` capture group.
    pub fn name(&self) -> Option<&str> {
        self.captures.get("name").map(|s| s.as_str())
    }
}

/// A value read through a selector.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedValue {
    pub value: Value,
    /// Canonical name when a registry selector produced the value.
    pub name: Option<Rc<str>>,
}

/// Selector bindings ordered by ascending priority.
///
/// Ties keep registration order. The order is fixed when bindings are
/// registered, not when they are queried.
#[derive(Default)]
pub struct SelectorRegistry {
    bindings: RwLock<Vec<Rc<SelectorBinding>>>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, binding: SelectorBinding) {
        log::debug!(
            "registered selector `{}` (priority {})",
            binding.pattern.as_str(),
            binding.priority
        );
        let mut bindings = self.bindings.write();
        bindings.push(Rc::new(binding));
        bindings.sort_by_key(|b| b.priority);
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    pub fn clear(&self) {
        self.bindings.write().clear();
    }

    /// Every match of every binding accepting `provider`, in priority order.
    pub fn matches(&self, input: &str, provider: Option<&str>) -> Vec<SelectorMatch> {
        let bindings = self.bindings.read().clone();
        let mut found = vec![];
        for binding in bindings.iter().filter(|b| b.accepts(provider)) {
            for caps in binding.pattern.captures_iter(input) {
                let captures = binding
                    .pattern
                    .capture_names()
                    .flatten()
                    .filter_map(|n| caps.name(n).map(|m| (n.to_string(), m.as_str().to_string())))
                    .collect();
                found.push(SelectorMatch {
                    binding: binding.clone(),
                    text: caps
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    captures,
                });
            }
        }
        found
    }

    /// Reads `selector` from `item`.
    ///
    /// The item's own fields are asked first. Registry bindings are tried
    /// next, filtered by the item's provider, and the first non-null value
    /// wins.
    pub fn select_value(&self, item: &SearchItem, selector: &str) -> Option<SelectedValue> {
        if let Some(value) = item.field(selector) {
            return Some(SelectedValue { value, name: None });
        }
        if selector.is_empty() {
            return None;
        }
        for m in self.matches(selector, item.provider.as_deref()) {
            let args = SelectorArgs {
                item,
                selector,
                captures: &m.captures,
            };
            match m.binding.extract(&args) {
                Some(Value::Null) | None => continue,
                Some(value) => {
                    return Some(SelectedValue {
                        value,
                        name: m.name().map(Rc::from),
                    })
                }
            }
        }
        None
    }
}

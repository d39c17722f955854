// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_debug_implementations)] // registry internals are not debug logged
use crate::*;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

type String = Rc<str>;


/// Errors raised while registering evaluators, signatures, parsers and selectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("{registry} registration failed: the name '{name}' is invalid (empty or whitespace-only names are not allowed)")]
    InvalidName { name: String, registry: String },

    #[error("signature of '{evaluator}' is invalid at argument {index}: {message}")]
    InvalidSignature {
        evaluator: String,
        index: usize,
        message: String,
    },

    #[error("signature of '{evaluator}' could not be read: {message}")]
    MalformedSignature { evaluator: String, message: String },

    #[error("no evaluator named '{name}' is registered")]
    UnknownEvaluator { name: String },

    #[error("selector pattern '{pattern}' is invalid: {message}")]
    InvalidSelector { pattern: String, message: String },
}

/// What to do with a registration that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    /// Log a warning and leave the offending entry out.
    #[default]
    Lenient,
    /// Abort the registration with the error.
    Strict,
}

impl RegistrationMode {
    /// Applies the mode to the outcome of one registration.
    ///
    /// Returns `Ok(None)` when a failure was downgraded to a warning.
    pub fn apply<T>(&self, r: Result<T, RegistrationError>) -> Result<Option<T>, RegistrationError> {
        match (self, r) {
            (_, Ok(v)) => Ok(Some(v)),
            (RegistrationMode::Lenient, Err(e)) => {
                log::warn!("{e}; entry omitted");
                Ok(None)
            }
            (RegistrationMode::Strict, Err(e)) => Err(e),
        }
    }
}

/// Validates that a name is not empty or whitespace-only.
pub fn validate_name(name: &str, registry_name: &str) -> Result<(), RegistrationError> {
    if name.trim().is_empty() {
        Err(RegistrationError::InvalidName {
            name: String::from(name),
            registry: String::from(registry_name),
        })
    } else {
        Ok(())
    }
}

/// Thread-safe, case-insensitive name registry.
///
/// Registering an existing name replaces the previous entry, so there is at
/// most one active item per name.
pub struct Registry<T> {
    inner: DashMap<String, (String, Rc<T>)>,
    name: String,
}

impl<T> Registry<T> {
    /// Create a new, empty registry with a given name.
    pub fn new(registry_name: impl Into<String>) -> Self {
        Self {
            inner: DashMap::new(),
            name: registry_name.into(),
        }
    }

    /// Get the name of this registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(name: &str) -> String {
        String::from(name.trim().to_lowercase())
    }

    /// Register an item, returning the entry it replaced.
    pub fn register(&self, name: &str, item: Rc<T>) -> Result<Option<Rc<T>>, RegistrationError> {
        validate_name(name, &self.name)?;
        let previous = self
            .inner
            .insert(Self::key(name), (String::from(name.trim()), item));
        if previous.is_some() {
            log::debug!("{}: '{}' replaced", self.name, name);
        }
        Ok(previous.map(|(_, item)| item))
    }

    /// Retrieve an item by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Rc<T>> {
        self.inner
            .get(&Self::key(name))
            .map(|entry| Rc::clone(&entry.value().1))
    }

    /// Remove an item by name. Returns the removed item if it existed.
    pub fn remove(&self, name: &str) -> Option<Rc<T>> {
        self.inner.remove(&Self::key(name)).map(|(_, (_, v))| v)
    }

    /// Registered names as they were spelled at registration.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&Self::key(name))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn list_items(&self) -> Vec<Rc<T>> {
        self.inner
            .iter()
            .map(|entry| Rc::clone(&entry.value().1))
            .collect()
    }
}

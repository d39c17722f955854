// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::interpreter::error::{EvaluationError, EvaluationErrorKind};
use crate::interpreter::{Call, EvaluationContext};
use crate::item::{ItemStream, SearchItem};
use crate::lexer::{ParseError, Span};
use crate::registry::{RegistrationError, RegistrationMode, Registry};
use crate::type_checker;
use crate::typing::Signature;
use crate::*;

use core::fmt;
use core::hash::{Hash, Hasher};

use bitflags::bitflags;
use dashmap::DashMap;

bitflags! {
    /// Per-evaluator metadata steering threading and parameter handling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EvaluationHints: u32 {
        /// The whole handler iteration must run on the main thread.
        const THREAD_NOT_SUPPORTED = 1 << 0;
        /// Expandable parameters are spliced in as expressions.
        const EXPAND_SUPPORTED = 1 << 1;
        /// Nodes bound to this evaluator are always expanded into their parent call.
        const ALWAYS_EXPAND = 1 << 2;
        /// Never check arguments against the registered signatures.
        const DO_NOT_VALIDATE_SIGNATURE = 1 << 3;
        /// Check arguments at evaluation only, not while parsing.
        const DO_NOT_VALIDATE_ARGS_SIGNATURE = 1 << 4;
        /// Unrecognized argument text parses as a text literal.
        const IMPLICIT_ARGS_LITERALS = 1 << 5;
    }
}

pub type StreamHandler = dyn Fn(&Call) -> Result<ItemStream, EvaluationError> + Send + Sync;
pub type ItemHandler = dyn Fn(&Call) -> Result<Option<SearchItem>, EvaluationError> + Send + Sync;

/// Shapes an evaluator handler can take.
#[derive(Clone)]
pub enum EvaluatorFn {
    /// Produces a lazy sequence of items.
    Stream(Rc<StreamHandler>),
    /// Produces at most one item.
    Item(Rc<ItemHandler>),
}

impl EvaluatorFn {
    pub fn stream<F>(f: F) -> Self
    where
        F: Fn(&Call) -> Result<ItemStream, EvaluationError> + Send + Sync + 'static,
    {
        EvaluatorFn::Stream(Rc::new(f))
    }

    pub fn item<F>(f: F) -> Self
    where
        F: Fn(&Call) -> Result<Option<SearchItem>, EvaluationError> + Send + Sync + 'static,
    {
        EvaluatorFn::Item(Rc::new(f))
    }

    pub fn invoke(&self, call: &Call) -> Result<ItemStream, EvaluationError> {
        match self {
            EvaluatorFn::Stream(f) => f(call),
            EvaluatorFn::Item(f) => Ok(match f(call)? {
                Some(item) => item::stream_of(vec![item]),
                None => item::empty_stream(),
            }),
        }
    }
}

/// A named evaluation handler.
#[derive(Clone)]
pub struct Evaluator {
    pub name: Rc<str>,
    pub description: Rc<str>,
    pub category: Rc<str>,
    pub handler: EvaluatorFn,
    pub hints: EvaluationHints,
}

impl Evaluator {
    pub fn new(name: &str, handler: EvaluatorFn) -> Self {
        Self {
            name: name.into(),
            description: "".into(),
            category: "".into(),
            handler,
            hints: EvaluationHints::empty(),
        }
    }

    pub fn with_hints(mut self, hints: EvaluationHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.into();
        self
    }
}

/// Reference to an evaluator, possibly unbound.
///
/// Handles compare and hash by name, ignoring case.
#[derive(Clone, Default)]
pub struct EvaluatorHandle {
    inner: Option<Rc<Evaluator>>,
}

impl EvaluatorHandle {
    pub fn new(evaluator: Evaluator) -> Self {
        Self {
            inner: Some(Rc::new(evaluator)),
        }
    }

    pub fn invalid() -> Self {
        Self { inner: None }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn name(&self) -> &str {
        match &self.inner {
            Some(e) => &e.name,
            None => "",
        }
    }

    pub fn hints(&self) -> EvaluationHints {
        self.inner
            .as_ref()
            .map(|e| e.hints)
            .unwrap_or_default()
    }

    pub fn evaluator(&self) -> Option<&Evaluator> {
        self.inner.as_deref()
    }
}

impl From<Rc<Evaluator>> for EvaluatorHandle {
    fn from(e: Rc<Evaluator>) -> Self {
        Self { inner: Some(e) }
    }
}

impl PartialEq for EvaluatorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name().eq_ignore_ascii_case(other.name())
    }
}

impl Eq for EvaluatorHandle {}

impl Hash for EvaluatorHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().to_ascii_lowercase().hash(state)
    }
}

impl fmt::Debug for EvaluatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(e) => write!(f, "EvaluatorHandle({:?}, {:?})", e.name, e.hints),
            None => f.write_str("EvaluatorHandle(<invalid>)"),
        }
    }
}

/// Evaluators by name plus the signature overloads of each name.
pub struct EvaluatorRegistry {
    evaluators: Registry<Evaluator>,
    signatures: DashMap<Rc<str>, Vec<Signature>>,
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            evaluators: Registry::new("evaluators"),
            signatures: DashMap::new(),
        }
    }

    fn key(name: &str) -> Rc<str> {
        name.trim().to_lowercase().into()
    }

    /// Adds or replaces the evaluator, replacing its signatures too.
    ///
    /// Each signature is validated on its own; the mode decides whether an
    /// invalid one aborts the registration or is dropped with a warning.
    pub fn register(
        &self,
        evaluator: Evaluator,
        signatures: Vec<Signature>,
        mode: RegistrationMode,
    ) -> Result<Option<EvaluatorHandle>, RegistrationError> {
        let name = evaluator.name.clone();
        let mut valid = Vec::with_capacity(signatures.len());
        for signature in signatures {
            if let Some(()) =
                mode.apply(type_checker::validate_signature(&name, &signature))?
            {
                valid.push(signature);
            }
        }

        let evaluator = Rc::new(evaluator);
        let registered = mode.apply(self.evaluators.register(&name, evaluator.clone()))?;
        if registered.is_none() {
            return Ok(None);
        }
        self.signatures.insert(Self::key(&name), valid);
        log::debug!("registered evaluator '{name}' ({:?})", evaluator.hints);
        Ok(Some(EvaluatorHandle::from(evaluator)))
    }

    /// Registers a batch, keeping only the first evaluator of each name.
    pub fn register_all(
        &self,
        evaluators: Vec<(Evaluator, Vec<Signature>)>,
        mode: RegistrationMode,
    ) -> Result<Vec<EvaluatorHandle>, RegistrationError> {
        let mut seen = std::collections::HashSet::new();
        let mut handles = vec![];
        for (evaluator, signatures) in evaluators {
            if !seen.insert(Self::key(&evaluator.name)) {
                log::warn!(
                    "evaluator '{}' is defined more than once; later definition omitted",
                    evaluator.name
                );
                continue;
            }
            if let Some(handle) = self.register(evaluator, signatures, mode)? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    /// Adds one overload after validating it.
    pub fn add_signature(&self, name: &str, signature: Signature) -> Result<(), RegistrationError> {
        if !self.evaluators.contains(name) {
            return Err(RegistrationError::UnknownEvaluator { name: name.into() });
        }
        type_checker::validate_signature(name, &signature)?;
        self.signatures
            .entry(Self::key(name))
            .or_default()
            .push(signature);
        Ok(())
    }

    pub fn signatures(&self, name: &str) -> Vec<Signature> {
        self.signatures
            .get(&Self::key(name))
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// The evaluator named `name`, or an invalid handle.
    pub fn find(&self, name: &str) -> EvaluatorHandle {
        match self.evaluators.get(name) {
            Some(e) => EvaluatorHandle::from(e),
            None => EvaluatorHandle::invalid(),
        }
    }

    /// Lookup for parsers; `span` locates the name in the search text.
    pub fn find_for_parsing(&self, name: &str, span: &Span) -> Result<EvaluatorHandle, ParseError> {
        let handle = self.find(name);
        if !handle.is_valid() {
            return Err(span.error(&format!("Cannot find search expression evaluator `{name}`")));
        }
        Ok(handle)
    }

    /// Lookup from a running evaluation; errors carry the current frame.
    pub fn find_for_evaluation(
        &self,
        name: &str,
        ctx: &EvaluationContext,
    ) -> Result<EvaluatorHandle, EvaluationError> {
        let handle = self.find(name);
        if !handle.is_valid() {
            let mut e = EvaluationError::new(
                EvaluationErrorKind::InvalidEvaluator,
                format!("Cannot find search expression evaluator `{name}`"),
            );
            if let Some(frame) = ctx.current_frame() {
                e = e.with_frame(frame);
            }
            return Err(e);
        }
        Ok(handle)
    }

    pub fn names(&self) -> Vec<Rc<str>> {
        self.evaluators.list_names()
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    pub fn clear(&self) {
        self.evaluators.clear();
        self.signatures.clear();
    }
}

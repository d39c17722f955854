// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::builtins;
use crate::evaluator::{Evaluator, EvaluatorHandle, EvaluatorRegistry};
use crate::interpreter::runtime::ExecutionFlags;
use crate::interpreter::{self, EvaluationContext};
use crate::item::{self, ItemStream, SearchItem};
use crate::lexer::*;
use crate::parser::*;
use crate::query::QueryProvider;
use crate::registry::{RegistrationError, RegistrationMode};
use crate::scheduler::{BatchedResults, Dispatcher, ThreadedResults};
use crate::selector::{SelectedValue, SelectorArgs, SelectorBinding, SelectorRegistry};
use crate::typing::Signature;
use crate::value::Value;
use crate::*;

use core::time::Duration;

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Tunables of an [`Engine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest gap, in seconds, between two items before an evaluation
    /// that keeps yielding nulls is failed.
    pub stall_timeout: f64,
    /// Items handed to the main thread at a time by batched processing.
    pub batch_size: usize,
    /// Capacity of the queue between a background worker and its consumer.
    pub channel_capacity: usize,
    pub registration: RegistrationMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stall_timeout: 3.0,
            batch_size: 64,
            channel_capacity: 256,
            registration: RegistrationMode::Lenient,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.stall_timeout.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// Registries and settings shared by an engine and its evaluations.
pub struct EngineShared {
    pub(crate) evaluators: EvaluatorRegistry,
    pub(crate) parsers: ParserRegistry,
    pub(crate) selectors: SelectorRegistry,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: RwLock<EngineConfig>,
    pub(crate) query_provider: RwLock<Option<Rc<dyn QueryProvider>>>,
}

impl EngineShared {
    fn new(config: EngineConfig) -> Self {
        Self {
            evaluators: EvaluatorRegistry::new(),
            parsers: ParserRegistry::new(),
            selectors: SelectorRegistry::new(),
            dispatcher: Dispatcher::new(),
            config: RwLock::new(config),
            query_provider: RwLock::new(None),
        }
    }

    pub fn query_provider(&self) -> Option<Rc<dyn QueryProvider>> {
        self.query_provider.read().clone()
    }

    fn mode(&self) -> RegistrationMode {
        self.config.read().registration
    }
}

/// The search expression engine.
///
/// Clones share registries, configuration and the dispatcher. The thread
/// that creates the engine is the main thread of its dispatcher.
#[derive(Clone)]
pub struct Engine {
    shared: Rc<EngineShared>,
}

/// Create a default engine.
impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with the default grammar, evaluators and selectors.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let engine = Self::empty_with_config(config);
        engine.shared.parsers.refresh();

        let mode = engine.shared.mode();
        if let Err(e) = engine
            .shared
            .evaluators
            .register_all(builtins::BUILTINS.clone(), mode)
        {
            log::error!("default evaluators not registered: {e}");
        }
        for (pattern, priority, extractor, description) in builtins::SELECTORS.iter() {
            let binding = SelectorBinding::new(pattern, *priority, *extractor)
                .map(|b| b.with_description(description));
            match mode.apply(binding) {
                Ok(Some(b)) => engine.shared.selectors.register(b),
                Ok(None) => (),
                Err(e) => log::error!("default selector not registered: {e}"),
            }
        }
        engine
    }

    /// Engine with no parsers, evaluators or selectors.
    pub fn empty() -> Self {
        Self::empty_with_config(EngineConfig::default())
    }

    fn empty_with_config(config: EngineConfig) -> Self {
        Self {
            shared: Rc::new(EngineShared::new(config)),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.config.read().clone()
    }

    /// Applies to evaluations started after the call.
    pub fn set_config(&self, config: EngineConfig) {
        *self.shared.config.write() = config;
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        &self.shared.evaluators
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.shared.parsers
    }

    pub fn selectors(&self) -> &SelectorRegistry {
        &self.shared.selectors
    }

    pub fn parse(&self, text: &str) -> Result<ExprRef, ParseError> {
        self.parse_source(&Source::from_contents("<search>", text))
    }

    pub fn parse_source(&self, source: &Source) -> Result<ExprRef, ParseError> {
        self.shared.parsers.parse(&self.shared.evaluators, source)
    }

    /// Lazily evaluates `expr`.
    ///
    /// With [`ExecutionFlags::THREADED_EVALUATION`] the tree walk runs on a
    /// background worker and the returned stream must be drained on the
    /// dispatcher's main thread so that main-thread work keeps flowing.
    pub fn execute(&self, expr: &ExprRef, flags: ExecutionFlags) -> ItemStream {
        let ctx = EvaluationContext::new(self.shared.clone(), flags);
        if !flags.contains(ExecutionFlags::THREADED_EVALUATION) {
            return interpreter::execute(&ctx, expr, flags);
        }

        let capacity = self.shared.config.read().channel_capacity;
        let cancelled = ctx.cancellation().clone();
        let expr = expr.clone();
        match ThreadedResults::spawn(&self.shared.dispatcher, capacity, cancelled, move || {
            interpreter::execute(&ctx, &expr, flags)
        }) {
            Ok(results) => Box::new(results),
            Err(e) => item::error_stream(e),
        }
    }

    pub fn execute_threaded(&self, expr: &ExprRef) -> ItemStream {
        self.execute(expr, ExecutionFlags::THREADED_EVALUATION)
    }

    /// Parses and evaluates `text`, collecting every item.
    pub fn evaluate(&self, text: &str) -> Result<Vec<SearchItem>> {
        let expr = self.parse(text)?;
        let mut items = vec![];
        for r in self.execute(&expr, ExecutionFlags::empty()) {
            if let Some(item) = r? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Registers `evaluator` with its overloads.
    ///
    /// In lenient mode invalid overloads are dropped with a warning and a
    /// failed registration returns `Ok(None)`.
    pub fn register_evaluator(
        &self,
        evaluator: Evaluator,
        signatures: Vec<Signature>,
    ) -> Result<Option<EvaluatorHandle>, RegistrationError> {
        self.shared
            .evaluators
            .register(evaluator, signatures, self.shared.mode())
    }

    /// Adds an overload to a registered evaluator. Returns whether it was added.
    pub fn add_signature(&self, name: &str, signature: Signature) -> Result<bool, RegistrationError> {
        let added = self
            .shared
            .mode()
            .apply(self.shared.evaluators.add_signature(name, signature))?;
        Ok(added.is_some())
    }

    pub fn register_parser<F>(&self, name: &str, priority: i32, handler: F) -> Result<bool, RegistrationError>
    where
        F: Fn(&ParserArgs) -> Result<Option<ExprRef>, ParseError> + Send + Sync + 'static,
    {
        let parser = SearchParser::new(name, priority, handler);
        let added = self.shared.mode().apply(self.shared.parsers.register(parser))?;
        Ok(added.is_some())
    }

    pub fn register_selector<F>(
        &self,
        pattern: &str,
        priority: i32,
        provider: Option<&str>,
        extractor: F,
    ) -> Result<bool, RegistrationError>
    where
        F: Fn(&SelectorArgs) -> Option<Value> + Send + Sync + 'static,
    {
        let binding = SelectorBinding::new(pattern, priority, extractor).map(|b| match provider {
            Some(p) => b.with_provider(p),
            None => b,
        });
        match self.shared.mode().apply(binding)? {
            Some(b) => {
                self.shared.selectors.register(b);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// [`Dispatcher::process_batched`] with the configured batch size.
    pub fn process_batched<T, F>(&self, items: Vec<T>, f: F) -> BatchedResults<T>
    where
        T: Send + 'static,
        F: Fn(T) -> Option<SearchItem> + Send + Sync + 'static,
    {
        let batch_size = self.shared.config.read().batch_size;
        self.shared.dispatcher.process_batched(items, batch_size, f)
    }

    /// Reinstalls the default grammar, dropping custom parsers.
    pub fn refresh_parsers(&self) {
        self.shared.parsers.refresh();
    }

    pub fn set_query_provider(&self, provider: Option<Rc<dyn QueryProvider>>) {
        *self.shared.query_provider.write() = provider;
    }

    pub fn select_value(&self, item: &SearchItem, selector: &str) -> Option<SelectedValue> {
        self.shared.selectors.select_value(item, selector)
    }

    /// Context for driving [`interpreter::execute`] directly.
    pub fn context(&self, flags: ExecutionFlags) -> EvaluationContext {
        EvaluationContext::new(self.shared.clone(), flags)
    }
}

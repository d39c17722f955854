// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod error;
pub mod iteration;
pub mod runtime;

use crate::ast::*;
use crate::engine::EngineShared;
use crate::evaluator::EvaluationHints;
use crate::item::{self, ItemResult, ItemStream, SearchItem};
use crate::scheduler::Dispatcher;
use crate::selector::SelectedValue;
use crate::type_checker;
use crate::value::Value;
use crate::*;

use error::{EvaluationError, EvaluationErrorKind};
use runtime::{ExecutionFlags, FrameGuard, Runtime};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// State shared by every node of one evaluation.
#[derive(Clone)]
pub struct EvaluationContext {
    shared: Rc<EngineShared>,
    runtime: Rc<Mutex<Runtime>>,
    cancelled: Rc<AtomicBool>,
}

impl EvaluationContext {
    pub fn new(shared: Rc<EngineShared>, flags: ExecutionFlags) -> Self {
        Self {
            shared,
            runtime: Rc::new(Mutex::new(Runtime::new(flags))),
            cancelled: Rc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends the evaluation once set.
    ///
    /// Checked wherever null placeholders are dropped instead of being
    /// handed to a consumer that could stop polling.
    pub fn cancellation(&self) -> &Rc<AtomicBool> {
        &self.cancelled
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn shared(&self) -> &EngineShared {
        &self.shared
    }

    pub fn runtime(&self) -> &Rc<Mutex<Runtime>> {
        &self.runtime
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Text of the innermost frame.
    pub fn current_frame(&self) -> Option<String> {
        self.runtime.lock().current().map(|f| f.describe())
    }

    pub fn execute(&self, expr: &ExprRef, flags: ExecutionFlags) -> ItemStream {
        execute(self, expr, flags)
    }
}

/// What a handler sees of the call it is evaluating.
///
/// `args` are the resolved arguments, after expansion.
#[derive(Clone)]
pub struct Call {
    ctx: EvaluationContext,
    expr: ExprRef,
    args: Rc<[ExprRef]>,
    flags: ExecutionFlags,
}

impl Call {
    pub fn context(&self) -> &EvaluationContext {
        &self.ctx
    }

    pub fn expression(&self) -> &ExprRef {
        &self.expr
    }

    pub fn args(&self) -> &[ExprRef] {
        &self.args
    }

    pub fn arg(&self, idx: usize) -> Option<&ExprRef> {
        self.args.get(idx)
    }

    pub fn flags(&self) -> ExecutionFlags {
        self.flags
    }

    pub fn is_threaded(&self) -> bool {
        self.flags.contains(ExecutionFlags::THREADED_EVALUATION)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.ctx.dispatcher()
    }

    /// Evaluates `arg` as a child of this call.
    pub fn execute(&self, arg: &ExprRef) -> ItemStream {
        execute(&self.ctx, arg, self.flags & ExecutionFlags::TRANSFERABLE)
    }

    /// Like [`Call::execute`] with extra flags for the child.
    pub fn execute_with(&self, arg: &ExprRef, flags: ExecutionFlags) -> ItemStream {
        execute(
            &self.ctx,
            arg,
            (self.flags & ExecutionFlags::TRANSFERABLE) | flags,
        )
    }

    /// All non-null items of `arg`.
    pub fn collect(&self, arg: &ExprRef) -> Result<Vec<SearchItem>, EvaluationError> {
        let mut items = vec![];
        for r in self.execute(arg) {
            if let Some(item) = r? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Error anchored on this call.
    pub fn error(&self, message: impl AsRef<str>) -> EvaluationError {
        EvaluationError::handler(message)
            .with_span(&self.expr.outer)
            .with_frame(self.expr.text())
    }

    /// Asks the item, then the selector registry.
    pub fn select_value(&self, item: &SearchItem, selector: &str) -> Option<SelectedValue> {
        self.ctx.shared.selectors.select_value(item, selector)
    }

    /// Selector name carried by a selector or text argument.
    pub fn selector_arg(&self, idx: usize) -> Option<String> {
        self.arg(idx).map(|a| match &a.value {
            Value::String(s) => s.to_string(),
            _ => a.text().to_string(),
        })
    }
}

/// Evaluates `expr` lazily. Nothing runs until the first `next`.
pub fn execute(ctx: &EvaluationContext, expr: &ExprRef, flags: ExecutionFlags) -> ItemStream {
    Box::new(Evaluation {
        ctx: ctx.clone(),
        expr: expr.clone(),
        flags,
        state: State::Pending,
    })
}

struct Streaming {
    inner: ItemStream,
    _frame: Option<FrameGuard>,
    skip_null: bool,
    stall_timeout: Duration,
    last_yield: Instant,
}

enum State {
    Pending,
    Streaming(Streaming),
    Done,
}

struct Evaluation {
    ctx: EvaluationContext,
    expr: ExprRef,
    flags: ExecutionFlags,
    state: State,
}

impl Evaluation {
    fn expansion_error(&self, param: &ExprRef, message: String) -> EvaluationError {
        EvaluationError::new(EvaluationErrorKind::Expansion, message).with_span(&param.outer)
    }

    fn resolve_parameters(&self) -> Result<Vec<ExprRef>, EvaluationError> {
        let hints = self.expr.evaluator.hints();
        let child_flags = (self.flags & ExecutionFlags::TRANSFERABLE) | ExecutionFlags::EXPAND;
        let mut args = Vec::with_capacity(self.expr.parameters.len());

        for p in self.expr.parameters.iter() {
            let always = p.evaluator.hints().contains(EvaluationHints::ALWAYS_EXPAND);
            if always || (p.is_expandable() && hints.contains(EvaluationHints::EXPAND_SUPPORTED)) {
                for r in execute(&self.ctx, p, child_flags) {
                    let Some(item) = r? else { continue };
                    match item.expression {
                        Some(e) => args.push(e),
                        None => {
                            return Err(self.expansion_error(
                                p,
                                format!(
                                    "Cannot expand `{}`: `{}` is not an expression",
                                    p.text(),
                                    item.id
                                ),
                            ))
                        }
                    }
                }
            } else if p.is_expandable() {
                for r in execute(&self.ctx, p, child_flags) {
                    let Some(item) = r? else { continue };
                    match item.value {
                        v @ (Value::Number(_) | Value::String(_)) => {
                            args.push(Expr::constant(v, p.outer.clone()))
                        }
                        v => {
                            return Err(self.expansion_error(
                                p,
                                format!(
                                    "Cannot expand `{}`: value `{v}` is neither a number nor text",
                                    p.text()
                                ),
                            ))
                        }
                    }
                }
            } else {
                args.push(p.clone());
            }
        }
        Ok(args)
    }

    fn start(&self) -> Result<Streaming, EvaluationError> {
        let stall_timeout = self.ctx.shared.config.read().stall_timeout();
        let skip_null = self.flags.contains(ExecutionFlags::THREADED_EVALUATION)
            && !self.flags.contains(ExecutionFlags::PASS_NULL);

        let evaluator = match self.expr.evaluator.evaluator() {
            Some(e) => e,
            None if self.expr.is_literal() => {
                let mut item = SearchItem::from_value(self.expr.value.clone());
                if let Some(alias) = &self.expr.alias {
                    item = item.with_label(alias);
                }
                return Ok(Streaming {
                    inner: item::stream_of(vec![item]),
                    _frame: None,
                    skip_null,
                    stall_timeout,
                    last_yield: Instant::now(),
                });
            }
            None => {
                return Err(EvaluationError::new(
                    EvaluationErrorKind::InvalidEvaluator,
                    format!("`{}` is not bound to an evaluator", self.expr.text()),
                )
                .with_span(&self.expr.outer))
            }
        };

        let args: Rc<[ExprRef]> = self.resolve_parameters()?.into();

        if !evaluator
            .hints
            .contains(EvaluationHints::DO_NOT_VALIDATE_SIGNATURE)
        {
            let signatures = self.ctx.shared.evaluators.signatures(&evaluator.name);
            type_checker::validate_call(&signatures, &self.expr, &args).map_err(|m| {
                EvaluationError::new(EvaluationErrorKind::Signature, &m.message)
                    .with_span(&m.span)
            })?;
        }

        let frame = FrameGuard::push(&self.ctx.runtime, self.expr.clone(), args.clone(), self.flags);
        let call = Call {
            ctx: self.ctx.clone(),
            expr: self.expr.clone(),
            args,
            flags: self.flags,
        };

        let inner = if evaluator
            .hints
            .contains(EvaluationHints::THREAD_NOT_SUPPORTED)
            && call.is_threaded()
        {
            let handler = evaluator.handler.clone();
            let unrolled = call.clone();
            let items = self
                .ctx
                .dispatcher()
                .unroll(move || handler.invoke(&unrolled))?;
            item::stream_of(items)
        } else {
            evaluator.handler.invoke(&call)?
        };

        Ok(Streaming {
            inner,
            _frame: Some(frame),
            skip_null,
            stall_timeout,
            last_yield: Instant::now(),
        })
    }

    fn annotate(&self, e: EvaluationError) -> EvaluationError {
        e.or_locate(&self.expr.outer.source.full_span(), self.expr.text())
    }
}

impl Iterator for Evaluation {
    type Item = ItemResult;

    fn next(&mut self) -> Option<ItemResult> {
        loop {
            match &mut self.state {
                State::Pending => match self.start() {
                    Ok(s) => self.state = State::Streaming(s),
                    Err(e) => {
                        self.state = State::Done;
                        return Some(Err(self.annotate(e)));
                    }
                },
                State::Streaming(s) => match s.inner.next() {
                    None => {
                        self.state = State::Done;
                        return None;
                    }
                    Some(Ok(Some(item))) => {
                        s.last_yield = Instant::now();
                        return Some(Ok(Some(item)));
                    }
                    Some(Ok(None)) if s.skip_null => {
                        if self.ctx.is_cancelled() {
                            self.state = State::Done;
                            return None;
                        }
                    }
                    Some(Ok(None)) => {
                        if s.last_yield.elapsed() > s.stall_timeout {
                            let secs = s.stall_timeout.as_secs_f64();
                            self.state = State::Done;
                            let e = EvaluationError::timeout(format!(
                                "Search expression execution timeout: no result for {secs}s"
                            ))
                            .with_span(&self.expr.outer);
                            return Some(Err(self.annotate(e)));
                        }
                        return Some(Ok(None));
                    }
                    Some(Err(e)) => {
                        self.state = State::Done;
                        return Some(Err(self.annotate(e)));
                    }
                },
                State::Done => return None,
            }
        }
    }
}

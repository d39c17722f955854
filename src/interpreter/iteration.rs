// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::error::EvaluationError;
use super::Call;
use crate::ast::ExprRef;
use crate::item::{self, ItemResult, ItemStream, SearchItem};

/// Request from handler code to the argument iteration driving it.
///
/// A signal is consumed by the next step of the iteration and does not
/// persist beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    Next,
    /// Skip the remaining results of the current argument.
    Continue,
    /// Stop iterating all arguments.
    Break,
}

/// Results of every argument of a call, one argument after the other.
pub struct ArgumentResults {
    call: Call,
    next_arg: usize,
    current_arg: Option<usize>,
    current: Option<ItemStream>,
    pending: Option<ControlSignal>,
    done: bool,
}

impl ArgumentResults {
    pub fn new(call: &Call) -> Self {
        Self {
            call: call.clone(),
            next_arg: 0,
            current_arg: None,
            current: None,
            pending: None,
            done: false,
        }
    }

    /// Signal observed by the next call to `next`.
    pub fn signal(&mut self, signal: ControlSignal) {
        self.pending = match signal {
            ControlSignal::Next => None,
            s => Some(s),
        };
    }

    pub fn pending_signal(&self) -> Option<ControlSignal> {
        self.pending
    }

    /// Index of the argument that produced the last item.
    pub fn argument_index(&self) -> Option<usize> {
        self.current_arg
    }

    pub fn argument(&self) -> Option<&ExprRef> {
        self.current_arg.and_then(|i| self.call.args.get(i))
    }
}

impl Iterator for ArgumentResults {
    type Item = ItemResult;

    fn next(&mut self) -> Option<ItemResult> {
        if self.done {
            return None;
        }
        match self.pending.take() {
            Some(ControlSignal::Break) => {
                self.done = true;
                self.current = None;
                return None;
            }
            Some(ControlSignal::Continue) => self.current = None,
            _ => (),
        }

        loop {
            if self.current.is_none() {
                let arg = match self.call.args.get(self.next_arg) {
                    Some(arg) => arg.clone(),
                    None => {
                        self.done = true;
                        return None;
                    }
                };
                self.current_arg = Some(self.next_arg);
                self.next_arg += 1;
                self.current = Some(self.call.execute(&arg));
            }

            match self.current.as_mut().and_then(|s| s.next()) {
                Some(r) => {
                    if r.is_err() {
                        self.done = true;
                    }
                    return Some(r);
                }
                None => self.current = None,
            }
        }
    }
}

/// Streaming fold target for [`Call::aggregate`].
pub trait Accumulator: Send {
    fn begin(&mut self, _call: &Call) {}

    fn accept(&mut self, item: SearchItem) -> ControlSignal;

    fn finish(self, call: &Call) -> Vec<SearchItem>
    where
        Self: Sized;
}

/// Collecting items drains them unchanged.
impl Accumulator for Vec<SearchItem> {
    fn accept(&mut self, item: SearchItem) -> ControlSignal {
        self.push(item);
        ControlSignal::Next
    }

    fn finish(self, _call: &Call) -> Vec<SearchItem> {
        self
    }
}

type StartHook<A> = Box<dyn FnMut(&mut A, &Call) + Send>;
type ItemHook<A> = Box<dyn FnMut(&mut A, SearchItem) -> ControlSignal + Send>;

enum FinishHook<A> {
    One(Box<dyn FnOnce(A, &Call) -> Option<SearchItem> + Send>),
    Many(Box<dyn FnOnce(A, &Call) -> Vec<SearchItem> + Send>),
}

/// Accumulator assembled from hooks over a state `A`.
///
/// Only the finish hook emits items, so a fold without one emits nothing.
/// States that hold the items to emit are built with [`Fold::draining`].
pub struct Fold<A> {
    state: A,
    on_start: Option<StartHook<A>>,
    on_item: Option<ItemHook<A>>,
    on_finish: Option<FinishHook<A>>,
}

impl<A: Send + 'static> Fold<A> {
    pub fn new(state: A) -> Self {
        Self {
            state,
            on_start: None,
            on_item: None,
            on_finish: None,
        }
    }

    pub fn on_start(mut self, f: impl FnMut(&mut A, &Call) + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_item(
        mut self,
        f: impl FnMut(&mut A, SearchItem) -> ControlSignal + Send + 'static,
    ) -> Self {
        self.on_item = Some(Box::new(f));
        self
    }

    pub fn emit_one(
        mut self,
        f: impl FnOnce(A, &Call) -> Option<SearchItem> + Send + 'static,
    ) -> Self {
        self.on_finish = Some(FinishHook::One(Box::new(f)));
        self
    }

    pub fn emit_many(
        mut self,
        f: impl FnOnce(A, &Call) -> Vec<SearchItem> + Send + 'static,
    ) -> Self {
        self.on_finish = Some(FinishHook::Many(Box::new(f)));
        self
    }
}

impl<A> Fold<A>
where
    A: IntoIterator<Item = SearchItem> + Send + 'static,
{
    /// Fold that emits the items left in its state when finished.
    pub fn draining(state: A) -> Self {
        Self::new(state).emit_many(|state, _| state.into_iter().collect())
    }
}

impl<A: Send> Accumulator for Fold<A> {
    fn begin(&mut self, call: &Call) {
        if let Some(f) = self.on_start.as_mut() {
            f(&mut self.state, call);
        }
    }

    fn accept(&mut self, item: SearchItem) -> ControlSignal {
        match self.on_item.as_mut() {
            Some(f) => f(&mut self.state, item),
            None => ControlSignal::Next,
        }
    }

    fn finish(self, call: &Call) -> Vec<SearchItem> {
        match self.on_finish {
            Some(FinishHook::One(f)) => f(self.state, call).into_iter().collect(),
            Some(FinishHook::Many(f)) => f(self.state, call),
            None => vec![],
        }
    }
}

impl Call {
    pub fn argument_results(&self) -> ArgumentResults {
        ArgumentResults::new(self)
    }

    /// Runs `f` on every non-null result of every argument.
    ///
    /// `f` receives the argument index and the item, and steers the
    /// iteration through the returned signal.
    pub fn for_each_result<F>(&self, mut f: F) -> Result<(), EvaluationError>
    where
        F: FnMut(usize, SearchItem) -> Result<ControlSignal, EvaluationError>,
    {
        let mut results = self.argument_results();
        while let Some(r) = results.next() {
            let Some(item) = r? else { continue };
            let idx = results.argument_index().unwrap_or_default();
            let signal = f(idx, item)?;
            results.signal(signal);
        }
        Ok(())
    }

    /// Folds the results of all arguments into `acc`, lazily.
    pub fn aggregate<A>(&self, acc: A) -> ItemStream
    where
        A: Accumulator + 'static,
    {
        let call = self.clone();
        item::deferred(move || {
            let mut acc = acc;
            acc.begin(&call);
            let mut results = call.argument_results();
            while let Some(r) = results.next() {
                if let Some(item) = r? {
                    let signal = acc.accept(item);
                    results.signal(signal);
                }
            }
            Ok(item::stream_of(acc.finish(&call)))
        })
    }

    /// Folds the results of the argument at `idx` only.
    pub fn aggregate_arg<A>(&self, idx: usize, acc: A) -> ItemStream
    where
        A: Accumulator + 'static,
    {
        let call = self.clone();
        item::deferred(move || {
            let mut acc = acc;
            acc.begin(&call);
            if let Some(arg) = call.args.get(idx) {
                for r in call.execute(arg) {
                    let Some(item) = r? else { continue };
                    if acc.accept(item) != ControlSignal::Next {
                        break;
                    }
                }
            }
            Ok(item::stream_of(acc.finish(&call)))
        })
    }

    /// Folds each argument separately into an accumulator made by `make`.
    pub fn aggregate_each<A, F>(&self, make: F) -> ItemStream
    where
        A: Accumulator + 'static,
        F: Fn(&ExprRef) -> A + Send + 'static,
    {
        let call = self.clone();
        item::deferred(move || {
            let mut out = vec![];
            'args: for arg in call.args.iter() {
                let mut acc = make(arg);
                acc.begin(&call);
                let mut stop = false;
                for r in call.execute(arg) {
                    let Some(item) = r? else { continue };
                    match acc.accept(item) {
                        ControlSignal::Next => (),
                        ControlSignal::Continue => break,
                        ControlSignal::Break => {
                            stop = true;
                            break;
                        }
                    }
                }
                out.extend(acc.finish(&call));
                if stop {
                    break 'args;
                }
            }
            Ok(item::stream_of(out))
        })
    }
}

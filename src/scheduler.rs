// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bridge between background evaluation and main-thread-only work.
//!
//! Operations that must run on the main thread are posted as tasks to the
//! [`Dispatcher`]. The main thread runs them while it waits for results,
//! either explicitly through [`Dispatcher::pump`] or implicitly while
//! draining [`ThreadedResults`].

use crate::interpreter::error::EvaluationError;
use crate::item::{ItemResult, ItemStream, SearchItem};
use crate::*;

use core::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crossbeam_channel::{
    bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError,
};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Interval at which waiting loops re-check for work.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest wait for a cancelled worker before it is detached.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        log::error!("main-thread task panicked: {}", panic_message(&*payload));
    }
}

/// Queue of tasks for the thread that created it.
#[derive(Clone)]
pub struct Dispatcher {
    main: ThreadId,
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Dispatcher whose main thread is the calling thread.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            main: thread::current().id(),
            tx,
            rx,
        }
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }

    /// Queues `task` for the main thread.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The dispatcher owns a receiver, so the channel stays connected.
        let _ = self.tx.send(Box::new(task));
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Runs every queued task. Returns how many ran.
    pub fn pump(&self) -> usize {
        let mut count = 0;
        while let Ok(task) = self.rx.try_recv() {
            run_task(task);
            count += 1;
        }
        count
    }

    /// Waits up to `timeout` for one task and runs it.
    pub fn pump_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                run_task(task);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn tasks(&self) -> &Receiver<Task> {
        &self.rx
    }

    /// Runs `f` on the main thread and blocks until it returns.
    ///
    /// Called on the main thread, `f` runs inline.
    pub fn call<R, F>(&self, f: F) -> Result<R, EvaluationError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_main_thread() {
            return panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let msg = panic_message(&*payload);
                log::error!("main-thread call panicked: {msg}");
                EvaluationError::dispatcher(format!("main-thread call panicked: {msg}"))
            });
        }

        let (tx, rx) = bounded(1);
        self.post(move || {
            let r = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
                let msg = panic_message(&*payload);
                log::error!("main-thread call panicked: {msg}");
                msg
            });
            let _ = tx.send(r);
        });

        match rx.recv() {
            Ok(Ok(r)) => Ok(r),
            Ok(Err(msg)) => Err(EvaluationError::dispatcher(format!(
                "main-thread call panicked: {msg}"
            ))),
            Err(_) => Err(EvaluationError::dispatcher(
                "main-thread call was dropped before it ran",
            )),
        }
    }

    /// Drains the whole sequence made by `produce` on the main thread.
    ///
    /// Null placeholders are dropped. The calling thread blocks until the
    /// sequence is exhausted or fails.
    pub fn unroll<F>(&self, produce: F) -> Result<Vec<SearchItem>, EvaluationError>
    where
        F: FnOnce() -> Result<ItemStream, EvaluationError> + Send + 'static,
    {
        self.call(move || -> Result<Vec<SearchItem>, EvaluationError> {
            let mut items = vec![];
            for r in produce()? {
                if let Some(item) = r? {
                    items.push(item);
                }
            }
            Ok(items)
        })?
    }

    /// Like [`Dispatcher::unroll`], but the sequence is pulled on the main
    /// thread `batch_size` results per trip.
    ///
    /// Each trip hands its items to the calling thread before the next one
    /// is posted, so a large sequence does not hold the main thread for its
    /// whole length.
    pub fn unroll_batched<F>(&self, produce: F, batch_size: usize) -> UnrolledBatches
    where
        F: FnOnce() -> Result<ItemStream, EvaluationError> + Send + 'static,
    {
        UnrolledBatches {
            dispatcher: self.clone(),
            source: Rc::new(Mutex::new(Producer::Pending(Box::new(produce)))),
            batch_size: batch_size.max(1),
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Maps `items` through `f` on the main thread, `batch_size` at a time.
    ///
    /// The returned sequence yields results as each batch trickles in and a
    /// null placeholder whenever nothing arrived within the poll interval.
    pub fn process_batched<T, F>(&self, items: Vec<T>, batch_size: usize, f: F) -> BatchedResults<T>
    where
        T: Send + 'static,
        F: Fn(T) -> Option<SearchItem> + Send + Sync + 'static,
    {
        BatchedResults {
            dispatcher: self.clone(),
            pending: items.into(),
            batch_size: batch_size.max(1),
            f: Rc::new(f),
            batch: None,
        }
    }
}

type BatchFn<T> = Rc<dyn Fn(T) -> Option<SearchItem> + Send + Sync>;

/// Results of [`Dispatcher::process_batched`].
pub struct BatchedResults<T> {
    dispatcher: Dispatcher,
    pending: VecDeque<T>,
    batch_size: usize,
    f: BatchFn<T>,
    batch: Option<Receiver<ItemResult>>,
}

impl<T: Send + 'static> BatchedResults<T> {
    fn post_batch(&mut self) {
        let n = self.batch_size.min(self.pending.len());
        let batch: Vec<T> = self.pending.drain(..n).collect();
        let (tx, rx) = unbounded();
        let f = self.f.clone();
        self.dispatcher.post(move || {
            let failed = tx.clone();
            let r = panic::catch_unwind(AssertUnwindSafe(move || {
                for item in batch {
                    if let Some(item) = f(item) {
                        if tx.send(Ok(Some(item))).is_err() {
                            break;
                        }
                    }
                }
            }));
            if let Err(payload) = r {
                let msg = panic_message(&*payload);
                log::error!("batched main-thread task panicked: {msg}");
                let _ = failed.send(Err(EvaluationError::dispatcher(format!(
                    "batched main-thread task panicked: {msg}"
                ))));
            }
        });
        self.batch = Some(rx);
    }
}

impl<T: Send + 'static> Iterator for BatchedResults<T> {
    type Item = ItemResult;

    fn next(&mut self) -> Option<ItemResult> {
        loop {
            if let Some(rx) = &self.batch {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(r) => return Some(r),
                    Err(RecvTimeoutError::Timeout) => return Some(Ok(None)),
                    Err(RecvTimeoutError::Disconnected) => self.batch = None,
                }
                continue;
            }

            if self.pending.is_empty() {
                return None;
            }

            if self.dispatcher.is_main_thread() {
                let item = self.pending.pop_front()?;
                let f = self.f.clone();
                match panic::catch_unwind(AssertUnwindSafe(move || f(item))) {
                    Ok(Some(item)) => return Some(Ok(Some(item))),
                    Ok(None) => continue,
                    Err(payload) => {
                        let msg = panic_message(&*payload);
                        log::error!("batched main-thread task panicked: {msg}");
                        self.pending.clear();
                        return Some(Err(EvaluationError::dispatcher(format!(
                            "batched main-thread task panicked: {msg}"
                        ))));
                    }
                }
            }

            self.post_batch();
        }
    }
}

type Produce = Box<dyn FnOnce() -> Result<ItemStream, EvaluationError> + Send>;

enum Producer {
    Pending(Produce),
    Running(ItemStream),
    Done,
}

impl Producer {
    /// Pulls up to `n` results. Returns them and whether the sequence ended.
    fn pull(&mut self, n: usize) -> (Vec<ItemResult>, bool) {
        if let Producer::Pending(_) = self {
            let Producer::Pending(produce) = std::mem::replace(self, Producer::Done) else {
                return (vec![], true);
            };
            match produce() {
                Ok(stream) => *self = Producer::Running(stream),
                Err(e) => return (vec![Err(e)], true),
            }
        }
        let Producer::Running(stream) = self else {
            return (vec![], true);
        };

        let mut results = Vec::with_capacity(n);
        for _ in 0..n {
            match stream.next() {
                Some(Ok(None)) => (),
                Some(Err(e)) => {
                    results.push(Err(e));
                    *self = Producer::Done;
                    return (results, true);
                }
                Some(r) => results.push(r),
                None => {
                    *self = Producer::Done;
                    return (results, true);
                }
            }
        }
        (results, false)
    }
}

/// Results of [`Dispatcher::unroll_batched`].
pub struct UnrolledBatches {
    dispatcher: Dispatcher,
    source: Rc<Mutex<Producer>>,
    batch_size: usize,
    buffer: VecDeque<ItemResult>,
    done: bool,
}

impl Iterator for UnrolledBatches {
    type Item = ItemResult;

    fn next(&mut self) -> Option<ItemResult> {
        loop {
            if let Some(r) = self.buffer.pop_front() {
                return Some(r);
            }
            if self.done {
                return None;
            }
            let source = self.source.clone();
            let n = self.batch_size;
            match self.dispatcher.call(move || source.lock().pull(n)) {
                Ok((results, done)) => {
                    self.buffer.extend(results);
                    self.done = done;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

enum Step {
    Item(ItemResult),
    Closed,
    Task(Task),
    Idle,
}

/// Results of an evaluation running on a background worker.
///
/// Draining it on the main thread also runs the tasks the worker posts to
/// the dispatcher, so main-thread-only work cannot stall the worker. Worker
/// panics are logged and end the sequence.
pub struct ThreadedResults {
    rx: Option<Receiver<ItemResult>>,
    tasks: Receiver<Task>,
    pump: bool,
    cancelled: Rc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedResults {
    pub fn spawn<F>(
        dispatcher: &Dispatcher,
        capacity: usize,
        cancelled: Rc<AtomicBool>,
        produce: F,
    ) -> Result<Self, EvaluationError>
    where
        F: FnOnce() -> ItemStream + Send + 'static,
    {
        let (tx, rx) = bounded(capacity.max(1));
        let worker = thread::Builder::new()
            .name("searchexpr-worker".to_string())
            .spawn(move || {
                let r = panic::catch_unwind(AssertUnwindSafe(move || {
                    for r in produce() {
                        if tx.send(r).is_err() {
                            break;
                        }
                    }
                }));
                if let Err(payload) = r {
                    log::error!(
                        "search expression worker panicked: {}",
                        panic_message(&*payload)
                    );
                }
            })
            .map_err(|e| {
                EvaluationError::dispatcher(format!("cannot start evaluation worker: {e}"))
            })?;

        Ok(Self {
            rx: Some(rx),
            tasks: dispatcher.tasks().clone(),
            pump: dispatcher.is_main_thread(),
            cancelled,
            worker: Some(worker),
        })
    }

    /// Stops receiving and waits for the worker, running tasks meanwhile.
    fn finish(&mut self) {
        self.rx = None;
        self.cancelled.store(true, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "search expression worker did not stop within {}s, detaching it",
                    JOIN_TIMEOUT.as_secs_f64()
                );
                return;
            }
            if self.pump {
                if let Ok(task) = self.tasks.recv_timeout(POLL_INTERVAL) {
                    run_task(task);
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        }
        // Panics were logged by the worker itself.
        let _ = worker.join();
    }

    fn step(&self) -> Step {
        let Some(rx) = self.rx.clone() else {
            return Step::Closed;
        };
        match rx.try_recv() {
            Ok(r) => return Step::Item(r),
            Err(TryRecvError::Disconnected) => return Step::Closed,
            Err(TryRecvError::Empty) => (),
        }
        if !self.pump {
            return match rx.recv() {
                Ok(r) => Step::Item(r),
                Err(_) => Step::Closed,
            };
        }
        select! {
            recv(rx) -> msg => match msg {
                Ok(r) => Step::Item(r),
                Err(_) => Step::Closed,
            },
            recv(self.tasks) -> task => match task {
                Ok(task) => Step::Task(task),
                Err(_) => Step::Idle,
            },
        }
    }
}

impl Iterator for ThreadedResults {
    type Item = ItemResult;

    fn next(&mut self) -> Option<ItemResult> {
        loop {
            match self.step() {
                Step::Item(r) => return Some(r),
                Step::Task(task) => run_task(task),
                Step::Closed => {
                    self.finish();
                    return None;
                }
                Step::Idle => {
                    self.pump = false;
                }
            }
        }
    }
}

impl Drop for ThreadedResults {
    fn drop(&mut self) {
        self.finish();
    }
}

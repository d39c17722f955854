// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::common::*;
use crate::item::stream_of;
use crate::scheduler::*;
use crate::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

/// Pumps `dispatcher` until `worker` is done. Returns the worker's result
/// and how many tasks ran on the main thread meanwhile.
fn count_trips<T>(dispatcher: &Dispatcher, worker: JoinHandle<T>) -> Result<(T, usize)> {
    let mut trips = 0;
    while !worker.is_finished() {
        if dispatcher.pump_timeout(Duration::from_millis(5)) {
            trips += 1;
        }
    }
    match worker.join() {
        Ok(r) => Ok((r, trips)),
        Err(_) => bail!("worker panicked"),
    }
}

/// Pumps `dispatcher` until `worker` is done, then joins it.
fn pump_until_done<T>(dispatcher: &Dispatcher, worker: JoinHandle<T>) -> Result<T> {
    while !worker.is_finished() {
        dispatcher.pump_timeout(Duration::from_millis(5));
    }
    match worker.join() {
        Ok(r) => Ok(r),
        Err(_) => bail!("worker panicked"),
    }
}

#[test]
fn call_runs_inline_on_the_main_thread() -> Result<()> {
    let dispatcher = Dispatcher::new();
    assert!(dispatcher.is_main_thread());
    assert_eq!(dispatcher.call(|| 6 * 7)?, 42);
    assert_eq!(dispatcher.pending(), 0);
    Ok(())
}

#[test]
fn call_from_a_worker_waits_for_the_main_thread() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let main = thread::current().id();

    let remote = dispatcher.clone();
    let worker = thread::spawn(move || -> Result<(ThreadId, ThreadId), EvaluationError> {
        let ran_on = remote.call(|| thread::current().id())?;
        Ok((ran_on, thread::current().id()))
    });

    let (ran_on, worker_id) = pump_until_done(&dispatcher, worker)??;
    assert_eq!(ran_on, main);
    assert_ne!(worker_id, main);
    Ok(())
}

#[test]
fn posted_tasks_run_when_pumped() {
    let dispatcher = Dispatcher::new();
    let counter = crate::Rc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let counter = counter.clone();
        dispatcher.post(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    dispatcher.post(|| panic!("contained"));

    assert_eq!(dispatcher.pending(), 4);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.pump(), 4);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn panics_in_calls_become_errors() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let Err(e) = dispatcher.call(|| -> usize { panic!("boom") }) else {
        bail!("panic swallowed");
    };
    assert_eq!(e.kind, EvaluationErrorKind::Dispatcher);
    assert!(e.message.contains("boom"), "{}", e.message);

    let remote = dispatcher.clone();
    let worker = thread::spawn(move || remote.call(|| -> usize { panic!("remote boom") }));
    let Err(e) = pump_until_done(&dispatcher, worker)? else {
        bail!("remote panic swallowed");
    };
    assert_eq!(e.kind, EvaluationErrorKind::Dispatcher);
    Ok(())
}

#[test]
fn unroll_drains_on_the_main_thread() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let main = thread::current().id();

    let remote = dispatcher.clone();
    let worker = thread::spawn(move || {
        remote.unroll(move || {
            assert_eq!(thread::current().id(), main);
            Ok(Box::new((0..4usize).map(|i| {
                Ok((i % 2 == 0).then(|| SearchItem::from_value(Value::from(i))))
            })))
        })
    });

    let items = pump_until_done(&dispatcher, worker)??;
    assert_eq!(numbers(&items), vec![0.0, 2.0]);
    Ok(())
}

#[test]
fn batches_trickle_in_from_the_main_thread() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let main = thread::current().id();

    let remote = dispatcher.clone();
    let worker = thread::spawn(move || {
        let results = remote.process_batched((0..10usize).collect(), 3, move |i| {
            let on_main = thread::current().id() == main;
            (i != 4).then(|| SearchItem::from_value(Value::from(i)).with_field("main", on_main))
        });
        drain(Box::new(results))
    });

    let results = pump_until_done(&dispatcher, worker)??;
    let items: Vec<SearchItem> = results.into_iter().flatten().collect();
    assert_eq!(
        numbers(&items),
        vec![0.0, 1.0, 2.0, 3.0, 5.0, 6.0, 7.0, 8.0, 9.0]
    );
    assert!(items
        .iter()
        .all(|i| i.fields.get("main") == Some(&Value::from(true))));
    Ok(())
}

#[test]
fn batches_run_inline_on_the_main_thread() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let results = dispatcher.process_batched(vec!["a", "b"], 8, |s| {
        Some(SearchItem::new(s))
    });
    let ids: Vec<String> = drain(Box::new(results))?
        .into_iter()
        .flatten()
        .map(|i| i.id.to_string())
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
    Ok(())
}

#[test]
fn thread_bound_evaluators_run_on_the_main_thread() -> Result<()> {
    let engine = Engine::new();
    let main = thread::current().id();
    register(
        &engine,
        "ui",
        &[],
        EvaluationHints::THREAD_NOT_SUPPORTED,
        move |_| {
            let on_main = thread::current().id() == main;
            Ok(stream_of(vec![SearchItem::new("ui").with_value(on_main)]))
        },
    )?;
    register(&engine, "where", &[], EvaluationHints::empty(), move |_| {
        let on_main = thread::current().id() == main;
        Ok(stream_of(vec![SearchItem::new("where").with_value(on_main)]))
    })?;

    let expr = engine.parse("set{ui{}, where{}}")?;
    let items: Vec<SearchItem> = drain(engine.execute_threaded(&expr))?
        .into_iter()
        .flatten()
        .collect();
    let placed: Vec<(String, Value)> = items
        .into_iter()
        .map(|i| (i.id.to_string(), i.value))
        .collect();
    assert_eq!(
        placed,
        vec![
            ("ui".to_string(), Value::from(true)),
            ("where".to_string(), Value::from(false))
        ]
    );

    // Without threading everything stays on the calling thread.
    let items = engine.evaluate("set{ui{}, where{}}")?;
    assert!(items.iter().all(|i| i.value == Value::from(true)));
    Ok(())
}

#[test]
fn worker_panics_end_the_results() -> Result<()> {
    let engine = Engine::new();
    register(&engine, "explode", &[], EvaluationHints::empty(), |_| {
        panic!("worker exploded")
    })?;

    let expr = engine.parse("explode{}")?;
    let results = drain(engine.execute_threaded(&expr))?;
    assert!(results.is_empty());
    Ok(())
}

#[test]
fn threaded_errors_reach_the_caller() -> Result<()> {
    let engine = Engine::new();
    register(&engine, "fail", &[], EvaluationHints::empty(), |call| {
        Err(call.error("refused"))
    })?;

    let expr = engine.parse("set{[1], fail{}}")?;
    let mut stream = engine.execute_threaded(&expr);
    let first = stream.next();
    assert!(matches!(first, Some(Ok(Some(_)))));
    let Some(Err(e)) = stream.next() else {
        bail!("error not forwarded");
    };
    assert_eq!(e.kind, EvaluationErrorKind::Handler);
    assert_eq!(&*e.message, "refused");
    assert!(stream.next().is_none());
    Ok(())
}

#[test]
fn dropping_threaded_results_stops_the_worker() -> Result<()> {
    let engine = Engine::with_config(EngineConfig {
        channel_capacity: 1,
        ..EngineConfig::default()
    });
    let expr = engine.parse("range{0, 1000000}")?;
    let mut stream = engine.execute_threaded(&expr);
    assert!(matches!(stream.next(), Some(Ok(Some(_)))));
    drop(stream);
    Ok(())
}

#[test]
fn unrolled_batches_take_one_trip_per_batch() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let main = thread::current().id();

    let remote = dispatcher.clone();
    let worker = thread::spawn(move || {
        let batches = remote.unroll_batched(
            move || {
                Ok(Box::new((0..5usize).map(move |i| -> ItemResult {
                    let on_main = thread::current().id() == main;
                    Ok(Some(
                        SearchItem::from_value(Value::from(i)).with_field("main", on_main),
                    ))
                })))
            },
            2,
        );
        drain(Box::new(batches))
    });

    let (results, trips) = count_trips(&dispatcher, worker)?;
    let items: Vec<SearchItem> = results?.into_iter().flatten().collect();
    assert_eq!(numbers(&items), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert!(items
        .iter()
        .all(|i| i.fields.get("main") == Some(&Value::from(true))));
    assert_eq!(trips, 3);
    Ok(())
}

#[test]
fn unrolled_batches_stop_at_the_first_error() -> Result<()> {
    let dispatcher = Dispatcher::new();
    let batches = dispatcher.unroll_batched(
        || {
            Ok(Box::new((0..5usize).map(|i| -> ItemResult {
                match i {
                    2 => Err(EvaluationError::handler("bad item")),
                    _ => Ok(Some(SearchItem::from_value(Value::from(i)))),
                }
            })))
        },
        8,
    );
    let results: Vec<ItemResult> = batches.collect();
    assert_eq!(results.len(), 3);
    assert!(matches!(results[2], Err(ref e) if &*e.message == "bad item"));
    Ok(())
}

#[test]
fn engine_batches_use_the_configured_size() -> Result<()> {
    let engine = Engine::with_config(EngineConfig {
        batch_size: 3,
        ..EngineConfig::default()
    });

    let remote = engine.clone();
    let worker = thread::spawn(move || {
        let results = remote.process_batched((0..10usize).collect(), |i| {
            Some(SearchItem::from_value(Value::from(i)))
        });
        drain(Box::new(results))
    });

    let (results, trips) = count_trips(engine.dispatcher(), worker)?;
    let items: Vec<SearchItem> = results?.into_iter().flatten().collect();
    assert_eq!(items.len(), 10);
    assert_eq!(trips, 4);
    Ok(())
}

#[test]
fn dropping_a_stalled_threaded_stream_returns() -> Result<()> {
    let engine = engine_with_timeout(0.2);
    register(&engine, "stall", &[], EvaluationHints::empty(), |_| {
        Ok(Box::new(std::iter::repeat_with(|| -> ItemResult {
            thread::sleep(Duration::from_millis(5));
            Ok(None)
        })))
    })?;

    let expr = engine.parse("stall{}")?;
    let stream = engine.execute_threaded(&expr);
    let started = Instant::now();
    drop(stream);
    // The worker saw the cancellation well before it would be detached.
    assert!(started.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test]
fn blocked_workers_are_detached() -> Result<()> {
    let engine = Engine::new();
    let (release, blocked) = crossbeam_channel::bounded::<()>(1);
    register(&engine, "block", &[], EvaluationHints::empty(), move |_| {
        let blocked = blocked.clone();
        Ok(Box::new(std::iter::once_with(move || -> ItemResult {
            let _ = blocked.recv();
            Ok(None)
        })))
    })?;

    let expr = engine.parse("block{}")?;
    let stream = engine.execute_threaded(&expr);
    // Let the worker reach the blocking call.
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    drop(stream);
    assert!(started.elapsed() < Duration::from_secs(10));
    let _ = release.send(());
    Ok(())
}

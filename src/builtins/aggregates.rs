// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::{arg, builtin, many, opt, sig, BuiltinEntry};
use crate::evaluator::EvaluationHints;
use crate::interpreter::error::EvaluationError;
use crate::interpreter::iteration::{ControlSignal, Fold};
use crate::interpreter::Call;
use crate::item::{self, ItemStream, SearchItem};
use crate::typing::{Signature, ValueTypeFlags as T};

pub fn register(m: &mut Vec<BuiltinEntry>) {
    let (count_eval, count_sigs) = builtin(
        "count",
        "Aggregate",
        "Number of items of each argument",
        count,
        vec![sig(&[many(T::ITERABLE)])],
    );
    m.push((count_eval.with_hints(EvaluationHints::EXPAND_SUPPORTED), count_sigs));

    m.push(builtin("sum", "Aggregate", "Sum of the selected values", sum, numeric()));
    m.push(builtin("avg", "Aggregate", "Average of the selected values", avg, numeric()));
    m.push(builtin("min", "Aggregate", "Item with the smallest selected value", min, numeric()));
    m.push(builtin("max", "Aggregate", "Item with the largest selected value", max, numeric()));

    m.push(builtin(
        "first",
        "Aggregate",
        "First item of each argument",
        first,
        vec![sig(&[many(T::ITERABLE)])],
    ));
    m.push(builtin(
        "last",
        "Aggregate",
        "Last item of each argument",
        last,
        vec![sig(&[many(T::ITERABLE)])],
    ));
}

fn numeric() -> Vec<Signature> {
    vec![sig(&[arg(T::ITERABLE), opt(T::SELECTOR | T::TEXT)])]
}

fn count(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(call.aggregate_each(|a| {
        let name = a.name();
        Fold::new(0usize)
            .on_item(|n, _| {
                *n += 1;
                ControlSignal::Next
            })
            .emit_one(move |n, _| Some(SearchItem::new(&name).with_label(&name).with_value(n)))
    }))
}

/// Numeric value of `item`, read through `selector` or its own value.
fn number_of(call: &Call, item: &SearchItem, selector: Option<&str>) -> Option<f64> {
    match selector {
        Some(s) => call.select_value(item, s)?.value.to_number(),
        None => item.value.to_number(),
    }
}

/// Folds the numbers of the first argument, skipping items without one.
fn fold_numbers<A, F>(call: &Call, state: A, step: fn(&mut A, f64, SearchItem), emit: F) -> ItemStream
where
    A: Send + 'static,
    F: FnOnce(A, &Call) -> Option<SearchItem> + Send + 'static,
{
    let selector = call.selector_arg(1);
    let reader = call.clone();
    call.aggregate_arg(
        0,
        Fold::new(state)
            .on_item(move |acc, item| {
                if let Some(n) = number_of(&reader, &item, selector.as_deref()) {
                    step(acc, n, item);
                }
                ControlSignal::Next
            })
            .emit_one(emit),
    )
}

fn total(call: &Call, name: &str, value: f64) -> SearchItem {
    SearchItem::new(call.expression().text())
        .with_label(name)
        .with_value(value)
}

fn sum(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(fold_numbers(
        call,
        0.0,
        |s, n, _| *s += n,
        |s, call| Some(total(call, "sum", s)),
    ))
}

fn avg(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(fold_numbers(
        call,
        (0.0, 0usize),
        |(s, c), n, _| {
            *s += n;
            *c += 1;
        },
        |(s, c), call| match c {
            0 => None,
            c => Some(total(call, "avg", s / c as f64)),
        },
    ))
}

type Extremum = Option<(f64, SearchItem)>;

fn keep_smaller(best: &mut Extremum, n: f64, item: SearchItem) {
    if best.as_ref().map_or(true, |(b, _)| n < *b) {
        *best = Some((n, item));
    }
}

fn keep_larger(best: &mut Extremum, n: f64, item: SearchItem) {
    if best.as_ref().map_or(true, |(b, _)| n > *b) {
        *best = Some((n, item));
    }
}

fn min(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(fold_numbers(call, None, keep_smaller, |s, _| s.map(|(_, i)| i)))
}

fn max(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(fold_numbers(call, None, keep_larger, |s, _| s.map(|(_, i)| i)))
}

fn first(call: &Call) -> Result<ItemStream, EvaluationError> {
    let call = call.clone();
    Ok(item::deferred(move || {
        let mut firsts = vec![];
        call.for_each_result(|_, item| {
            firsts.push(item);
            Ok(ControlSignal::Continue)
        })?;
        Ok(item::stream_of(firsts))
    }))
}

fn last(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(call.aggregate_each(|_| {
        Fold::new(None)
            .on_item(|last, item| {
                *last = Some(item);
                ControlSignal::Next
            })
            .emit_one(|last, _| last)
    }))
}

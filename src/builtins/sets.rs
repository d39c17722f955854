// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::{self, arg, builtin, item_key, many, opt, sig, BuiltinEntry};
use crate::evaluator::{EvaluationHints, EvaluatorHandle};
use crate::interpreter::error::EvaluationError;
use crate::interpreter::Call;
use crate::item::{self, ItemStream};
use crate::typing::{Argument, ValueTypeFlags as T};

use std::collections::HashSet;

use lazy_static::lazy_static;

const ANY_EXPRESSIONS: Argument = Argument {
    types: T::ANY_EXPRESSION,
    variadic: true,
    optional: true,
};

pub fn register(m: &mut Vec<BuiltinEntry>) {
    m.push(set_entry());
    m.push(union_entry());
    m.push(builtin(
        "distinct",
        "Set",
        "Items of a set with duplicate keys removed",
        distinct,
        vec![sig(&[arg(T::ITERABLE), opt(T::SELECTOR | T::TEXT)])],
    ));
    m.push(builtin(
        "intersect",
        "Set",
        "Items of the first set whose key is also in the second",
        intersect,
        vec![sig(&[
            arg(T::ITERABLE),
            arg(T::ITERABLE),
            opt(T::SELECTOR | T::TEXT),
        ])],
    ));
    m.push(builtin(
        "except",
        "Set",
        "Items of the first set whose id is in none of the others",
        except,
        vec![sig(&[arg(T::ITERABLE), many(T::ITERABLE)])],
    ));
}

fn set_entry() -> BuiltinEntry {
    builtin(
        "set",
        "Set",
        "Results of every argument, in order",
        set,
        vec![sig(&[ANY_EXPRESSIONS])],
    )
}

fn union_entry() -> BuiltinEntry {
    let (evaluator, signatures) = builtin(
        "union",
        "Set",
        "Results of every argument without repeated ids",
        union,
        vec![sig(&[many(T::ITERABLE)])],
    );
    (evaluator.with_hints(EvaluationHints::EXPAND_SUPPORTED), signatures)
}

lazy_static! {
    static ref INTRINSIC_SET: EvaluatorHandle = EvaluatorHandle::new(set_entry().0);
}

/// The `set` evaluator used for bracket groups when none is registered.
pub fn intrinsic_set() -> EvaluatorHandle {
    INTRINSIC_SET.clone()
}

fn set(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(Box::new(call.argument_results()))
}

fn union(call: &Call) -> Result<ItemStream, EvaluationError> {
    let mut seen = HashSet::new();
    Ok(Box::new(call.argument_results().filter(move |r| match r {
        Ok(Some(item)) => seen.insert(item.id.clone()),
        _ => true,
    })))
}

fn distinct(call: &Call) -> Result<ItemStream, EvaluationError> {
    let Some(source) = call.arg(0).cloned() else {
        return Ok(item::empty_stream());
    };
    let selector = call.selector_arg(1);
    let keyed = call.clone();
    let mut seen = HashSet::new();
    Ok(Box::new(call.execute(&source).filter(move |r| match r {
        Ok(Some(item)) => seen.insert(item_key(&keyed, item, selector.as_deref())),
        _ => true,
    })))
}

/// Keys of every item of the arguments in `args`.
fn collect_keys(
    call: &Call,
    args: core::ops::Range<usize>,
    selector: Option<&str>,
) -> Result<HashSet<String>, EvaluationError> {
    let mut keys = HashSet::new();
    for a in call.args().get(args).unwrap_or_default() {
        for item in call.collect(a)? {
            keys.insert(item_key(call, &item, selector));
        }
    }
    Ok(keys)
}

/// Items of the first argument filtered by membership of their key in
/// the keys of `others`.
fn filter_first(call: &Call, others: core::ops::Range<usize>, keep: bool) -> ItemStream {
    let call = call.clone();
    item::deferred(move || {
        let selector = builtins::find_arg(&call, 2, T::SELECTOR | T::TEXT)
            .and_then(|i| call.selector_arg(i));
        let keys = collect_keys(&call, others, selector.as_deref())?;
        let Some(source) = call.arg(0).cloned() else {
            return Ok(item::empty_stream());
        };
        let keyed = call.clone();
        Ok(Box::new(call.execute(&source).filter(move |r| match r {
            Ok(Some(item)) => {
                keys.contains(&item_key(&keyed, item, selector.as_deref())) == keep
            }
            _ => true,
        })) as ItemStream)
    })
}

fn intersect(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(filter_first(call, 1..2, true))
}

fn except(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(filter_first(call, 1..call.args().len(), false))
}

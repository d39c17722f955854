// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod aggregates;
pub mod selection;
pub mod sets;

use crate::evaluator::{Evaluator, EvaluatorFn, EvaluatorHandle};
use crate::interpreter::error::EvaluationError;
use crate::interpreter::Call;
use crate::item::{self, ItemStream, SearchItem};
use crate::selector::SelectorArgs;
use crate::typing::{Argument, Signature, ValueTypeFlags};
use crate::value::Value;

use lazy_static::lazy_static;

pub type BuiltinFcn = fn(&Call) -> Result<ItemStream, EvaluationError>;

/// An evaluator together with its signature overloads.
pub type BuiltinEntry = (Evaluator, Vec<Signature>);

pub type SelectorFcn = fn(&SelectorArgs) -> Option<Value>;

/// A default selector: pattern, priority, extractor, description.
pub type SelectorEntry = (&'static str, i32, SelectorFcn, &'static str);

#[rustfmt::skip]
lazy_static! {
    pub static ref BUILTINS: Vec<BuiltinEntry> = {
	let mut m: Vec<BuiltinEntry> = vec![];

	sets::register(&mut m);
	aggregates::register(&mut m);
	selection::register(&mut m);

	m
    };

    pub static ref SELECTORS: Vec<SelectorEntry> = {
	let mut m: Vec<SelectorEntry> = vec![];

	selection::register_selectors(&mut m);

	m
    };
}

/// Builds a builtin evaluator entry.
pub(crate) fn builtin(
    name: &str,
    category: &str,
    description: &str,
    f: BuiltinFcn,
    signatures: Vec<Signature>,
) -> BuiltinEntry {
    (
        Evaluator::new(name, EvaluatorFn::stream(f))
            .with_category(category)
            .with_description(description),
        signatures,
    )
}

pub(crate) fn sig(args: &[Argument]) -> Signature {
    Signature::new(args.to_vec())
}

pub(crate) const fn arg(types: ValueTypeFlags) -> Argument {
    Argument::new(types)
}

pub(crate) const fn opt(types: ValueTypeFlags) -> Argument {
    Argument::optional(types)
}

pub(crate) const fn many(types: ValueTypeFlags) -> Argument {
    Argument::variadic(types)
}

/// Evaluator replaying `items` every time it runs.
///
/// Bound to stream nodes only; it is never registered by name.
pub fn replay_evaluator(items: Vec<SearchItem>) -> EvaluatorHandle {
    EvaluatorHandle::new(
        Evaluator::new(
            "stream",
            EvaluatorFn::stream(move |_| Ok(item::stream_of(items.clone()))),
        )
        .with_category("Internal"),
    )
}

/// Key under which set operations compare items: the selected value when
/// a selector is given and yields one, else the item id.
pub(crate) fn item_key(call: &Call, item: &SearchItem, selector: Option<&str>) -> String {
    selector
        .and_then(|s| call.select_value(item, s))
        .map(|v| v.value.to_string())
        .unwrap_or_else(|| item.id.to_string())
}

/// Index of the first argument after `from` whose node has one of `types`.
pub(crate) fn find_arg(call: &Call, from: usize, types: ValueTypeFlags) -> Option<usize> {
    call.args()
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, a)| a.types.intersects(types))
        .map(|(i, _)| i)
}

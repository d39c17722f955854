// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::Expr;
use crate::builtins::{arg, builtin, find_arg, many, opt, sig, BuiltinEntry, SelectorEntry};
use crate::evaluator::EvaluationHints;
use crate::interpreter::error::EvaluationError;
use crate::interpreter::Call;
use crate::item::{self, ItemResult, ItemStream, SearchItem};
use crate::selector::SelectorArgs;
use crate::typing::{Keyword, ValueTypeFlags as T};
use crate::value::Value;
use crate::*;

use core::str::FromStr;
use std::collections::{BTreeMap, HashMap};

pub fn register(m: &mut Vec<BuiltinEntry>) {
    m.push(builtin(
        "range",
        "Selection",
        "Numbers from the first argument up to, not including, the second",
        range,
        vec![sig(&[arg(T::NUMBER), arg(T::NUMBER)])],
    ));
    m.push(builtin(
        "select",
        "Selection",
        "Items reduced to the selected fields",
        select,
        vec![sig(&[arg(T::ITERABLE), many(T::SELECTOR | T::TEXT)])],
    ));
    m.push(builtin(
        "sort",
        "Selection",
        "Items ordered by a selected value",
        sort,
        vec![
            sig(&[arg(T::ITERABLE), opt(T::SELECTOR | T::TEXT), opt(T::KEYWORD)]),
            sig(&[arg(T::ITERABLE), arg(T::KEYWORD)]),
        ],
    ));

    let (groupby_eval, groupby_sigs) = builtin(
        "groupby",
        "Selection",
        "One expression item per distinct selected value",
        groupby,
        vec![sig(&[arg(T::ITERABLE), arg(T::SELECTOR | T::TEXT)])],
    );
    m.push((groupby_eval.with_hints(EvaluationHints::ALWAYS_EXPAND), groupby_sigs));

    let (text_eval, text_sigs) = builtin(
        "text",
        "Selection",
        "Arguments as text items",
        text,
        vec![sig(&[many(T::ANY_VALUE)])],
    );
    m.push((
        text_eval.with_hints(EvaluationHints::IMPLICIT_ARGS_LITERALS),
        text_sigs,
    ));
}

pub fn register_selectors(m: &mut Vec<SelectorEntry>) {
    m.push((
        r"^#(?P<name>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)$",
        50,
        select_field,
        "Item field or member of the item value, dotted for nested members",
    ));
    m.push((r"^(?P<name>text)$", 100, select_text, "Display text of the item"));
    m.push((r"^(?P<name>type)$", 100, select_type, "Kind of the item value"));
    m.push((r"^(?P<name>length)$", 100, select_length, "Length of the item value"));
}

fn select_field(args: &SelectorArgs) -> Option<Value> {
    let mut path = args.capture("name")?.split('.');
    let head = path.next()?;
    let mut value = args
        .item
        .field(head)
        .or_else(|| args.item.value.get(head).cloned())?;
    for member in path {
        value = value.get(member)?.clone();
    }
    Some(value)
}

fn select_text(args: &SelectorArgs) -> Option<Value> {
    Some(Value::from(args.item.display_value().to_string()))
}

fn select_type(args: &SelectorArgs) -> Option<Value> {
    let kind = match &args.item.value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    Some(Value::from(kind))
}

fn select_length(args: &SelectorArgs) -> Option<Value> {
    match &args.item.value {
        Value::String(s) => Some(Value::from(s.chars().count())),
        Value::Array(a) => Some(Value::from(a.len())),
        Value::Object(o) => Some(Value::from(o.len())),
        _ => None,
    }
}

fn number_arg(call: &Call, idx: usize) -> Result<f64, EvaluationError> {
    let Some(a) = call.arg(idx) else {
        return Err(call.error(format!("missing argument at position {idx}")));
    };
    call.collect(a)?
        .first()
        .and_then(|i| i.value.to_number())
        .ok_or_else(|| call.error(format!("`{}` does not evaluate to a number", a.text())))
}

fn range(call: &Call) -> Result<ItemStream, EvaluationError> {
    let start = number_arg(call, 0)?;
    let end = number_arg(call, 1)?;
    let count = (end - start).max(0.0).ceil() as usize;
    Ok(Box::new((0..count).map(move |k| -> ItemResult {
        Ok(Some(SearchItem::from_value(Value::from(start + k as f64))))
    })))
}

/// Selector text and the field name it produces, when the parameter has
/// an alias.
type FieldSelector = (String, Option<Rc<str>>);

fn project(call: &Call, item: SearchItem, selectors: &[FieldSelector]) -> SearchItem {
    let mut out = SearchItem {
        value: Value::Null,
        fields: BTreeMap::new(),
        expression: None,
        ..item.clone()
    };
    for (selector, alias) in selectors {
        let Some(selected) = call.select_value(&item, selector) else {
            continue;
        };
        let name = alias
            .clone()
            .or(selected.name)
            .unwrap_or_else(|| selector.as_str().into());
        if out.value.is_null() {
            out.value = selected.value.clone();
        }
        out.fields.insert(name, selected.value);
    }
    out
}

fn select(call: &Call) -> Result<ItemStream, EvaluationError> {
    let Some(source) = call.arg(0).cloned() else {
        return Ok(item::empty_stream());
    };
    let selectors: Vec<FieldSelector> = (1..call.args().len())
        .filter_map(|i| {
            let alias = call.arg(i)?.alias.clone();
            Some((call.selector_arg(i)?, alias))
        })
        .collect();
    let reader = call.clone();
    Ok(Box::new(call.execute(&source).map(move |r| -> ItemResult {
        Ok(r?.map(|item| project(&reader, item, &selectors)))
    })))
}

fn sort(call: &Call) -> Result<ItemStream, EvaluationError> {
    let call = call.clone();
    Ok(item::deferred(move || {
        let Some(source) = call.arg(0) else {
            return Ok(item::empty_stream());
        };
        let selector = find_arg(&call, 1, T::SELECTOR | T::TEXT).and_then(|i| call.selector_arg(i));
        let descending = find_arg(&call, 1, T::KEYWORD)
            .and_then(|i| call.arg(i))
            .and_then(|k| Keyword::from_str(&k.value.to_string()).ok())
            == Some(Keyword::Desc);

        let mut keyed: Vec<(Value, SearchItem)> = call
            .collect(source)?
            .into_iter()
            .map(|item| {
                let key = match &selector {
                    Some(s) => call
                        .select_value(&item, s)
                        .map(|v| v.value)
                        .unwrap_or_default(),
                    None => item.display_value(),
                };
                (key, item)
            })
            .collect();

        if descending {
            keyed.sort_by(|a, b| b.0.compare(&a.0));
        } else {
            keyed.sort_by(|a, b| a.0.compare(&b.0));
        }
        Ok(item::stream_of(keyed.into_iter().map(|(_, i)| i).collect()))
    }))
}

fn groupby(call: &Call) -> Result<ItemStream, EvaluationError> {
    let call = call.clone();
    Ok(item::deferred(move || {
        let Some(source) = call.arg(0) else {
            return Ok(item::empty_stream());
        };
        let selector = call.selector_arg(1).unwrap_or_default();

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<SearchItem>)> = vec![];
        for item in call.collect(source)? {
            let key = call
                .select_value(&item, &selector)
                .map(|v| v.value.to_string())
                .unwrap_or_default();
            match index.get(&key) {
                Some(&i) => groups[i].1.push(item),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![item]));
                }
            }
        }

        let span = call.expression().outer.clone();
        Ok(item::stream_of(
            groups
                .into_iter()
                .map(|(key, items)| {
                    let expr = Expr::stream(items, span.clone()).with_alias(&key);
                    SearchItem::from_expression(expr).with_value(key.as_str())
                })
                .collect(),
        ))
    }))
}

fn text(call: &Call) -> Result<ItemStream, EvaluationError> {
    Ok(item::stream_of(
        call.args()
            .iter()
            .map(|a| {
                let text = match a.is_literal() {
                    true => a.value.to_string(),
                    false => a.text().to_string(),
                };
                SearchItem::from_value(Value::from(text))
            })
            .collect(),
    ))
}

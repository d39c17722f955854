// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared helpers for crate-internal tests.

use crate::*;

use anyhow::Result;

/// Engine with the default grammar and a custom stall timeout.
pub fn engine_with_timeout(stall_timeout: f64) -> Engine {
    Engine::with_config(EngineConfig {
        stall_timeout,
        ..EngineConfig::default()
    })
}

/// Registers `f` as an evaluator with the given text signatures.
pub fn register<F>(
    engine: &Engine,
    name: &str,
    signatures: &[&str],
    hints: EvaluationHints,
    f: F,
) -> Result<EvaluatorHandle>
where
    F: Fn(&Call) -> Result<ItemStream, EvaluationError> + Send + Sync + 'static,
{
    let signatures = signatures
        .iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<Signature>>>()?;
    let evaluator = Evaluator::new(name, EvaluatorFn::stream(f)).with_hints(hints);
    engine
        .register_evaluator(evaluator, signatures)?
        .ok_or_else(|| anyhow::anyhow!("evaluator `{name}` was not registered"))
}

/// Numeric values of `items`, in order.
pub fn numbers(items: &[SearchItem]) -> Vec<f64> {
    items
        .iter()
        .filter_map(|i| i.value.to_number())
        .collect()
}

/// Drains `stream`, keeping the null placeholders.
pub fn drain(stream: ItemStream) -> Result<Vec<Option<SearchItem>>, EvaluationError> {
    stream.collect()
}

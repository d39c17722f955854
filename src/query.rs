// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::evaluator::{Evaluator, EvaluatorFn, EvaluatorHandle};
use crate::interpreter::error::{EvaluationError, EvaluationErrorKind};
use crate::interpreter::Call;
use crate::item::{self, ItemStream};
use crate::lexer::unescape_brackets;
use crate::*;

use lazy_static::lazy_static;

/// Host search backend that runs plain query strings.
pub trait QueryProvider: Send + Sync {
    fn name(&self) -> &str {
        "default"
    }

    fn search(&self, query: &str) -> Result<ItemStream, EvaluationError>;

    /// Providers returning false are run on the main thread during
    /// threaded evaluation.
    fn is_thread_safe(&self) -> bool {
        true
    }
}

lazy_static! {
    static ref QUERY_EVALUATOR: EvaluatorHandle = EvaluatorHandle::new(
        Evaluator::new("query", EvaluatorFn::stream(evaluate_query))
            .with_description("Runs a query string through the query provider")
            .with_category("Query")
    );
}

/// Evaluator bound to query string nodes.
pub fn query_evaluator() -> EvaluatorHandle {
    QUERY_EVALUATOR.clone()
}

/// Query texts with every nested group replaced by one of its values.
///
/// Multi-valued groups multiply out into one query per combination.
pub fn expand_queries(call: &Call) -> Result<Vec<String>, EvaluationError> {
    let expr = call.expression();
    let contents = expr.outer.source.contents();
    let mut queries = vec![String::new()];
    let mut pos = expr.outer.start;

    for param in expr.parameters.iter() {
        let literal = contents.get(pos..param.outer.start).unwrap_or_default();
        let values: Vec<String> = call
            .collect(param)?
            .iter()
            .map(|i| i.display_value().to_string())
            .collect();

        let mut next = Vec::with_capacity(queries.len() * values.len());
        for q in &queries {
            for v in &values {
                next.push(format!("{q}{literal}{v}"));
            }
        }
        queries = next;
        pos = param.outer.end;
    }

    let tail = contents.get(pos..expr.outer.end).unwrap_or_default();
    Ok(queries
        .into_iter()
        .map(|q| unescape_brackets(&format!("{q}{tail}")).trim().to_string())
        .filter(|q| !q.is_empty())
        .collect())
}

fn run_query(
    provider: &Rc<dyn QueryProvider>,
    call: &Call,
    query: String,
) -> Result<ItemStream, EvaluationError> {
    log::debug!("running query `{query}` with provider '{}'", provider.name());
    if call.is_threaded() && !provider.is_thread_safe() {
        let provider = provider.clone();
        let batch_size = call.context().shared().config.read().batch_size;
        let batches = call
            .dispatcher()
            .unroll_batched(move || provider.search(&query), batch_size);
        return Ok(Box::new(batches));
    }
    provider.search(&query)
}

fn evaluate_query(call: &Call) -> Result<ItemStream, EvaluationError> {
    let call = call.clone();
    Ok(item::deferred(move || {
        let provider = call.context().shared().query_provider().ok_or_else(|| {
            EvaluationError::new(
                EvaluationErrorKind::Query,
                format!("No query provider is set to run `{}`", call.expression().text()),
            )
            .with_span(&call.expression().outer)
        })?;
        let queries = expand_queries(&call)?;
        let results = queries.into_iter().flat_map(move |q| {
            match run_query(&provider, &call, q) {
                Ok(s) => s,
                Err(e) => item::error_stream(e),
            }
        });
        Ok(Box::new(results) as ItemStream)
    }))
}

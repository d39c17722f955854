// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use searchexpr::unstable::empty_stream;
use searchexpr::*;

use std::sync::Arc;
use std::thread::{self, ThreadId};

fn ids(items: &[SearchItem]) -> Vec<String> {
    items.iter().map(|i| i.id.to_string()).collect()
}

fn numbers(items: &[SearchItem]) -> Vec<f64> {
    items.iter().filter_map(|i| i.value.to_number()).collect()
}

fn eval_numbers(engine: &Engine, text: &str) -> Result<Vec<f64>> {
    Ok(numbers(&engine.evaluate(text)?))
}

/// Items named after the words of the query after the first, priced by
/// their length. Items are made as they are pulled.
#[derive(Default)]
struct Catalog {
    queries: Mutex<Vec<String>>,
    threads: Mutex<Vec<ThreadId>>,
    pulls: Arc<Mutex<Vec<ThreadId>>>,
    thread_safe: bool,
}

impl QueryProvider for Catalog {
    fn name(&self) -> &str {
        "catalog"
    }

    fn search(&self, query: &str) -> Result<ItemStream, EvaluationError> {
        self.queries.lock().push(query.to_string());
        self.threads.lock().push(thread::current().id());
        let pulls = self.pulls.clone();
        let words: Vec<String> = query.split_whitespace().skip(1).map(String::from).collect();
        Ok(Box::new(words.into_iter().map(move |w| -> ItemResult {
            pulls.lock().push(thread::current().id());
            Ok(Some(
                SearchItem::new(w.as_str())
                    .with_provider("catalog")
                    .with_field("price", w.len()),
            ))
        })))
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

fn with_catalog(thread_safe: bool) -> (Engine, Arc<Catalog>) {
    let engine = Engine::new();
    let catalog = Arc::new(Catalog {
        thread_safe,
        ..Catalog::default()
    });
    engine.set_query_provider(Some(catalog.clone()));
    (engine, catalog)
}

#[test]
fn builtin_names() {
    let engine = Engine::new();
    let names = engine.evaluators().names();
    for name in [
        "avg", "count", "distinct", "except", "first", "groupby", "intersect", "last", "max",
        "min", "range", "select", "set", "sort", "sum", "text", "union",
    ] {
        assert!(names.iter().any(|n| &**n == name), "missing {name}");
    }
    assert!(Engine::empty().evaluators().is_empty());
}

#[test]
fn ranges_and_sets() -> Result<()> {
    let engine = Engine::new();
    assert_eq!(eval_numbers(&engine, "range{2, 5}")?, vec![2.0, 3.0, 4.0]);
    assert!(engine.evaluate("range{5, 2}")?.is_empty());
    assert_eq!(eval_numbers(&engine, "[1, [2, 3], {4}]")?, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(eval_numbers(&engine, "union{[1, 2], [2, 3]}")?, vec![1.0, 2.0, 3.0]);
    assert_eq!(eval_numbers(&engine, "distinct{[1, 2, 1, 3, 2]}")?, vec![1.0, 2.0, 3.0]);
    assert_eq!(eval_numbers(&engine, "intersect{[1, 2, 3], [2, 3, 4]}")?, vec![2.0, 3.0]);
    assert_eq!(eval_numbers(&engine, "except{range{0, 5}, [1], [3]}")?, vec![0.0, 2.0, 4.0]);
    Ok(())
}

#[test]
fn set_operations_compare_selected_keys() -> Result<()> {
    let engine = Engine::new();
    assert!(engine.register_selector("^initial$", 100, None, |args| {
        let text = args.item.display_value().to_string();
        text.chars().next().map(|c| Value::from(c.to_string()))
    })?);

    let items = engine.evaluate("distinct{['apple', 'avocado', 'banana'], @initial}")?;
    assert_eq!(ids(&items), vec!["apple", "banana"]);

    let items = engine.evaluate("intersect{['apple', 'banana'], ['avocado'], @initial}")?;
    assert_eq!(ids(&items), vec!["apple"]);
    Ok(())
}

#[test]
fn sorting() -> Result<()> {
    let engine = Engine::new();
    assert_eq!(eval_numbers(&engine, "sort{[3, 1, 2]}")?, vec![1.0, 2.0, 3.0]);
    assert_eq!(eval_numbers(&engine, "sort{[3, 1, 2], desc}")?, vec![3.0, 2.0, 1.0]);
    assert_eq!(eval_numbers(&engine, "sort{[3, 1, 2], asc}")?, vec![1.0, 2.0, 3.0]);

    let items = engine.evaluate("sort{['bb', 'a', 'ccc'], @length, desc}")?;
    assert_eq!(ids(&items), vec!["ccc", "bb", "a"]);
    Ok(())
}

#[test]
fn selection_with_aliases() -> Result<()> {
    let engine = Engine::new();
    let items = engine.evaluate("select{[1, 22], {@text} as label, @length}")?;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].value, Value::from("1"));
    assert_eq!(items[1].fields.get("label"), Some(&Value::from("22")));
    // Numbers have no length.
    assert!(items[1].fields.get("length").is_none());

    let items = engine.evaluate("select{['abc'], @length, @type}")?;
    assert_eq!(items[0].value, Value::from(3.0));
    assert_eq!(items[0].fields.get("type"), Some(&Value::from("text")));
    Ok(())
}

#[test]
fn text_of_arguments() -> Result<()> {
    let engine = Engine::new();
    let items = engine.evaluate("text{a, 'b c', 3, @length}")?;
    let texts: Vec<String> = items.iter().map(|i| i.value.to_string()).collect();
    assert_eq!(texts, vec!["a", "b c", "3", "length"]);
    Ok(())
}

#[test]
fn aggregates_name_their_results() -> Result<()> {
    let engine = Engine::new();
    let items = engine.evaluate("count{[1, 2], {range{0, 3}} as r}")?;
    assert_eq!(ids(&items), vec!["[1, 2]", "r"]);
    assert_eq!(numbers(&items), vec![2.0, 3.0]);

    let items = engine.evaluate("sum{range{0, 4}}")?;
    assert_eq!(items[0].id.as_ref(), "sum{range{0, 4}}");
    assert_eq!(items[0].value, Value::from(6.0));
    Ok(())
}

#[test]
fn pipes() -> Result<()> {
    let engine = Engine::new();
    assert_eq!(eval_numbers(&engine, "range{0, 5} | sum")?, vec![10.0]);
    assert_eq!(eval_numbers(&engine, "range{0, 5} | sort{desc} | first")?, vec![4.0]);
    assert_eq!(eval_numbers(&engine, "[1, 1, 2] | distinct | count")?, vec![2.0]);
    Ok(())
}

#[test]
fn queries_run_through_the_provider() -> Result<()> {
    let (engine, catalog) = with_catalog(true);

    let items = engine.evaluate("files a bb ccc")?;
    assert_eq!(ids(&items), vec!["a", "bb", "ccc"]);

    assert_eq!(eval_numbers(&engine, "sum{files a bb ccc, #price}")?, vec![6.0]);
    assert_eq!(eval_numbers(&engine, "avg{files a bb ccc, #price}")?, vec![2.0]);
    assert_eq!(ids(&engine.evaluate("min{files bb a ccc, #price}")?), vec!["a"]);
    assert_eq!(ids(&engine.evaluate("max{files bb a ccc, #price}")?), vec!["ccc"]);

    let items = engine.evaluate("count{groupby{files a bb cc, #price}}")?;
    assert_eq!(ids(&items), vec!["1", "2"]);
    assert_eq!(numbers(&items), vec![1.0, 2.0]);

    catalog.queries.lock().clear();
    let items = engine.evaluate("files {range{0, 2}} x")?;
    assert_eq!(ids(&items), vec!["0", "x", "1", "x"]);
    assert_eq!(*catalog.queries.lock(), vec!["files 0 x", "files 1 x"]);
    Ok(())
}

#[test]
fn queries_need_a_provider() -> Result<()> {
    let engine = Engine::new();
    let err = match engine.evaluate("files a") {
        Ok(_) => bail!("query ran without a provider"),
        Err(e) => e,
    };
    let Some(e) = err.downcast_ref::<EvaluationError>() else {
        bail!("unexpected error {err}");
    };
    assert_eq!(e.kind, EvaluationErrorKind::Query);
    Ok(())
}

#[test]
fn unsafe_providers_run_on_the_main_thread() -> Result<()> {
    let (engine, catalog) = with_catalog(false);
    engine.set_config(EngineConfig {
        batch_size: 2,
        ..engine.config()
    });
    let expr = engine.parse("count{files a b c}")?;
    let results = engine
        .execute_threaded(&expr)
        .collect::<Result<Vec<_>, _>>()?;
    let items: Vec<SearchItem> = results.into_iter().flatten().collect();
    assert_eq!(numbers(&items), vec![3.0]);

    let main = thread::current().id();
    assert_eq!(*catalog.threads.lock(), vec![main]);
    // Pulled in batches, all of them on the main thread.
    assert_eq!(*catalog.pulls.lock(), vec![main; 3]);
    Ok(())
}

#[test]
fn item_handlers() -> Result<()> {
    let engine = Engine::new();
    let answer = Evaluator::new(
        "answer",
        EvaluatorFn::item(|call| {
            let n = call.args().len();
            Ok((n == 0).then(|| SearchItem::new("answer").with_value(42.0)))
        }),
    )
    .with_description("The answer")
    .with_hints(EvaluationHints::DO_NOT_VALIDATE_SIGNATURE);
    engine.register_evaluator(answer, vec![])?;

    assert_eq!(eval_numbers(&engine, "answer{}")?, vec![42.0]);
    assert!(engine.evaluate("answer{1}")?.is_empty());
    Ok(())
}

#[test]
fn lenient_registration_skips_bad_entries() -> Result<()> {
    let engine = Engine::new();
    let blank = Evaluator::new("  ", EvaluatorFn::stream(|_| Ok(empty_stream())));
    assert!(engine.register_evaluator(blank, vec![])?.is_none());

    let odd = Evaluator::new("odd", EvaluatorFn::stream(|_| Ok(empty_stream())));
    let handle = engine.register_evaluator(odd, vec!["Number?, Text".parse()?, "Number".parse()?])?;
    assert!(handle.is_some());
    assert_eq!(engine.evaluators().signatures("odd").len(), 1);

    assert!(!engine.add_signature("missing", "Number".parse()?)?);
    assert!(engine.add_signature("ODD", "Text".parse()?)?);
    assert_eq!(engine.evaluators().signatures("odd").len(), 2);
    assert!(!engine.register_parser(" ", 1, |_| Ok(None))?);
    Ok(())
}

#[test]
fn strict_registration_fails() -> Result<()> {
    let engine = Engine::with_config(EngineConfig {
        registration: RegistrationMode::Strict,
        ..EngineConfig::default()
    });

    let blank = Evaluator::new("", EvaluatorFn::stream(|_| Ok(empty_stream())));
    assert!(matches!(
        engine.register_evaluator(blank, vec![]),
        Err(RegistrationError::InvalidName { .. })
    ));

    let odd = Evaluator::new("odd", EvaluatorFn::stream(|_| Ok(empty_stream())));
    assert!(matches!(
        engine.register_evaluator(odd, vec!["Number..., Text".parse()?]),
        Err(RegistrationError::InvalidSignature { index: 0, .. })
    ));
    assert!(!engine.evaluators().contains("odd"));

    assert!(matches!(
        engine.add_signature("missing", "Number".parse()?),
        Err(RegistrationError::UnknownEvaluator { .. })
    ));
    Ok(())
}

#[test]
fn config_from_json() -> Result<()> {
    let config = EngineConfig::from_json_str(
        r#"{ "stall_timeout": 0.5, "registration": "strict" }"#,
    )?;
    assert_eq!(config.stall_timeout, 0.5);
    assert_eq!(config.registration, RegistrationMode::Strict);
    assert_eq!(config.batch_size, EngineConfig::default().batch_size);
    assert_eq!(config.stall_timeout().as_millis(), 500);

    assert!(EngineConfig::from_json_str(r#"{ "batch_size": "many" }"#).is_err());
    assert!(EngineConfig::from_json_str(r#"{ "registration": "loose" }"#).is_err());

    let negative = EngineConfig {
        stall_timeout: -1.0,
        ..EngineConfig::default()
    };
    assert!(negative.stall_timeout().is_zero());

    let engine = Engine::with_config(config.clone());
    assert_eq!(engine.config(), config);
    Ok(())
}

#[test]
fn signature_errors_at_evaluation() -> Result<()> {
    let engine = Engine::new();
    // Expansion defers the check to evaluation.
    let err = match engine.evaluate("range{...[1]}") {
        Ok(_) => bail!("signature not checked"),
        Err(e) => e,
    };
    let Some(e) = err.downcast_ref::<EvaluationError>() else {
        bail!("unexpected error {err}");
    };
    assert_eq!(e.kind, EvaluationErrorKind::Signature);
    assert!(e.message.contains("expects 2 argument(s) but received 1"), "{}", e.message);
    Ok(())
}

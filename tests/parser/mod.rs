// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{anyhow, bail, Result};
use searchexpr::{unstable::*, *};
use serde::{Deserialize, Serialize};

macro_rules! my_assert_eq {
    ($left:expr, $right:expr, $($arg:tt)+) => {
	match (&($left), &($right)) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
		    return Err(anyhow!("mismatch:\nleft  = {:?}\nright = {:?}\n{}",
		     		       &$left, &$right, format_args!($($arg)+)));
                }
            }
	}
    }
}

/// Expected shape of a parsed node. Absent fields are not checked.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct ExprSpec {
    types: Option<String>,
    evaluator: Option<String>,
    span: Option<String>,
    inner: Option<String>,
    alias: Option<String>,
    value: Option<String>,
    expandable: Option<bool>,
    parameter_count: Option<usize>,
    parameters: Option<Vec<ExprSpec>>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TestCase {
    note: String,
    text: String,
    expr: Option<ExprSpec>,
    error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct YamlTest {
    cases: Vec<TestCase>,
}

fn here(e: &Expr) -> String {
    e.outer.message("match-error", "mismatch happened here.")
}

fn match_expr(e: &Expr, spec: &ExprSpec) -> Result<()> {
    if let Some(types) = &spec.types {
        my_assert_eq!(e.types.to_string(), *types, "{}", here(e));
    }
    if let Some(evaluator) = &spec.evaluator {
        my_assert_eq!(e.evaluator.name(), evaluator.as_str(), "{}", here(e));
    }
    if let Some(span) = &spec.span {
        my_assert_eq!(e.text(), span.as_str(), "{}", here(e));
    }
    if let Some(inner) = &spec.inner {
        my_assert_eq!(e.inner_text(), inner.as_str(), "{}", here(e));
    }
    if let Some(alias) = &spec.alias {
        my_assert_eq!(e.alias.as_deref(), Some(alias.as_str()), "{}", here(e));
    }
    if let Some(value) = &spec.value {
        my_assert_eq!(e.value.to_string(), *value, "{}", here(e));
    }
    if let Some(expandable) = spec.expandable {
        my_assert_eq!(e.is_expandable(), expandable, "{}", here(e));
    }
    if let Some(count) = spec.parameter_count {
        my_assert_eq!(e.parameters.len(), count, "{}", here(e));
    }
    if let Some(parameters) = &spec.parameters {
        my_assert_eq!(
            e.parameters.len(),
            parameters.len(),
            "mismatch in number of parameters\n{}",
            here(e)
        );
        for (p, s) in e.parameters.iter().zip(parameters) {
            match_expr(p, s)?;
        }
    }
    Ok(())
}

fn yaml_test_impl(yaml: &str) -> Result<()> {
    let test: YamlTest = serde_yaml::from_str(yaml)?;
    let engine = Engine::new();

    for case in &test.cases {
        print!("\ncase {} ", case.note);
        match engine.parse(&case.text) {
            Ok(expr) => {
                if let Some(e) = &case.error {
                    bail!("error `{}` not raised by parser.", e);
                }
                if let Some(spec) = &case.expr {
                    match_expr(&expr, spec)?;
                }
            }
            Err(actual) => match &case.error {
                Some(expected) => {
                    let actual = actual.to_string();
                    if !actual.contains(expected) {
                        bail!(
                            "Error message\n`{}\n`\ndoes not contain `{}`",
                            actual,
                            expected
                        );
                    }
                    println!("{actual}");
                }
                _ => return Err(actual.into()),
            },
        }

        println!("passed");
    }

    println!("{} cases passed.", test.cases.len());
    Ok(())
}

fn yaml_test(yaml: &str) {
    if let Err(e) = yaml_test_impl(yaml) {
        // If Err is returned, it doesn't always get printed by cargo test.
        // Therefore, panic with the error.
        panic!("{}", e);
    }
}

#[test]
fn expressions() {
    yaml_test(include_str!("cases.yaml"))
}

#[test]
fn errors() {
    yaml_test(include_str!("errors.yaml"))
}

#[test]
fn custom_parsers_take_priority() -> Result<()> {
    let engine = Engine::new();
    assert!(engine.register_parser("hex", 55, |args| {
        let Some(digits) = args.text.text().strip_prefix("0x") else {
            return Ok(None);
        };
        let Ok(n) = i64::from_str_radix(digits, 16) else {
            return Ok(None);
        };
        Ok(Some(Expr::literal(
            ValueTypeFlags::NUMBER,
            args.text.clone(),
            Value::from(n),
        )))
    })?);

    let items = engine.evaluate("sum{[0x10, 0x0f, 1]}")?;
    assert_eq!(items[0].value, Value::from(32.0));

    // The default grammar comes back on refresh.
    engine.refresh_parsers();
    assert!(engine.evaluate("sum{[0x10]}").is_err());
    assert_eq!(engine.parsers().len(), 12);
    Ok(())
}

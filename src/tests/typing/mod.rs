// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::evaluator::EvaluatorHandle;
use crate::lexer::Source;
use crate::registry::RegistrationError;
use crate::type_checker::*;
use crate::typing::*;
use crate::value::Value;

use anyhow::{bail, Result};

/// A call node over literals of the given types.
fn call_of(types: &[ValueTypeFlags]) -> (ExprRef, Vec<ExprRef>) {
    let source = Source::from_contents("<test>", "f{a, b, c, d}");
    let span = source.full_span();
    let args: Vec<ExprRef> = types
        .iter()
        .enumerate()
        .map(|(i, t)| Expr::literal(*t, span.sub(2 + 3 * i, 3 + 3 * i), Value::from(i)))
        .collect();
    let call = Expr::call(EvaluatorHandle::invalid(), span, None, args.clone());
    (call, args)
}

fn check(signature: &str, types: &[ValueTypeFlags]) -> Result<Result<(), SignatureMismatch>> {
    let signature: Signature = signature.parse()?;
    let (call, args) = call_of(types);
    Ok(validate_call(&[signature], &call, &args))
}

#[test]
fn signature_text_form() -> Result<()> {
    let s: Signature = "Number, Text?".parse()?;
    assert_eq!(s.len(), 2);
    assert_eq!(s.mandatory_argument_count(), 1);
    assert!(!s.is_variadic());
    assert_eq!(s.to_string(), "Number, Text?");

    let v: Signature = "Iterable, Selector|Text...".parse()?;
    assert!(v.is_variadic());
    assert_eq!(v.arguments()[1].types, ValueTypeFlags::SELECTOR | ValueTypeFlags::TEXT);
    assert_eq!(v.to_string(), "Iterable, Text|Selector...");

    assert!("Number, Bogus".parse::<Signature>().is_err());
    assert!("Number, ?".parse::<Signature>().is_err());
    assert!("".parse::<Signature>()?.is_empty());
    Ok(())
}

#[test]
fn arity_of_optional_signature() -> Result<()> {
    use ValueTypeFlags as T;

    assert!(check("Number, Text?", &[T::NUMBER])?.is_ok());
    assert!(check("Number, Text?", &[T::NUMBER, T::TEXT])?.is_ok());

    let Err(e) = check("Number, Text?", &[])? else {
        bail!("zero arguments accepted");
    };
    assert!(e.message.contains("expects 1 argument(s) but received 0"), "{}", e.message);

    let Err(e) = check("Number, Text?", &[T::NUMBER, T::TEXT, T::TEXT])? else {
        bail!("three arguments accepted");
    };
    assert!(e.message.contains("at most 2"), "{}", e.message);
    Ok(())
}

#[test]
fn type_mismatch_names_the_position() -> Result<()> {
    use ValueTypeFlags as T;

    let Err(e) = check("Number, Text", &[T::TEXT, T::NUMBER])? else {
        bail!("mismatched types accepted");
    };
    assert!(e.message.contains("position 0"), "{}", e.message);
    assert!(e.message.contains("expects Number"), "{}", e.message);
    assert_eq!(e.span.text(), "a");
    Ok(())
}

#[test]
fn variadic_reuses_the_last_type() -> Result<()> {
    use ValueTypeFlags as T;

    assert!(check("Set, Number...", &[T::SET, T::NUMBER, T::NUMBER, T::NUMBER])?.is_ok());
    let Err(e) = check("Set, Number...", &[T::SET, T::NUMBER, T::TEXT])? else {
        bail!("text accepted as a variadic number");
    };
    assert!(e.message.contains("position 2"), "{}", e.message);
    Ok(())
}

#[test]
fn any_overload_passing_is_enough() -> Result<()> {
    use ValueTypeFlags as T;

    let signatures: Vec<Signature> = vec!["Number".parse()?, "Text, Text".parse()?];
    let (call, args) = call_of(&[T::TEXT, T::TEXT]);
    assert!(validate_call(&signatures, &call, &args).is_ok());

    // The last failure wins.
    let (call, args) = call_of(&[T::BOOLEAN]);
    let Err(e) = validate_call(&signatures, &call, &args) else {
        bail!("boolean accepted");
    };
    assert!(e.message.starts_with("Signature (Number)"), "{}", e.message);

    assert!(validate_call(&[], &call, &args).is_ok());
    Ok(())
}

#[test]
fn structural_signature_rules() -> Result<()> {
    let invalid_at = |text: &str| -> Result<Option<usize>> {
        let signature: Signature = text.parse()?;
        Ok(match validate_signature("f", &signature) {
            Ok(()) => None,
            Err(RegistrationError::InvalidSignature { index, .. }) => Some(index),
            Err(e) => bail!("unexpected error {e}"),
        })
    };

    assert_eq!(invalid_at("Number..., Text")?, Some(0));
    assert_eq!(invalid_at("Number?, Text")?, Some(1));
    assert_eq!(invalid_at("Number, Text?, Iterable?...")?, None);

    let empty = Signature::new(vec![Argument::new(ValueTypeFlags::empty())]);
    assert!(matches!(
        validate_signature("f", &empty),
        Err(RegistrationError::InvalidSignature { index: 0, .. })
    ));
    Ok(())
}

#[test]
fn type_flag_names() -> Result<()> {
    assert_eq!("iterable".parse::<ValueTypeFlags>()?, ValueTypeFlags::ITERABLE);
    assert_eq!(ValueTypeFlags::ANY_EXPRESSION.to_string(), "AnyExpression");
    assert_eq!(
        (ValueTypeFlags::SET | ValueTypeFlags::EXPANDABLE).to_string(),
        "Set"
    );
    assert_eq!("desc".parse::<Keyword>()?, Keyword::Desc);
    assert!("sideways".parse::<Keyword>().is_err());
    Ok(())
}

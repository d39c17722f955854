// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{Expr, ExprRef};
use crate::lexer::{ParseError, Span};
use crate::registry::RegistrationError;
use crate::typing::{Signature, ValueTypeFlags};

/// Why a call did not satisfy any signature.
#[derive(Debug, Clone)]
pub struct SignatureMismatch {
    pub message: String,
    /// The offending argument, or the call itself for arity failures.
    pub span: Span,
}

impl SignatureMismatch {
    pub fn to_parse_error(&self) -> ParseError {
        self.span.error(&self.message)
    }
}

/// Structural check of a signature at registration.
pub fn validate_signature(evaluator: &str, signature: &Signature) -> Result<(), RegistrationError> {
    let args = signature.arguments();
    let invalid = |index: usize, message: String| RegistrationError::InvalidSignature {
        evaluator: evaluator.into(),
        index,
        message: message.into(),
    };

    let mut optional_seen = false;
    for (index, arg) in args.iter().enumerate() {
        if arg.variadic && index + 1 != args.len() {
            return Err(invalid(
                index,
                "only the last argument can be variadic".to_string(),
            ));
        }
        if optional_seen && !arg.optional {
            return Err(invalid(
                index,
                "a mandatory argument cannot follow an optional one".to_string(),
            ));
        }
        optional_seen |= arg.optional;
        if !arg.types.intersects(ValueTypeFlags::ANY_EXPRESSION) {
            return Err(invalid(
                index,
                format!("type {} is not an expression type", arg.types),
            ));
        }
    }
    Ok(())
}

fn check_arity(
    signature: &Signature,
    call: &Expr,
    args: &[ExprRef],
) -> Result<(), SignatureMismatch> {
    let count = args.len();
    let mandatory = signature.mandatory_argument_count();
    let fail = |message: String| SignatureMismatch {
        message,
        span: call.outer.clone(),
    };

    if count == 0 && mandatory > 0 {
        return Err(fail(format!(
            "Signature ({signature}) expects {mandatory} argument(s) but received 0"
        )));
    }
    if count > signature.len() && !signature.is_variadic() {
        return Err(fail(format!(
            "Signature ({signature}) expects at most {} argument(s) but received {count}",
            signature.len()
        )));
    }
    if count < mandatory {
        return Err(fail(format!(
            "Signature ({signature}) expects {mandatory} argument(s) but received {count}"
        )));
    }
    Ok(())
}

fn check_types(signature: &Signature, args: &[ExprRef]) -> Result<(), SignatureMismatch> {
    let expected_args = signature.arguments();
    if expected_args.is_empty() {
        return Ok(());
    }
    for (i, arg) in args.iter().enumerate() {
        // Overflow positions reuse the trailing variadic argument type.
        let expected = &expected_args[i.min(expected_args.len() - 1)];
        let actual = arg.types.kinds();
        if !actual.matches(expected.types.kinds()) {
            return Err(SignatureMismatch {
                message: format!(
                    "Signature ({signature}): argument at position {i} expects {} but `{}` is {actual}",
                    expected.types,
                    arg.text()
                ),
                span: arg.outer.clone(),
            });
        }
    }
    Ok(())
}

/// Checks `args` against the overload set of the evaluator bound to `call`.
///
/// Arity is checked first for every overload, then types for the overloads
/// that survive. Succeeds as soon as one overload passes both. Otherwise the
/// last failure encountered is returned.
pub fn validate_call(
    signatures: &[Signature],
    call: &Expr,
    args: &[ExprRef],
) -> Result<(), SignatureMismatch> {
    if signatures.is_empty() {
        return Ok(());
    }

    let mut last_error = None;
    let mut candidates = Vec::with_capacity(signatures.len());
    for signature in signatures {
        match check_arity(signature, call, args) {
            Ok(()) => candidates.push(signature),
            Err(e) => last_error = Some(e),
        }
    }

    for signature in candidates {
        match check_types(signature, args) {
            Ok(()) => return Ok(()),
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

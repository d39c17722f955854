// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod ast;
pub mod builtins;
mod engine;
mod evaluator;
pub mod interpreter;
mod item;
mod lexer;
mod parser;
mod query;
mod registry;
pub mod scheduler;
mod selector;
mod type_checker;
mod typing;
mod value;

pub(crate) use std::sync::Arc as Rc;

pub use engine::{Engine, EngineConfig};
pub use evaluator::{
    EvaluationHints, Evaluator, EvaluatorFn, EvaluatorHandle, EvaluatorRegistry, ItemHandler,
    StreamHandler,
};
pub use interpreter::error::{EvaluationError, EvaluationErrorKind};
pub use interpreter::iteration::{Accumulator, ArgumentResults, ControlSignal, Fold};
pub use interpreter::runtime::{ExecutionFlags, ExecutionFrame, FrameGuard, Runtime};
pub use interpreter::{Call, EvaluationContext};
pub use item::{ItemResult, ItemStream, SearchItem};
pub use lexer::{ParseError, Source, Span};
pub use query::QueryProvider;
pub use registry::{RegistrationError, RegistrationMode, Registry};
pub use scheduler::{BatchedResults, Dispatcher, ThreadedResults, UnrolledBatches};
pub use selector::{SelectedValue, SelectorArgs, SelectorBinding, SelectorRegistry};
pub use type_checker::{validate_call, validate_signature, SignatureMismatch};
pub use typing::{Argument, Keyword, Signature, ValueTypeFlags};
pub use value::Value;

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::ast::*;
    pub use crate::item::{deferred, empty_stream, error_stream, stream_of};
    pub use crate::lexer::*;
    pub use crate::parser::*;
    pub use crate::query::expand_queries;
}

#[cfg(test)]
mod tests;

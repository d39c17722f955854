// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Span;
use crate::Rc;

use thiserror::Error;

type String = Rc<str>;

/// Category of an [`EvaluationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EvaluationErrorKind {
    /// Node bound to a missing or unknown evaluator.
    #[error("invalid evaluator")]
    InvalidEvaluator,
    /// Arguments did not satisfy any signature of the evaluator.
    #[error("signature mismatch")]
    Signature,
    /// A parameter could not be expanded into arguments.
    #[error("cannot expand")]
    Expansion,
    /// No non-null item was produced within the stall timeout.
    #[error("timeout")]
    Timeout,
    /// Raised by an evaluator handler.
    #[error("evaluation failed")]
    Handler,
    /// The main-thread bridge failed to run a task.
    #[error("dispatcher")]
    Dispatcher,
    /// Query strings could not be run.
    #[error("query failed")]
    Query,
}

/// Error raised while walking an expression tree.
///
/// `span` locates the failing sub-expression in the search text and `frame`
/// names the call that was executing when the error was raised.
#[derive(Debug, Clone, Error)]
#[error("{}", render(.kind, .message, .span, .frame))]
pub struct EvaluationError {
    pub kind: EvaluationErrorKind,
    pub message: String,
    pub span: Option<Span>,
    pub frame: Option<String>,
}

impl EvaluationError {
    pub fn new(kind: EvaluationErrorKind, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: message.as_ref().into(),
            span: None,
            frame: None,
        }
    }

    pub fn handler(message: impl AsRef<str>) -> Self {
        Self::new(EvaluationErrorKind::Handler, message)
    }

    pub fn timeout(message: impl AsRef<str>) -> Self {
        Self::new(EvaluationErrorKind::Timeout, message)
    }

    pub fn dispatcher(message: impl AsRef<str>) -> Self {
        Self::new(EvaluationErrorKind::Dispatcher, message)
    }

    pub fn with_span(mut self, span: &Span) -> Self {
        self.span = Some(span.clone());
        self
    }

    pub fn with_frame(mut self, frame: impl AsRef<str>) -> Self {
        self.frame = Some(frame.as_ref().into());
        self
    }

    /// Fills in location details that are still missing.
    ///
    /// Existing values are kept so the innermost failure stays anchored.
    pub fn or_locate(mut self, span: &Span, frame: &str) -> Self {
        if self.span.is_none() {
            self.span = Some(span.clone());
        }
        if self.frame.is_none() {
            self.frame = Some(frame.into());
        }
        self
    }

    pub fn offset(&self) -> Option<usize> {
        self.span.as_ref().map(|s| s.start)
    }

    pub fn length(&self) -> Option<usize> {
        self.span.as_ref().map(|s| s.len())
    }
}

fn render(
    kind: &EvaluationErrorKind,
    message: &str,
    span: &Option<Span>,
    frame: &Option<String>,
) -> std::string::String {
    let msg = match frame {
        Some(frame) => format!("{message} (in `{frame}`)"),
        None => message.to_string(),
    };
    match span {
        Some(span) => span.message(&kind.to_string(), &msg),
        None => format!("{kind}: {msg}"),
    }
}

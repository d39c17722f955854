// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::builtins;
use crate::evaluator::{EvaluationHints, EvaluatorHandle, EvaluatorRegistry};
use crate::lexer::*;
use crate::query;
use crate::registry::{validate_name, RegistrationError};
use crate::type_checker;
use crate::typing::{Keyword, ValueTypeFlags};
use crate::value::Value;
use crate::*;

use core::str::FromStr;

use parking_lot::RwLock;

pub type ParserHandler = dyn Fn(&ParserArgs) -> Result<Option<ExprRef>, ParseError> + Send + Sync;

/// A named text-to-expression parser.
pub struct SearchParser {
    pub name: Rc<str>,
    pub priority: i32,
    handler: Rc<ParserHandler>,
}

impl SearchParser {
    pub fn new<F>(name: &str, priority: i32, handler: F) -> Self
    where
        F: Fn(&ParserArgs) -> Result<Option<ExprRef>, ParseError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            handler: Rc::new(handler),
        }
    }
}

/// Input handed to a parser.
pub struct ParserArgs<'a> {
    /// Trimmed text to parse.
    pub text: Span,
    /// Hints of the evaluator whose argument is being parsed.
    pub hints: EvaluationHints,
    ctx: &'a ParseContext<'a>,
}

impl ParserArgs<'_> {
    /// Parses a sub-span outside of any call.
    pub fn parse(&self, span: &Span) -> Result<ExprRef, ParseError> {
        self.ctx.parse(span, EvaluationHints::empty())
    }

    pub fn parse_with(&self, span: &Span, hints: EvaluationHints) -> Result<ExprRef, ParseError> {
        self.ctx.parse(span, hints)
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        self.ctx.evaluators
    }
}

/// One parse run over a snapshot of the parser table.
pub struct ParseContext<'a> {
    parsers: Vec<Rc<SearchParser>>,
    evaluators: &'a EvaluatorRegistry,
}

impl<'a> ParseContext<'a> {
    pub fn parse(&self, span: &Span, hints: EvaluationHints) -> Result<ExprRef, ParseError> {
        let args = ParserArgs {
            text: span.trim(),
            hints,
            ctx: self,
        };
        for parser in self.parsers.iter() {
            if let Some(expr) = (parser.handler)(&args)? {
                log::trace!("`{}` parsed by {}", args.text.text(), parser.name);
                return Ok(expr);
            }
        }
        Err(span.error(&format!(
            "No parser matched search expression `{}`",
            span.text()
        )))
    }
}

/// Parsers tried in ascending priority, ties in registration order.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: RwLock<Vec<Rc<SearchParser>>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parser, replacing one of the same name.
    pub fn register(&self, parser: SearchParser) -> Result<(), RegistrationError> {
        validate_name(&parser.name, "parsers")?;
        log::debug!(
            "registered parser '{}' (priority {})",
            parser.name,
            parser.priority
        );
        let mut parsers = self.parsers.write();
        parsers.retain(|p| !p.name.eq_ignore_ascii_case(&parser.name));
        parsers.push(Rc::new(parser));
        parsers.sort_by_key(|p| p.priority);
        Ok(())
    }

    /// Clears the table and installs the default grammar.
    pub fn refresh(&self) {
        let mut parsers = self.parsers.write();
        parsers.clear();
        parsers.extend(default_parsers().into_iter().map(Rc::new));
        parsers.sort_by_key(|p| p.priority);
    }

    pub fn names(&self) -> Vec<Rc<str>> {
        self.parsers.read().iter().map(|p| p.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.parsers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.read().is_empty()
    }

    /// Parses the whole of `source`.
    pub fn parse(
        &self,
        evaluators: &EvaluatorRegistry,
        source: &Source,
    ) -> Result<ExprRef, ParseError> {
        // Parsers recurse into the table, so they run on a snapshot.
        let ctx = ParseContext {
            parsers: self.parsers.read().clone(),
            evaluators,
        };
        let expr = ctx.parse(&source.full_span(), EvaluationHints::empty())?;
        log::debug!("parsed {expr:?}");
        Ok(expr)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Byte length of the identifier `text` starts with.
fn leading_identifier(text: &str) -> Option<usize> {
    if !text.starts_with(is_ident_start) {
        return None;
    }
    Some(text.find(|c: char| !is_ident_char(c)).unwrap_or(text.len()))
}

fn is_identifier(text: &str) -> bool {
    leading_identifier(text) == Some(text.len())
}

/// Splits `left as name`, returning the length of `left` and the name.
fn split_alias(text: &str) -> Option<(usize, &str)> {
    let t = text.trim_end();
    let name_start = t
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())?;
    let name = &t[name_start..];
    if !is_identifier(name) || name.contains('.') {
        return None;
    }
    let left = t[..name_start].trim_end().strip_suffix("as")?;
    if !left.ends_with(char::is_whitespace) {
        return None;
    }
    Some((left.trim_end().len(), name))
}

/// `name` or `name{...}` after a pipe. Returns the name length.
fn pipe_target(text: &str) -> Option<usize> {
    let n = leading_identifier(text)?;
    let rest = &text[n..];
    (rest.is_empty() || (rest.starts_with('{') && rest.ends_with('}'))).then_some(n)
}

fn is_number(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
}

fn is_selector(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some('@' | '#' | '$'))
        && chars.next().is_some_and(is_ident_start)
        && chars.all(|c| is_ident_char(c) || c == '-' || c == '/')
}

pub const EXPAND_PRIORITY: i32 = 10;
pub const ALIAS_PRIORITY: i32 = 20;
pub const PIPE_PRIORITY: i32 = 30;
pub const GROUP_PRIORITY: i32 = 40;
pub const CALL_PRIORITY: i32 = 50;
pub const NUMBER_PRIORITY: i32 = 60;
pub const BOOLEAN_PRIORITY: i32 = 70;
pub const STRING_PRIORITY: i32 = 80;
pub const SELECTOR_PRIORITY: i32 = 90;
pub const KEYWORD_PRIORITY: i32 = 100;
pub const IMPLICIT_TEXT_PRIORITY: i32 = 110;
pub const QUERY_PRIORITY: i32 = 1000;

pub fn default_parsers() -> Vec<SearchParser> {
    vec![
        SearchParser::new("expand", EXPAND_PRIORITY, parse_expand),
        SearchParser::new("alias", ALIAS_PRIORITY, parse_alias),
        SearchParser::new("pipe", PIPE_PRIORITY, parse_pipe),
        SearchParser::new("group", GROUP_PRIORITY, parse_group),
        SearchParser::new("call", CALL_PRIORITY, parse_call),
        SearchParser::new("number", NUMBER_PRIORITY, parse_number),
        SearchParser::new("boolean", BOOLEAN_PRIORITY, parse_boolean),
        SearchParser::new("string", STRING_PRIORITY, parse_string),
        SearchParser::new("selector", SELECTOR_PRIORITY, parse_selector),
        SearchParser::new("keyword", KEYWORD_PRIORITY, parse_keyword),
        SearchParser::new("implicit_text", IMPLICIT_TEXT_PRIORITY, parse_implicit_text),
        SearchParser::new("query", QUERY_PRIORITY, parse_query),
    ]
}

/// Parse-time signature check, skipped when arguments may still expand.
fn validate_at_parse(args: &ParserArgs, call: &ExprRef) -> Result<(), ParseError> {
    let hints = call.evaluator.hints();
    if hints.intersects(
        EvaluationHints::DO_NOT_VALIDATE_SIGNATURE | EvaluationHints::DO_NOT_VALIDATE_ARGS_SIGNATURE,
    ) {
        return Ok(());
    }
    let expands = call.parameters.iter().any(|p| {
        p.is_expandable() || p.evaluator.hints().contains(EvaluationHints::ALWAYS_EXPAND)
    });
    if expands {
        return Ok(());
    }
    let signatures = args.evaluators().signatures(call.evaluator.name());
    type_checker::validate_call(&signatures, call, &call.parameters)
        .map_err(|m| m.to_parse_error())
}

fn parse_arguments(
    args: &ParserArgs,
    group: &Span,
    hints: EvaluationHints,
) -> Result<Vec<ExprRef>, ParseError> {
    extract_arguments(group)?
        .iter()
        .map(|a| args.parse_with(a, hints))
        .collect()
}

fn set_evaluator(args: &ParserArgs) -> EvaluatorHandle {
    let handle = args.evaluators().find("set");
    if handle.is_valid() {
        handle
    } else {
        builtins::sets::intrinsic_set()
    }
}

fn parse_expand(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = &args.text;
    if !text.text().starts_with("...") {
        return Ok(None);
    }
    let rest = text.sub(text.start + 3, text.end).trim();
    if rest.is_empty() {
        return Err(text.error("Nothing to expand after `...`"));
    }
    let expr = args.parse_with(&rest, args.hints)?;
    Ok(Some(
        expr.with_types(expr.types | ValueTypeFlags::EXPANDABLE)
            .with_outer_span(text),
    ))
}

fn parse_alias(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = &args.text;
    let Some((left_len, name)) = split_alias(text.text()) else {
        return Ok(None);
    };
    let left = text.sub(text.start, text.start + left_len);
    if !(left.text().ends_with('}') || left.text().ends_with(']')) || scan(&left, None).is_err() {
        return Ok(None);
    }
    let expr = args.parse_with(&left, args.hints)?;
    Ok(Some(expr.with_alias(name).with_outer_span(text)))
}

fn parse_pipe(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = &args.text;
    let separators = find_separators(text, '|')?;
    if separators.is_empty() {
        return Ok(None);
    }

    let mut segments = vec![];
    let mut start = text.start;
    for sep in separators.iter().copied().chain(core::iter::once(text.end)) {
        segments.push(text.sub(start, sep).trim());
        start = sep + 1;
    }
    if segments[0].is_empty() || segments[1..].iter().any(|s| pipe_target(s.text()).is_none()) {
        return Ok(None);
    }

    let mut expr = args.parse(&segments[0])?;
    for segment in &segments[1..] {
        let Some(name_len) = pipe_target(segment.text()) else {
            return Ok(None);
        };
        let name_span = segment.sub(segment.start, segment.start + name_len);
        let evaluator = args
            .evaluators()
            .find_for_parsing(name_span.text(), &name_span)?;
        let extra = if name_len < segment.len() {
            let group = segment.sub(segment.start + name_len, segment.end);
            parse_arguments(args, &group, evaluator.hints())?
        } else {
            vec![]
        };
        expr = Expr::apply(
            &expr,
            evaluator,
            extra,
            text.sub(text.start, segment.end),
        );
        validate_at_parse(args, &expr)?;
    }
    Ok(Some(expr))
}

fn parse_group(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let Some(group) = enclosing_group(&args.text)? else {
        return Ok(None);
    };
    let spans = extract_arguments(&group.outer)?;
    if group.kind == GroupKind::Curly && spans.len() == 1 {
        return Ok(Some(args.parse_with(&spans[0], args.hints)?));
    }
    let params = spans
        .iter()
        .map(|s| args.parse_with(s, args.hints))
        .collect::<Result<Vec<_>, _>>()?;
    let expr = Expr::new(
        ValueTypeFlags::SET,
        args.text.clone(),
        Some(group.inner.clone()),
        set_evaluator(args),
        params,
    )
    .with_escaped_nested(group.has_escaped_nested);
    Ok(Some(expr))
}

fn parse_call(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = &args.text;
    let Some(name_len) = leading_identifier(text.text()) else {
        return Ok(None);
    };
    if !text.text()[name_len..].starts_with('{') {
        return Ok(None);
    }
    let open = text.start + name_len;
    let rest = text.sub(open, text.end);
    let group = match enclosing_group(&rest)? {
        Some(g) if g.kind == GroupKind::Curly => g,
        _ => return Ok(None),
    };

    let name_span = text.sub(text.start, open);
    let evaluator = args
        .evaluators()
        .find_for_parsing(name_span.text(), &name_span)?;
    let params = parse_arguments(args, &group.outer, evaluator.hints())?;
    let expr = Expr::call(evaluator, text.clone(), Some(group.inner.clone()), params)
        .with_escaped_nested(group.has_escaped_nested);
    validate_at_parse(args, &expr)?;
    Ok(Some(expr))
}

fn parse_number(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = args.text.text();
    if !is_number(text) {
        return Ok(None);
    }
    match text.parse::<f64>() {
        Ok(n) => Ok(Some(Expr::literal(
            ValueTypeFlags::NUMBER,
            args.text.clone(),
            Value::from(n),
        ))),
        Err(_) => Ok(None),
    }
}

fn parse_boolean(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = args.text.text();
    let value = if text.eq_ignore_ascii_case("true") {
        true
    } else if text.eq_ignore_ascii_case("false") {
        false
    } else {
        return Ok(None);
    };
    Ok(Some(Expr::literal(
        ValueTypeFlags::BOOLEAN,
        args.text.clone(),
        Value::from(value),
    )))
}

fn parse_string(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = args.text.text();
    let Some(quote) = text.chars().next().filter(|c| *c == '\'' || *c == '"') else {
        return Ok(None);
    };
    if text.len() < 2 {
        return Ok(None);
    }

    let mut value = String::new();
    let mut chars = text[1..].char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return Ok(None),
            },
            // A string literal ends exactly at the end of the text.
            _ if ch == quote => {
                if 1 + idx + ch.len_utf8() != text.len() {
                    return Ok(None);
                }
                let inner = args.text.sub(args.text.start + 1, args.text.end - 1);
                let mut expr = Expr::literal(
                    ValueTypeFlags::TEXT,
                    args.text.clone(),
                    Value::from(value),
                )
                .as_ref()
                .clone();
                expr.inner = inner;
                return Ok(Some(Ref::new(expr)));
            }
            _ => value.push(ch),
        }
    }
    Err(args
        .text
        .error(&format!("Unterminated string: missing closing `{quote}`")))
}

fn parse_selector(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = args.text.text();
    if !is_selector(text) {
        return Ok(None);
    }
    let name = text.strip_prefix('@').unwrap_or(text);
    Ok(Some(Expr::literal(
        ValueTypeFlags::SELECTOR,
        args.text.clone(),
        Value::from(name),
    )))
}

fn parse_keyword(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    let text = args.text.text();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_alphabetic()) {
        return Ok(None);
    }
    match Keyword::from_str(text) {
        Ok(keyword) => Ok(Some(Expr::literal(
            ValueTypeFlags::KEYWORD,
            args.text.clone(),
            Value::from(keyword.as_str()),
        ))),
        Err(_) => Ok(None),
    }
}

fn parse_implicit_text(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    if !args.hints.contains(EvaluationHints::IMPLICIT_ARGS_LITERALS) || args.text.is_empty() {
        return Ok(None);
    }
    if !extract_groups(&args.text)?.is_empty() {
        return Ok(None);
    }
    Ok(Some(Expr::literal(
        ValueTypeFlags::TEXT,
        args.text.clone(),
        Value::from(unescape_brackets(args.text.text())),
    )))
}

fn parse_query(args: &ParserArgs) -> Result<Option<ExprRef>, ParseError> {
    if args.text.is_empty() {
        return Ok(None);
    }
    let scanned = scan(&args.text, None)?;
    let params = scanned
        .groups
        .iter()
        .map(|g| Ok(args.parse(&g.outer)?.with_outer_span(&g.outer)))
        .collect::<Result<Vec<_>, ParseError>>()?;
    Ok(Some(
        Expr::new(
            ValueTypeFlags::QUERY_STRING,
            args.text.clone(),
            None,
            query::query_evaluator(),
            params,
        )
        .with_escaped_nested(scanned.has_escaped),
    ))
}

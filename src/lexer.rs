// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::*;
use core::cmp;
use core::fmt::{self, Debug, Formatter};
use thiserror::Error;

#[derive(Clone)]
struct SourceInternal {
    pub name: String,
    pub contents: String,
    pub lines: Vec<(usize, usize)>,
}

/// Search text shared by every span and node parsed from it.
#[derive(Clone)]
pub struct Source {
    src: Rc<SourceInternal>,
}

impl cmp::PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.src, &other.src)
    }
}

impl cmp::Eq for Source {}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.src.name.fmt(f)
    }
}

impl Source {
    pub fn from_contents(name: impl Into<String>, contents: impl Into<String>) -> Source {
        let contents = contents.into();
        let mut lines = vec![];
        let mut prev_ch = ' ';
        let mut prev_pos = 0usize;
        let mut start = 0usize;
        for (i, ch) in contents.char_indices() {
            if ch == '\n' {
                let end = match prev_ch {
                    '\r' => prev_pos,
                    _ => i,
                };
                lines.push((start, end));
                start = i + 1;
            }
            prev_ch = ch;
            prev_pos = i;
        }

        if start < contents.len() || contents.is_empty() {
            lines.push((start, contents.len()));
        } else {
            lines.push((contents.len(), contents.len()));
        }

        Self {
            src: Rc::new(SourceInternal {
                name: name.into(),
                contents,
                lines,
            }),
        }
    }

    /// A source for nodes built programmatically rather than parsed.
    pub fn synthetic(contents: impl Into<String>) -> Source {
        Self::from_contents("<synthetic>", contents)
    }

    pub fn name(&self) -> &str {
        &self.src.name
    }

    pub fn contents(&self) -> &str {
        &self.src.contents
    }

    pub fn line(&self, idx: usize) -> &str {
        match self.src.lines.get(idx) {
            Some((start, end)) => &self.src.contents[*start..*end],
            None => "",
        }
    }

    /// 1-based line and column of a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let idx = self
            .src
            .lines
            .iter()
            .rposition(|(start, _)| *start <= offset)
            .unwrap_or(0);
        let (start, _) = self.src.lines.get(idx).copied().unwrap_or((0, 0));
        let col = self.src.contents[start..offset.min(self.src.contents.len())]
            .chars()
            .count();
        (idx + 1, col + 1)
    }

    pub fn span(&self, start: usize, end: usize) -> Span {
        Span {
            source: self.clone(),
            start,
            end,
        }
    }

    pub fn full_span(&self) -> Span {
        self.span(0, self.src.contents.len())
    }

    pub fn message(&self, line: usize, col: usize, kind: &str, msg: &str) -> String {
        if line > self.src.lines.len() {
            return format!("{}: invalid line {} specified", self.src.name, line);
        }

        let line_str = format!("{line}");
        let line_num_width = line_str.len() + 1;
        let col_spaces = col.saturating_sub(1);

        format!(
            "\n--> {}:{}:{}\n{:<line_num_width$}|\n\
		{:<line_num_width$}| {}\n\
		{:<line_num_width$}| {:<col_spaces$}^\n\
		{}: {}",
            self.src.name,
            line,
            col,
            "",
            line,
            self.line(line - 1),
            "",
            "",
            kind,
            msg
        )
    }
}

/// A byte range of a [`Source`].
#[derive(Clone)]
pub struct Span {
    pub source: Source,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn text(&self) -> &str {
        &self.source.contents()[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Span over `[start, end)` of the same source; offsets are absolute.
    pub fn sub(&self, start: usize, end: usize) -> Span {
        self.source.span(start, end)
    }

    pub fn trim(&self) -> Span {
        let text = self.text();
        let leading = text.len() - text.trim_start().len();
        let trailing = text.len() - text.trim_end().len();
        if leading == text.len() {
            return self.sub(self.start, self.start);
        }
        self.sub(self.start + leading, self.end - trailing)
    }

    pub fn same_range(&self, other: &Span) -> bool {
        self.start == other.start && self.end == other.end
    }

    pub fn line_col(&self) -> (usize, usize) {
        self.source.line_col(self.start)
    }

    pub fn message(&self, kind: &str, msg: &str) -> String {
        let (line, col) = self.line_col();
        self.source.message(line, col, kind, msg)
    }

    pub fn error(&self, msg: &str) -> ParseError {
        ParseError::new(self, msg)
    }
}

impl cmp::PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.same_range(other)
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let t = self.text().escape_debug().to_string();
        let max = 32;
        let (txt, trailer) = if t.chars().count() > max {
            (t.chars().take(max).collect::<String>(), "...")
        } else {
            (t, "")
        };
        let (line, col) = self.line_col();

        f.write_fmt(format_args!(
            "{}:{}:{}:{}, \"{}{}\"",
            line, col, self.start, self.end, txt, trailer
        ))
    }
}

/// Error raised while turning search text into an expression tree.
#[derive(Clone, Error)]
#[error("{}", render_parse_error(.span, .message))]
pub struct ParseError {
    message: String,
    span: Span,
}

fn render_parse_error(span: &Span, message: &str) -> String {
    span.message("error", message)
}

impl ParseError {
    pub fn new(span: &Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: span.clone(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Byte offset into the search text.
    pub fn offset(&self) -> usize {
        self.span.start
    }

    pub fn length(&self) -> usize {
        self.span.len()
    }
}

impl Debug for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseError")
            .field("message", &self.message)
            .field("offset", &self.offset())
            .field("length", &self.length())
            .finish()
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Curly,
    Square,
}

impl GroupKind {
    fn from_opener(ch: char) -> Option<GroupKind> {
        match ch {
            '{' => Some(GroupKind::Curly),
            '[' => Some(GroupKind::Square),
            _ => None,
        }
    }

    fn from_closer(ch: char) -> Option<GroupKind> {
        match ch {
            '}' => Some(GroupKind::Curly),
            ']' => Some(GroupKind::Square),
            _ => None,
        }
    }

    pub fn opener(&self) -> char {
        match self {
            GroupKind::Curly => '{',
            GroupKind::Square => '[',
        }
    }

    pub fn closer(&self) -> char {
        match self {
            GroupKind::Curly => '}',
            GroupKind::Square => ']',
        }
    }
}

/// A balanced top-level `{...}` or `[...]` group.
#[derive(Debug, Clone)]
pub struct Group {
    pub kind: GroupKind,
    /// Including the brackets.
    pub outer: Span,
    /// Between the brackets.
    pub inner: Span,
    pub has_escaped_nested: bool,
}

/// Result of scanning a span at depth 0.
#[derive(Debug, Clone, Default)]
pub struct GroupScan {
    pub groups: Vec<Group>,
    /// Absolute offsets of separators found outside any group or string.
    pub separators: Vec<usize>,
    /// An escaped opener or closer was seen anywhere in the span.
    pub has_escaped: bool,
}

fn is_bracket(ch: char) -> bool {
    matches!(ch, '{' | '}' | '[' | ']')
}

/// Quote- and escape-aware scan of `span`.
///
/// Backslash-escaped brackets are literal text. Quoted content is opaque.
/// When `separator` is given, its depth-0 occurrences are recorded.
pub fn scan(span: &Span, separator: Option<char>) -> Result<GroupScan, ParseError> {
    let text = span.text();
    let base = span.start;
    let mut result = GroupScan::default();
    let mut stack: Vec<(GroupKind, usize, bool)> = vec![];
    let mut quote: Option<(char, usize)> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((idx, ch)) = iter.next() {
        let pos = base + idx;
        if let Some((q, _)) = quote {
            match ch {
                '\\' => {
                    iter.next();
                }
                _ if ch == q => quote = None,
                _ => (),
            }
            continue;
        }

        match ch {
            '\\' => {
                if let Some((_, next)) = iter.peek() {
                    if is_bracket(*next) {
                        result.has_escaped = true;
                        if let Some(top) = stack.last_mut() {
                            top.2 = true;
                        }
                    }
                }
                iter.next();
            }
            '\'' | '"' => quote = Some((ch, pos)),
            '{' | '[' => {
                if let Some(kind) = GroupKind::from_opener(ch) {
                    stack.push((kind, pos, false));
                }
            }
            '}' | ']' => {
                let kind = GroupKind::from_closer(ch);
                match stack.pop() {
                    Some((open_kind, open_pos, escaped)) if Some(open_kind) == kind => {
                        if let Some(parent) = stack.last_mut() {
                            parent.2 |= escaped;
                        } else {
                            result.groups.push(Group {
                                kind: open_kind,
                                outer: span.sub(open_pos, pos + 1),
                                inner: span.sub(open_pos + 1, pos),
                                has_escaped_nested: escaped,
                            });
                        }
                    }
                    Some((open_kind, _, _)) => {
                        return Err(span.sub(pos, pos + 1).error(&format!(
                            "Unexpected `{ch}`: expected `{}`",
                            open_kind.closer()
                        )));
                    }
                    None => {
                        return Err(span
                            .sub(pos, pos + 1)
                            .error(&format!("Unmatched `{ch}`: no group is open")));
                    }
                }
            }
            _ if Some(ch) == separator && stack.is_empty() => result.separators.push(pos),
            _ => (),
        }
    }

    if let Some((q, pos)) = quote {
        return Err(span
            .sub(pos, span.end)
            .error(&format!("Unterminated string: missing closing `{q}`")));
    }

    if let Some((kind, pos, _)) = stack.first() {
        return Err(span.sub(*pos, span.end).error(&format!(
            "Unmatched `{}`: missing `{}`",
            kind.opener(),
            kind.closer()
        )));
    }

    Ok(result)
}

/// Top-level balanced groups of `span`, in source order.
pub fn extract_groups(span: &Span) -> Result<Vec<Group>, ParseError> {
    Ok(scan(span, None)?.groups)
}

/// Absolute offsets of `separator` at depth 0, outside strings.
pub fn find_separators(span: &Span, separator: char) -> Result<Vec<usize>, ParseError> {
    Ok(scan(span, Some(separator))?.separators)
}

/// The single group spanning all of `span` (after trimming), if any.
pub fn enclosing_group(span: &Span) -> Result<Option<Group>, ParseError> {
    let span = span.trim();
    let groups = extract_groups(&span)?;
    Ok(match groups.as_slice() {
        [group] if group.outer.same_range(&span) => Some(group.clone()),
        _ => None,
    })
}

/// Splits a bracketed argument list `{a, b, c}` into trimmed argument spans.
pub fn extract_arguments(span: &Span) -> Result<Vec<Span>, ParseError> {
    let group = match enclosing_group(span)? {
        Some(group) => group,
        None => {
            return Err(span
                .trim()
                .error("Expected an argument list enclosed in `{...}` or `[...]`"))
        }
    };

    let inner = group.inner;
    let separators = find_separators(&inner, ',')?;
    if separators.is_empty() {
        let arg = inner.trim();
        return Ok(if arg.is_empty() { vec![] } else { vec![arg] });
    }

    let mut args = Vec::with_capacity(separators.len() + 1);
    let mut start = inner.start;
    for sep in separators.iter().copied() {
        let arg = inner.sub(start, sep).trim();
        if arg.is_empty() {
            return Err(inner
                .sub(sep, sep + 1)
                .error("Argument not defined before comma"));
        }
        args.push(arg);
        start = sep + 1;
    }

    let last = inner.sub(start, inner.end).trim();
    if last.is_empty() {
        let sep = separators[separators.len() - 1];
        return Err(inner
            .sub(sep, sep + 1)
            .error("Last argument missing after comma"));
    }
    args.push(last);
    Ok(args)
}

/// Strips one redundant `{...}` pair enclosing the whole span.
///
/// Anything that does not scan cleanly, or is not exactly one curly group
/// surrounded by whitespace, is returned trimmed but otherwise unchanged.
pub fn simplify(span: &Span) -> Span {
    let trimmed = span.trim();
    match enclosing_group(&trimmed) {
        Ok(Some(group)) if group.kind == GroupKind::Curly => group.inner.trim(),
        _ => trimmed,
    }
}

/// Removes the backslash from escaped brackets.
pub fn unescape_brackets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut iter = text.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\\' {
            if let Some(next) = iter.peek().copied() {
                if is_bracket(next) {
                    out.push(next);
                    iter.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::*;

use anyhow::{bail, Result};

fn span(text: &str) -> Span {
    Source::from_contents("<test>", text).full_span()
}

fn texts(spans: &[Span]) -> Vec<&str> {
    spans.iter().map(|s| s.text()).collect()
}

fn error_of<T>(r: Result<T, ParseError>) -> Result<ParseError> {
    match r {
        Ok(_) => bail!("expected a parse error"),
        Err(e) => Ok(e),
    }
}

#[test]
fn top_level_groups_rejoin_to_input() -> Result<()> {
    let text = "files {a, [b]} and [c, {d}] 'x{y' tail";
    let s = span(text);
    let groups = extract_groups(&s)?;
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].outer.text(), "{a, [b]}");
    assert_eq!(groups[0].inner.text(), "a, [b]");
    assert_eq!(groups[1].kind, GroupKind::Square);

    let mut rebuilt = String::new();
    let mut pos = 0;
    for g in &groups {
        rebuilt.push_str(&text[pos..g.outer.start]);
        rebuilt.push_str(g.outer.text());
        pos = g.outer.end;
    }
    rebuilt.push_str(&text[pos..]);
    assert_eq!(rebuilt, text);
    Ok(())
}

#[test]
fn arguments_are_trimmed() -> Result<()> {
    let args = extract_arguments(&span("{a, b ,  c}"))?;
    assert_eq!(texts(&args), vec!["a", "b", "c"]);

    let nested = extract_arguments(&span("[x{1, 2}, 'p, q', {r}]"))?;
    assert_eq!(texts(&nested), vec!["x{1, 2}", "'p, q'", "{r}"]);

    assert!(extract_arguments(&span("{ }"))?.is_empty());
    Ok(())
}

#[test]
fn empty_arguments_are_errors() -> Result<()> {
    let e = error_of(extract_arguments(&span("{a,}")))?;
    assert_eq!(e.message(), "Last argument missing after comma");
    assert_eq!(e.offset(), 2);
    assert_eq!(e.length(), 1);

    let e = error_of(extract_arguments(&span("{,b}")))?;
    assert_eq!(e.message(), "Argument not defined before comma");
    assert_eq!(e.offset(), 1);

    let e = error_of(extract_arguments(&span("a, b")))?;
    assert!(e.message().starts_with("Expected an argument list"));
    Ok(())
}

#[test]
fn escaped_brackets_are_literal() -> Result<()> {
    let s = span(r"{\{x\}}");
    let simplified = simplify(&s);
    assert_eq!(simplified.text(), r"\{x\}");
    assert!(extract_groups(&simplified)?.is_empty());

    let groups = extract_groups(&s)?;
    assert_eq!(groups.len(), 1);
    assert!(groups[0].has_escaped_nested);

    assert_eq!(unescape_brackets(r"\{x\} \n"), r"{x} \n");
    Ok(())
}

#[test]
fn simplify_unwraps_one_curly_group() {
    assert_eq!(simplify(&span("  {{a}}  ")).text(), "{a}");
    assert_eq!(simplify(&span("[a]")).text(), "[a]");
    assert_eq!(simplify(&span("{a} {b}")).text(), "{a} {b}");
    assert_eq!(simplify(&span("{a")).text(), "{a");
}

#[test]
fn quoted_text_is_opaque() -> Result<()> {
    let s = span("a, 'b, c', \"{d\", {e, f}");
    let separators = find_separators(&s, ',')?;
    assert_eq!(separators.len(), 3);
    assert_eq!(extract_groups(&s)?.len(), 1);
    Ok(())
}

#[test]
fn structural_errors() -> Result<()> {
    let e = error_of(scan(&span("{a, 'b}"), None))?;
    assert_eq!(e.message(), "Unterminated string: missing closing `'`");
    assert_eq!(e.offset(), 4);

    let e = error_of(scan(&span("a}"), None))?;
    assert_eq!(e.message(), "Unmatched `}`: no group is open");
    assert_eq!(e.offset(), 1);

    let e = error_of(scan(&span("x {a [b}"), None))?;
    assert_eq!(e.message(), "Unexpected `}`: expected `]`");

    let e = error_of(scan(&span("{a, b"), None))?;
    assert_eq!(e.message(), "Unmatched `{`: missing `}`");
    assert_eq!((e.offset(), e.length()), (0, 5));
    Ok(())
}

#[test]
fn errors_render_with_a_caret() -> Result<()> {
    let e = error_of(extract_arguments(&span("{a,}")))?;
    let rendered = e.to_string();
    assert!(rendered.contains("<test>:1:3"), "{rendered}");
    assert!(rendered.contains('^'), "{rendered}");
    Ok(())
}

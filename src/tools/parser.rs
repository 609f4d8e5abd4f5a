// src/tools/parser.rs
//! Partial-aware extraction of `<function_calls>` markup.
//!
//! The buffer may end anywhere: inside a tag, inside a value, before any
//! closer. Completeness is decided only by comparing open and close counts per
//! tag kind, never by looking for a particular closer.

use super::matcher::{
    FUNCTION_CALLS_CLOSE, FUNCTION_CALLS_OPEN, INVOKE_CLOSE, INVOKE_OPEN, PARAMETER_CLOSE,
    PARAMETER_OPEN,
};
use super::ParamType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

static ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<key>[A-Za-z_][\w\-]*)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
        .expect("attribute regex")
});

/// One `<parameter>` of an invoke, as seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Raw text with CDATA sections unwrapped.
    pub value: String,
    pub declared_type: Option<ParamType>,
    /// The closing `</parameter>` has been seen.
    pub complete: bool,
    /// The value may still grow.
    pub streaming: bool,
}

/// Open/close counters per tag kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCounts {
    pub function_open: usize,
    pub function_close: usize,
    pub invoke_open: usize,
    pub invoke_close: usize,
    pub parameter_open: usize,
    pub parameter_close: usize,
}

impl TagCounts {
    pub fn balanced(&self) -> bool {
        self.function_open > 0
            && self.function_open == self.function_close
            && self.invoke_open > 0
            && self.invoke_open == self.invoke_close
            && self.parameter_open == self.parameter_close
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedInvoke {
    pub name: Option<String>,
    pub call_id: Option<String>,
    pub params: Vec<Parameter>,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub has_function: bool,
    pub is_complete: bool,
    pub invoke_name: Option<String>,
    pub call_id: Option<String>,
    /// Parameters of the first invoke.
    pub params: Vec<Parameter>,
    pub invokes: Vec<ParsedInvoke>,
    pub counts: TagCounts,
}

/// Parse the latest buffer snapshot of a block.
pub fn parse(buffer: &str) -> ParseOutcome {
    let Some(start) = buffer.find(FUNCTION_CALLS_OPEN) else {
        return ParseOutcome::default();
    };

    let mut counts = TagCounts {
        function_open: 1,
        ..TagCounts::default()
    };
    let mut invokes: Vec<ParsedInvoke> = Vec::new();
    let mut current: Option<usize> = None;
    let mut pos = start + FUNCTION_CALLS_OPEN.len();

    while let Some(rel) = buffer[pos..].find('<') {
        let at = pos + rel;
        let rest = &buffer[at..];

        if rest.starts_with(CDATA_OPEN) {
            let body = at + CDATA_OPEN.len();
            match buffer[body..].find(CDATA_CLOSE) {
                Some(end) => {
                    pos = body + end + CDATA_CLOSE.len();
                    continue;
                }
                None => break,
            }
        }

        if rest.starts_with(FUNCTION_CALLS_CLOSE) {
            counts.function_close += 1;
            pos = at + FUNCTION_CALLS_CLOSE.len();
            if counts.function_close >= counts.function_open {
                break;
            }
            continue;
        }

        if rest.starts_with(FUNCTION_CALLS_OPEN) {
            counts.function_open += 1;
            pos = at + FUNCTION_CALLS_OPEN.len();
            continue;
        }

        if rest.starts_with(INVOKE_CLOSE) {
            counts.invoke_close += 1;
            if let Some(idx) = current.take() {
                invokes[idx].closed = true;
            }
            pos = at + INVOKE_CLOSE.len();
            continue;
        }

        if let Some(tag) = open_tag(rest, INVOKE_OPEN) {
            counts.invoke_open += 1;
            let attrs = attributes(tag.attrs);
            invokes.push(ParsedInvoke {
                name: attrs.get("name"),
                call_id: attrs.get("call_id").or_else(|| attrs.get("id")),
                params: Vec::new(),
                closed: false,
            });
            let idx = invokes.len() - 1;
            match tag.end {
                TagEnd::Partial => break,
                TagEnd::SelfClosing(len) => {
                    counts.invoke_close += 1;
                    invokes[idx].closed = true;
                    current = None;
                    pos = at + len;
                }
                TagEnd::Open(len) => {
                    current = Some(idx);
                    pos = at + len;
                }
            }
            continue;
        }

        if let Some(tag) = open_tag(rest, PARAMETER_OPEN) {
            counts.parameter_open += 1;
            let attrs = attributes(tag.attrs);
            let idx = match current.or_else(|| invokes.len().checked_sub(1)) {
                Some(idx) => idx,
                None => {
                    invokes.push(ParsedInvoke::default());
                    invokes.len() - 1
                }
            };
            let mut param = Parameter {
                name: attrs.get("name").unwrap_or_default(),
                value: String::new(),
                declared_type: attrs.get("type").as_deref().and_then(ParamType::from_attr),
                complete: false,
                streaming: true,
            };
            match tag.end {
                TagEnd::Partial => {
                    if !param.name.is_empty() {
                        invokes[idx].params.push(param);
                    }
                    break;
                }
                TagEnd::SelfClosing(len) => {
                    counts.parameter_close += 1;
                    param.complete = true;
                    param.streaming = false;
                    invokes[idx].params.push(param);
                    pos = at + len;
                }
                TagEnd::Open(len) => {
                    let value_start = at + len;
                    let scan = scan_value(buffer, value_start);
                    param.value = finish_value(&buffer[value_start..scan.value_end]);
                    if scan.closed {
                        counts.parameter_close += 1;
                        param.complete = true;
                        param.streaming = false;
                    }
                    invokes[idx].params.push(param);
                    pos = scan.next;
                    if !scan.closed {
                        break;
                    }
                }
            }
            continue;
        }

        if rest.starts_with(PARAMETER_CLOSE) {
            // stray closer outside any value
            counts.parameter_close += 1;
            pos = at + PARAMETER_CLOSE.len();
            continue;
        }

        if is_partial_marker(rest) {
            break;
        }
        pos = at + 1;
    }

    let (invoke_name, call_id, params) = invokes
        .first()
        .map(|inv| (inv.name.clone(), inv.call_id.clone(), inv.params.clone()))
        .unwrap_or_default();

    ParseOutcome {
        has_function: true,
        is_complete: counts.balanced(),
        invoke_name,
        call_id,
        params,
        invokes,
        counts,
    }
}

enum TagEnd {
    /// No `>` yet.
    Partial,
    /// Length of the whole `<tag .../>`.
    SelfClosing(usize),
    /// Length of the whole `<tag ...>`.
    Open(usize),
}

struct OpenTag<'a> {
    attrs: &'a str,
    end: TagEnd,
}

fn open_tag<'a>(rest: &'a str, marker: &str) -> Option<OpenTag<'a>> {
    let after = rest.strip_prefix(marker)?;
    match after.chars().next() {
        None => {
            return Some(OpenTag {
                attrs: "",
                end: TagEnd::Partial,
            })
        }
        Some(c) if c.is_whitespace() || c == '>' || c == '/' => {}
        Some(_) => return None,
    }
    let Some(gt) = find_tag_end(after) else {
        return Some(OpenTag {
            attrs: after,
            end: TagEnd::Partial,
        });
    };
    let inner = &after[..gt];
    let total = marker.len() + gt + 1;
    if let Some(attrs) = inner.strip_suffix('/') {
        Some(OpenTag {
            attrs,
            end: TagEnd::SelfClosing(total),
        })
    } else {
        Some(OpenTag {
            attrs: inner,
            end: TagEnd::Open(total),
        })
    }
}

/// Offset of the `>` ending a start tag, skipping quoted attribute values.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, '<') => return None,
            _ => {}
        }
    }
    None
}

struct Attributes<'a>(Vec<(&'a str, &'a str)>);

impl Attributes<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    }
}

/// Only fully quoted attribute values are returned, so a name that is still
/// streaming in is never reported half-written.
fn attributes(attrs: &str) -> Attributes<'_> {
    Attributes(
        ATTR_REGEX
            .captures_iter(attrs)
            .filter_map(|cap| {
                let key = cap.name("key")?.as_str();
                let value = cap.name("dq").or_else(|| cap.name("sq"))?.as_str();
                Some((key, value))
            })
            .collect(),
    )
}

struct ValueScan {
    value_end: usize,
    next: usize,
    closed: bool,
}

/// Find where a parameter value ends. Inside a value only `</parameter>`
/// closes; CDATA sections are skipped whole. A trailing fragment that could
/// still become `</parameter>` or a CDATA opener is held back.
fn scan_value(buffer: &str, value_start: usize) -> ValueScan {
    let len = buffer.len();
    let mut i = value_start;
    while let Some(rel) = buffer[i..].find('<') {
        let at = i + rel;
        let rest = &buffer[at..];
        if rest.starts_with(CDATA_OPEN) {
            let body = at + CDATA_OPEN.len();
            match buffer[body..].find(CDATA_CLOSE) {
                Some(end) => {
                    i = body + end + CDATA_CLOSE.len();
                    continue;
                }
                None => {
                    return ValueScan {
                        value_end: len,
                        next: len,
                        closed: false,
                    }
                }
            }
        }
        if rest.starts_with(PARAMETER_CLOSE) {
            return ValueScan {
                value_end: at,
                next: at + PARAMETER_CLOSE.len(),
                closed: true,
            };
        }
        if PARAMETER_CLOSE.starts_with(rest) || CDATA_OPEN.starts_with(rest) {
            return ValueScan {
                value_end: at,
                next: len,
                closed: false,
            };
        }
        i = at + 1;
    }
    ValueScan {
        value_end: len,
        next: len,
        closed: false,
    }
}

fn finish_value(raw: &str) -> String {
    let unwrapped = match unwrap_cdata(raw) {
        Ok(text) => text,
        Err(_) => {
            crate::log_debug!("CDATA unwrap failed, keeping raw value");
            Cow::Borrowed(raw)
        }
    };
    let trimmed = unwrapped.strip_prefix('\n').unwrap_or(&unwrapped);
    let trimmed = trimmed.strip_suffix('\n').unwrap_or(trimmed);
    trimmed.to_string()
}

#[derive(Debug, PartialEq, Eq)]
pub struct MalformedCdata;

/// Unwrap CDATA sections, concatenating their bodies with surrounding text.
///
/// An unterminated section at the end is still streaming: its body so far is
/// returned, minus a trailing `]`/`]]` that may be the start of the
/// terminator. A `]]>` outside any section is malformed.
pub fn unwrap_cdata(text: &str) -> Result<Cow<'_, str>, MalformedCdata> {
    if !text.contains(CDATA_OPEN) {
        if text.contains(CDATA_CLOSE) {
            return Err(MalformedCdata);
        }
        return Ok(Cow::Borrowed(text));
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find(CDATA_OPEN) {
        let open = cursor + rel;
        let outside = &text[cursor..open];
        if outside.contains(CDATA_CLOSE) {
            return Err(MalformedCdata);
        }
        out.push_str(outside);
        let body = open + CDATA_OPEN.len();
        match text[body..].find(CDATA_CLOSE) {
            Some(end) => {
                out.push_str(&text[body..body + end]);
                cursor = body + end + CDATA_CLOSE.len();
            }
            None => {
                let partial = &text[body..];
                let partial = partial
                    .strip_suffix("]]")
                    .or_else(|| partial.strip_suffix(']'))
                    .unwrap_or(partial);
                out.push_str(partial);
                return Ok(Cow::Owned(out));
            }
        }
    }
    let tail = &text[cursor..];
    if tail.contains(CDATA_CLOSE) {
        return Err(MalformedCdata);
    }
    out.push_str(tail);
    Ok(Cow::Owned(out))
}

/// `rest` runs to the end of the buffer and is a prefix of a marker we care
/// about, e.g. `</invo`.
fn is_partial_marker(rest: &str) -> bool {
    [
        FUNCTION_CALLS_OPEN,
        FUNCTION_CALLS_CLOSE,
        INVOKE_OPEN,
        INVOKE_CLOSE,
        PARAMETER_OPEN,
        PARAMETER_CLOSE,
        CDATA_OPEN,
    ]
    .iter()
    .any(|marker| marker.len() > rest.len() && marker.starts_with(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH: &str = r#"<function_calls><invoke name="search" call_id="1"><parameter name="q">hello</parameter></invoke></function_calls>"#;

    #[test]
    fn test_parse_complete_invocation() {
        let out = parse(SEARCH);
        assert!(out.has_function);
        assert!(out.is_complete);
        assert_eq!(out.invoke_name.as_deref(), Some("search"));
        assert_eq!(out.call_id.as_deref(), Some("1"));
        assert_eq!(out.params.len(), 1);
        assert_eq!(out.params[0].name, "q");
        assert_eq!(out.params[0].value, "hello");
        assert!(out.params[0].complete);
        assert!(!out.params[0].streaming);
    }

    #[test]
    fn test_no_function_marker() {
        let out = parse("just some prose <invoke name=\"x\">");
        assert!(!out.has_function);
        assert!(!out.is_complete);
    }

    #[test]
    fn test_strict_prefixes_are_never_complete() {
        for (i, _) in SEARCH.char_indices() {
            let out = parse(&SEARCH[..i]);
            assert!(!out.is_complete, "prefix of length {i} reported complete");
        }
        assert!(parse(SEARCH).is_complete);
    }

    #[test]
    fn test_partial_value_and_partial_closer() {
        let out = parse(r#"<function_calls><invoke name="search"><parameter name="q">hel"#);
        assert_eq!(out.params[0].value, "hel");
        assert!(out.params[0].streaming);

        let out = parse(r#"<function_calls><invoke name="search"><parameter name="q">hello</para"#);
        assert_eq!(out.params[0].value, "hello");
        assert!(!out.params[0].complete);
    }

    #[test]
    fn test_partial_attribute_is_not_reported() {
        let out = parse(r#"<function_calls><invoke name="sea"#);
        assert!(out.has_function);
        assert_eq!(out.invoke_name, None);
        assert_eq!(out.counts.invoke_open, 1);
    }

    #[test]
    fn test_cdata_unwrapped_and_tags_inside_not_counted() {
        let text = r#"<function_calls><invoke name="write"><parameter name="body"><![CDATA[<parameter name="x">not a tag</parameter>]]></parameter></invoke></function_calls>"#;
        let out = parse(text);
        assert!(out.is_complete);
        assert_eq!(
            out.params[0].value,
            r#"<parameter name="x">not a tag</parameter>"#
        );
        assert_eq!(out.counts.parameter_open, 1);
    }

    #[test]
    fn test_streaming_cdata_hides_partial_terminator() {
        let out = parse(r#"<function_calls><invoke name="w"><parameter name="b"><![CDATA[abc]]"#);
        assert_eq!(out.params[0].value, "abc");
        assert!(!out.is_complete);
    }

    #[test]
    fn test_malformed_cdata_keeps_raw() {
        assert_eq!(unwrap_cdata("x]]>y"), Err(MalformedCdata));
        let out = parse(r#"<function_calls><invoke name="w"><parameter name="b">x]]>y</parameter></invoke></function_calls>"#);
        assert_eq!(out.params[0].value, "x]]>y");
    }

    #[test]
    fn test_declared_type_attribute() {
        let out = parse(r#"<function_calls><invoke name="calc"><parameter name="n" type="number">42</parameter></invoke></function_calls>"#);
        assert_eq!(out.params[0].declared_type, Some(ParamType::Number));
    }

    #[test]
    fn test_newline_padding_trimmed() {
        let text = "<function_calls>\n<invoke name=\"r\">\n<parameter name=\"path\">\n/tmp/a.txt\n</parameter>\n</invoke>\n</function_calls>";
        let out = parse(text);
        assert!(out.is_complete);
        assert_eq!(out.params[0].value, "/tmp/a.txt");
    }

    #[test]
    fn test_multiple_invokes() {
        let text = r#"<function_calls><invoke name="a"><parameter name="x">1</parameter></invoke><invoke name="b"></invoke></function_calls>"#;
        let out = parse(text);
        assert!(out.is_complete);
        assert_eq!(out.invokes.len(), 2);
        assert_eq!(out.invoke_name.as_deref(), Some("a"));
        assert_eq!(out.invokes[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_unbalanced_wrapper_close_is_incomplete() {
        let text = r#"<function_calls><invoke name="a"><parameter name="x">1</parameter></function_calls>"#;
        let out = parse(text);
        assert!(!out.is_complete);
        assert_eq!(out.counts.invoke_close, 0);
    }

    #[test]
    fn test_markup_in_value_is_text() {
        let text = r#"<function_calls><invoke name="html"><parameter name="src"><div>hi</div></parameter></invoke></function_calls>"#;
        let out = parse(text);
        assert!(out.is_complete);
        assert_eq!(out.params[0].value, "<div>hi</div>");
    }

    #[test]
    fn test_self_closing_parameter() {
        let text = r#"<function_calls><invoke name="a"><parameter name="flag"/></invoke></function_calls>"#;
        let out = parse(text);
        assert!(out.is_complete);
        assert_eq!(out.params[0].value, "");
        assert!(out.params[0].complete);
    }
}

// src/tools/notation.rs
//! Compact notation for JSON Schema type descriptions.
//!
//! ```text
//! s n i b null any            string number integer boolean null anything
//! o {p {name:type flags ...}} object; flags are `r` (required), `d=value`
//! a[type]  u[t,t]  e[v,v]  lit[v]
//! type(key=value,...)         extra schema keywords
//! ```
//!
//! Values are bare words or JSON literals. `decode(encode(s))` reproduces
//! `s` for every schema `encode` accepts, except that an empty `required`
//! list is not emitted and a `type` list comes back as the equivalent
//! `anyOf` with its `items`/`properties` attached to the matching variant.

use super::ParseError;
use serde_json::{json, Map, Value};

const FRAGMENT_LEN: usize = 16;

pub fn encode(schema: &Value) -> Result<String, ParseError> {
    let mut out = String::new();
    encode_type(schema, &[], &mut out)?;
    Ok(out)
}

pub fn decode(text: &str) -> Result<Value, ParseError> {
    let mut parser = Parser { src: text, pos: 0 };
    parser.skip_ws();
    let schema = parser.parse_type()?;
    parser.skip_ws();
    if parser.pos < text.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(schema)
}

fn encode_type(schema: &Value, skip: &[&str], out: &mut String) -> Result<(), ParseError> {
    let obj = match schema {
        Value::Bool(true) => {
            out.push_str("any");
            return Ok(());
        }
        Value::Object(obj) => obj,
        other => return Err(ParseError::Unsupported(format!("schema must be an object, got {other}"))),
    };

    // keys expressed by the type itself, never emitted as constraints
    let consumed: &[&str];
    if let Some(constant) = obj.get("const") {
        consumed = &["const"];
        out.push_str("lit[");
        encode_value(constant, out);
        out.push(']');
    } else if let Some(values) = obj.get("enum") {
        let values = values
            .as_array()
            .ok_or_else(|| ParseError::Unsupported("enum must be an array".into()))?;
        consumed = &["enum"];
        out.push_str("e[");
        push_joined(values, out, encode_value);
        out.push(']');
    } else if let Some(variants) = obj.get("anyOf") {
        let variants = variants
            .as_array()
            .ok_or_else(|| ParseError::Unsupported("anyOf must be an array".into()))?;
        consumed = &["anyOf"];
        out.push_str("u[");
        for (i, v) in variants.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            encode_type(v, &[], out)?;
        }
        out.push(']');
    } else {
        consumed = &["type", "properties", "required", "items"];
        match obj.get("type") {
            None => out.push_str("any"),
            Some(Value::String(t)) => encode_named(t, obj, out)?,
            Some(Value::Array(types)) => {
                out.push_str("u[");
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let t = t
                        .as_str()
                        .ok_or_else(|| ParseError::Unsupported("type list must hold names".into()))?;
                    encode_named(t, obj, out)?;
                }
                out.push(']');
            }
            Some(other) => return Err(ParseError::Unsupported(format!("bad type {other}"))),
        }
    }

    let extras: Vec<(&String, &Value)> = obj
        .iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()) && !skip.contains(&k.as_str()))
        .collect();
    if !extras.is_empty() {
        out.push('(');
        for (i, (key, value)) in extras.into_iter().enumerate() {
            if !is_identifier(key) {
                return Err(ParseError::Unsupported(format!("constraint key `{key}`")));
            }
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            encode_value(value, out);
        }
        out.push(')');
    }
    Ok(())
}

fn encode_named(name: &str, obj: &Map<String, Value>, out: &mut String) -> Result<(), ParseError> {
    match name {
        "string" => out.push('s'),
        "number" => out.push('n'),
        "integer" => out.push('i'),
        "boolean" => out.push('b'),
        "null" => out.push_str("null"),
        "array" => {
            out.push_str("a[");
            match obj.get("items") {
                Some(items) => encode_type(items, &[], out)?,
                None => out.push_str("any"),
            }
            out.push(']');
        }
        "object" => encode_object(obj, out)?,
        other => return Err(ParseError::Unsupported(format!("type `{other}`"))),
    }
    Ok(())
}

fn encode_object(obj: &Map<String, Value>, out: &mut String) -> Result<(), ParseError> {
    out.push('o');
    let Some(props) = obj.get("properties") else {
        return Ok(());
    };
    let props = props
        .as_object()
        .ok_or_else(|| ParseError::Unsupported("properties must be an object".into()))?;
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(missing) = required.iter().find(|r| !props.contains_key(**r)) {
        return Err(ParseError::Unsupported(format!(
            "required property `{missing}` is not declared"
        )));
    }

    out.push_str(" {p {");
    for (i, (name, prop)) in props.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if is_identifier(name) {
            out.push_str(name);
        } else {
            out.push_str(&Value::String(name.clone()).to_string());
        }
        out.push(':');
        encode_type(prop, &["default"], out)?;
        if required.contains(&name.as_str()) {
            out.push_str(" r");
        }
        if let Some(default) = prop.get("default") {
            out.push_str(" d=");
            encode_value(default, out);
        }
    }
    out.push_str("}}");
    Ok(())
}

fn push_joined(values: &[Value], out: &mut String, f: fn(&Value, &mut String)) {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        f(v, out);
    }
}

fn encode_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) if is_bare_word(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$' | '.'))
}

/// A string that decodes back to itself without quotes.
fn is_bare_word(s: &str) -> bool {
    is_identifier(s) && bare_to_value(s) == Value::String(s.to_string())
}

fn bare_to_value(word: &str) -> Value {
    match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => match serde_json::from_str::<Value>(word) {
            Ok(n @ Value::Number(_)) => n,
            _ => Value::String(word.to_string()),
        },
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ParseError {
        let fragment: String = self.src[pos..].chars().take(FRAGMENT_LEN).collect();
        ParseError::notation(fragment, pos, message)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected `{c}`")))
        }
    }

    fn open_bracket(&mut self) -> Result<(), ParseError> {
        self.expect('[')?;
        self.skip_ws();
        Ok(())
    }

    fn close_bracket(&mut self) -> Result<(), ParseError> {
        self.skip_ws();
        self.expect(']')
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !c.is_ascii_alphabetic() {
                break;
            }
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn parse_type(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let mut schema = match self.word() {
            "s" => json!({"type": "string"}),
            "n" => json!({"type": "number"}),
            "i" => json!({"type": "integer"}),
            "b" => json!({"type": "boolean"}),
            "null" => json!({"type": "null"}),
            "any" => json!({}),
            "a" => {
                self.open_bracket()?;
                let items = self.parse_type()?;
                self.close_bracket()?;
                json!({"type": "array", "items": items})
            }
            "u" => {
                self.open_bracket()?;
                let mut variants = vec![self.parse_type()?];
                self.skip_ws();
                while self.peek() == Some(',') {
                    self.pos += 1;
                    self.skip_ws();
                    variants.push(self.parse_type()?);
                    self.skip_ws();
                }
                self.close_bracket()?;
                json!({"anyOf": variants})
            }
            "e" => {
                self.open_bracket()?;
                let mut values = vec![self.parse_value()?];
                self.skip_ws();
                while self.peek() == Some(',') {
                    self.pos += 1;
                    values.push(self.parse_value()?);
                    self.skip_ws();
                }
                self.close_bracket()?;
                json!({"enum": values})
            }
            "lit" => {
                self.open_bracket()?;
                let value = self.parse_value()?;
                self.close_bracket()?;
                json!({"const": value})
            }
            "o" => self.parse_object()?,
            "" => return Err(self.error_at(start, "expected a type")),
            other => return Err(self.error_at(start, format!("unknown type `{other}`"))),
        };

        if self.peek() == Some('(') {
            self.pos += 1;
            let obj = schema
                .as_object_mut()
                .ok_or_else(|| self.error("constraints need an object schema"))?;
            loop {
                self.skip_ws();
                let key_start = self.pos;
                let key = self.identifier();
                if key.is_empty() {
                    return Err(self.error_at(key_start, "expected a constraint key"));
                }
                self.expect('=')?;
                let value = self.parse_value()?;
                obj.insert(key.to_string(), value);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected `,` or `)`")),
                }
            }
        }
        Ok(schema)
    }

    fn parse_object(&mut self) -> Result<Value, ParseError> {
        let save = self.pos;
        self.skip_ws();
        if self.peek() != Some('{') {
            self.pos = save;
            return Ok(json!({"type": "object"}));
        }
        self.pos += 1;
        self.skip_ws();
        self.expect('p')?;
        self.skip_ws();
        self.expect('{')?;

        let mut properties = Map::new();
        let mut required = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.error("unterminated property list")),
                _ => {}
            }
            let name = self.property_name()?;
            self.expect(':')?;
            let mut prop = self.parse_type()?;
            loop {
                let save = self.pos;
                self.skip_ws();
                let rest = self.rest();
                if rest.starts_with('r') && rest[1..].chars().next().map_or(true, |c| c.is_whitespace() || c == '}') {
                    self.pos += 1;
                    required.push(Value::String(name.clone()));
                } else if rest.starts_with("d=") {
                    self.pos += 2;
                    let default = self.parse_value()?;
                    if let Some(obj) = prop.as_object_mut() {
                        obj.insert("default".into(), default);
                    }
                } else {
                    self.pos = save;
                    break;
                }
            }
            properties.insert(name, prop);
        }
        self.skip_ws();
        self.expect('}')?;

        let mut schema = json!({"type": "object", "properties": properties});
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        Ok(schema)
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$' | '.')) {
                break;
            }
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn property_name(&mut self) -> Result<String, ParseError> {
        if self.peek() == Some('"') {
            return match self.parse_value()? {
                Value::String(s) => Ok(s),
                _ => Err(self.error("expected a property name")),
            };
        }
        let start = self.pos;
        let name = self.identifier();
        if name.is_empty() {
            return Err(self.error_at(start, "expected a property name"));
        }
        Ok(name.to_string())
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        self.skip_ws();
        let start = self.pos;
        let end = match self.peek() {
            Some('"') => self.scan_string(start)?,
            Some('[') | Some('{') => self.scan_balanced(start)?,
            _ => {
                let len = self
                    .rest()
                    .find(|c: char| c.is_whitespace() || matches!(c, ',' | ')' | ']' | '}'))
                    .unwrap_or(self.rest().len());
                if len == 0 {
                    return Err(self.error("expected a value"));
                }
                self.pos += len;
                return Ok(bare_to_value(&self.src[start..self.pos]));
            }
        };
        let value = serde_json::from_str(&self.src[start..end])
            .map_err(|e| self.error_at(start, format!("bad JSON literal: {e}")))?;
        self.pos = end;
        Ok(value)
    }

    fn scan_string(&self, start: usize) -> Result<usize, ParseError> {
        let mut escaped = false;
        for (i, c) in self.src[start + 1..].char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => return Ok(start + 1 + i + 1),
                _ => {}
            }
        }
        Err(self.error_at(start, "unterminated string"))
    }

    fn scan_balanced(&self, start: usize) -> Result<usize, ParseError> {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, c) in self.src[start..].char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '[' | '{' => depth += 1,
                ']' | '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(start + i + 1);
                    }
                }
                _ => {}
            }
        }
        Err(self.error_at(start, "unbalanced literal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::SchemaBuilder;

    #[test]
    fn test_decode_object_with_flags() {
        let schema = decode("o {p {query:s r limit:i d=10}}").unwrap();
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer", "default": 10}
                },
                "required": ["query"]
            })
        );
    }

    #[test]
    fn test_decode_compound_types() {
        assert_eq!(
            decode("a[u[s,n]]").unwrap(),
            json!({"type": "array", "items": {"anyOf": [{"type": "string"}, {"type": "number"}]}})
        );
        assert_eq!(
            decode(r#"e[web,news,"two words",3]"#).unwrap(),
            json!({"enum": ["web", "news", "two words", 3]})
        );
        assert_eq!(decode("lit[42]").unwrap(), json!({"const": 42}));
        assert_eq!(decode("any").unwrap(), json!({}));
        assert_eq!(decode("o").unwrap(), json!({"type": "object"}));
    }

    #[test]
    fn test_whitespace_inside_brackets() {
        assert_eq!(decode("a[ s ]").unwrap(), decode("a[s]").unwrap());
        assert_eq!(decode("u[ s , n ]").unwrap(), decode("u[s,n]").unwrap());
        assert_eq!(decode("e[ web , news ]").unwrap(), json!({"enum": ["web", "news"]}));
        assert_eq!(decode("lit[ 42 ]").unwrap(), json!({"const": 42}));
    }

    #[test]
    fn test_type_list_keeps_items_and_properties() {
        let schema = json!({"type": ["array", "null"], "items": {"type": "string"}});
        let text = encode(&schema).unwrap();
        assert_eq!(text, "u[a[s],null]");
        let back = decode(&text).unwrap();
        assert_eq!(
            back,
            json!({"anyOf": [{"type": "array", "items": {"type": "string"}}, {"type": "null"}]})
        );
        assert_eq!(encode(&back).unwrap(), text);

        let nullable_object = json!({
            "type": ["object", "null"],
            "properties": {"id": {"type": "integer"}},
            "required": ["id"]
        });
        let text = encode(&nullable_object).unwrap();
        assert_eq!(text, "u[o {p {id:i r}},null]");
        assert_eq!(
            decode(&text).unwrap(),
            json!({"anyOf": [
                {"type": "object", "properties": {"id": {"type": "integer"}}, "required": ["id"]},
                {"type": "null"}
            ]})
        );
    }

    #[test]
    fn test_decode_constraints() {
        assert_eq!(
            decode(r#"s(minLength=1,description="The query")"#).unwrap(),
            json!({"type": "string", "minLength": 1, "description": "The query"})
        );
        assert_eq!(
            decode(r#"o {p {tags:a[s](maxItems=3) d=["x"]}}"#).unwrap()["properties"]["tags"],
            json!({"type": "array", "items": {"type": "string"}, "maxItems": 3, "default": ["x"]})
        );
    }

    #[test]
    fn test_property_named_r_is_not_a_flag() {
        let schema = decode("o {p {a:s r:n r}}").unwrap();
        assert_eq!(schema["properties"]["r"], json!({"type": "number"}));
        assert_eq!(schema["required"], json!(["r"]));
    }

    #[test]
    fn test_malformed_notation_carries_fragment() {
        let err = decode("o {p {x:q}}").unwrap_err();
        match &err {
            ParseError::Notation { fragment, position, .. } => {
                assert_eq!(*position, 8);
                assert!(fragment.starts_with('q'));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.fragment(), Some("q}}"));

        assert!(decode("a[s").is_err());
        assert!(decode("s extra").is_err());
        assert!(decode(r#"e["open]"#).is_err());
    }

    #[test]
    fn test_encode_builder_schema_and_back() {
        let schema = SchemaBuilder::object()
            .string_prop("query", "The search query", true)
            .integer_prop("max_results", "Maximum number of results", false)
            .enum_prop("engine", &["web", "news"], "Backend", false)
            .build();
        let text = encode(&schema).unwrap();
        assert_eq!(
            text,
            r#"o {p {engine:e[web,news](description=Backend,type=string) max_results:i(description="Maximum number of results") query:s(description="The search query") r}}"#
        );
        assert_eq!(decode(&text).unwrap(), schema);
    }

    #[test]
    fn test_encode_quotes_ambiguous_strings() {
        let schema = json!({"type": "string", "default": "true", "format": "a b"});
        let text = encode(&schema).unwrap();
        assert_eq!(text, r#"s(default="true",format="a b")"#);
        assert_eq!(decode(&text).unwrap(), schema);
    }

    #[test]
    fn test_encode_rejects_unsupported() {
        assert!(matches!(encode(&json!(5)), Err(ParseError::Unsupported(_))));
        assert!(matches!(
            encode(&json!({"type": "object", "properties": {}, "required": ["ghost"]})),
            Err(ParseError::Unsupported(_))
        ));
    }
}

//! Normalises the MOTD payloads both protocols hand back into one token stream.
//!
//! Java servers send a chat component: a plain string, a list, or an object
//! with `text`, style fields and an optional `extra` array. Bedrock servers
//! send a plain string. Section-sign colour codes inside strings are left
//! untouched; the renderer owns them.

use serde_json::{Map, Value};

use crate::models::{MotdFormat, MotdToken};

const FORMAT_FIELDS: [(&str, MotdFormat); 5] = [
    ("bold", MotdFormat::Bold),
    ("italic", MotdFormat::Italic),
    ("underlined", MotdFormat::Underlined),
    ("strikethrough", MotdFormat::Strikethrough),
    ("obfuscated", MotdFormat::Obfuscated),
];

pub fn decode(payload: &Value) -> Vec<MotdToken> {
    let mut tokens = Vec::new();
    match payload {
        Value::String(text) => push_text(&mut tokens, text),
        Value::Array(items) => {
            for item in items {
                decode_fragment(item, &mut tokens);
            }
        }
        Value::Object(node) => decode_node(node, &mut tokens),
        _ => {}
    }

    if tokens.is_empty() {
        tokens.push(MotdToken::Unavailable);
    }
    tokens
}

fn decode_fragment(fragment: &Value, tokens: &mut Vec<MotdToken>) {
    match fragment {
        Value::String(text) => push_text(tokens, text),
        Value::Object(node) => decode_node(node, tokens),
        Value::Array(items) => {
            for item in items {
                decode_fragment(item, tokens);
            }
        }
        _ => {}
    }
}

// Depth first: style markers, own text, then every `extra` child in order.
fn decode_node(node: &Map<String, Value>, tokens: &mut Vec<MotdToken>) {
    if let Some(color) = node.get("color").and_then(Value::as_str) {
        tokens.push(MotdToken::Color(color.to_string()));
    }
    for (field, format) in FORMAT_FIELDS {
        if node.get(field).and_then(Value::as_bool) == Some(true) {
            tokens.push(MotdToken::Format(format));
        }
    }
    if let Some(text) = node.get("text").and_then(Value::as_str) {
        push_text(tokens, text);
    }
    if let Some(Value::Array(extra)) = node.get("extra") {
        for child in extra {
            decode_fragment(child, tokens);
        }
    }
}

fn push_text(tokens: &mut Vec<MotdToken>, text: &str) {
    if !text.is_empty() {
        tokens.push(MotdToken::Text(text.to_string()));
    }
}

//! `{{placeholder}}` substitution.
//!
//! Matching is literal and case-sensitive. A placeholder without a payload
//! entry is left in the output as written, and values are inserted without
//! HTML escaping: payloads must already be safe for the body they land in.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

use crate::models::{Payload, Template};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap());

/// Rendered subject and bodies, ready for the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub fn render(subject: &str, html: &str, text: &str, payload: &Payload) -> RenderedEmail {
    RenderedEmail {
        subject: render_str(subject, payload),
        html: render_str(html, payload),
        text: render_str(text, payload),
    }
}

pub fn render_template(template: &Template, payload: &Payload) -> RenderedEmail {
    render(&template.subject, &template.html, &template.text, payload)
}

/// Substitute one string in a single pass; inserted values are never rescanned.
pub fn render_str(input: &str, payload: &Payload) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures| match payload.get(&caps[1]) {
            Some(value) => coerce(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

//! Pattern-based XSS detection and cleaning.
//!
//! Regular expressions cannot parse HTML soundly; this filter catches the
//! common payload shapes and nothing more. Output that ends up inside HTML
//! still needs context-aware escaping at render time.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};

pub use crate::config::schema::XssMode;
use crate::observability::metrics;

/// A named detection rule.
pub struct ThreatPattern {
    pub name: &'static str,
    regex: Regex,
}

fn pattern(name: &'static str, re: &str) -> ThreatPattern {
    ThreatPattern {
        name,
        regex: Regex::new(re).expect("built-in XSS pattern must compile"),
    }
}

// Order matters when stripping: paired tags go before their bare opening
// form so the whole element is removed in one pass.
static THREAT_PATTERNS: Lazy<Vec<ThreatPattern>> = Lazy::new(|| {
    vec![
        pattern("script_block", r"(?is)<script\b[^>]*>.*?</script\s*>"),
        pattern("script_tag", r"(?i)</?script\b[^>]*>?"),
        pattern("iframe_block", r"(?is)<iframe\b[^>]*>.*?</iframe\s*>"),
        pattern("iframe_tag", r"(?i)</?iframe\b[^>]*>?"),
        pattern("object_block", r"(?is)<object\b[^>]*>.*?</object\s*>"),
        pattern("object_tag", r"(?i)</?object\b[^>]*>?"),
        pattern("embed_tag", r"(?i)<embed\b[^>]*>?"),
        pattern("applet_tag", r"(?i)</?applet\b[^>]*>?"),
        pattern("event_handler", r#"(?i)\bon[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]*)"#),
        pattern("javascript_url", r"(?i)javascript\s*:"),
        pattern("vbscript_url", r"(?i)vbscript\s*:"),
        pattern("data_html_url", r"(?i)data\s*:\s*text/html"),
        pattern("css_expression", r"(?i)expression\s*\("),
        pattern("css_behavior", r"(?i)behavior\s*:"),
        pattern("meta_refresh", r"(?i)<meta\b[^>]*http-equiv\s*=\s*[^>]*refresh[^>]*>?"),
        pattern("css_import", r"(?i)@import\b"),
        pattern("link_tag", r"(?i)<link\b[^>]*>?"),
        pattern("style_block", r"(?is)<style\b[^>]*>.*?</style\s*>"),
        pattern("form_tag", r"(?i)</?form\b[^>]*>?"),
        pattern("input_tag", r"(?i)<input\b[^>]*>?"),
        pattern("textarea_tag", r"(?i)</?textarea\b[^>]*>?"),
        pattern("button_tag", r"(?i)</?button\b[^>]*>?"),
        pattern("select_tag", r"(?i)</?select\b[^>]*>?"),
        pattern("svg_tag", r"(?i)</?svg\b[^>]*>?"),
        pattern("media_tag", r"(?i)</?(video|audio|source)\b[^>]*>?"),
        pattern("base_tag", r"(?i)<base\b[^>]*>?"),
        pattern(
            "base64_html",
            r"(?i)base64\s*,\s*(PHNjcmlwd|PGlmcmFtZ|PHN2Zy|PGltZy)[A-Za-z0-9+/=]*",
        ),
        pattern("alert_call", r"(?i)\balert\s*\("),
        pattern("dialog_call", r"(?i)\b(confirm|prompt)\s*\("),
        pattern("eval_call", r"(?i)\beval\s*\("),
        pattern("timer_call", r"(?i)\bset(Timeout|Interval)\s*\("),
        pattern("function_constructor", r"\bFunction\s*\("),
        pattern(
            "dom_sink",
            r"(?i)\b(document\s*\.\s*(cookie|write|location)|window\s*\.\s*location)",
        ),
        pattern("percent_encoded_tag", r"(?i)%3c\s*/?\s*[a-z]"),
        pattern("entity_encoded_tag", r"(?i)&#(x0*3c|0*60);?"),
        pattern("escaped_tag", r"(?i)\\(x3c|u003c)"),
    ]
});

/// Result of [`validate`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct XssReport {
    pub is_valid: bool,
    pub sanitized: String,
    pub threats: Vec<String>,
}

/// Names of all patterns, in evaluation order.
pub fn pattern_names() -> Vec<&'static str> {
    THREAT_PATTERNS.iter().map(|p| p.name).collect()
}

/// True if any threat pattern matches.
pub fn detect(input: &str) -> bool {
    THREAT_PATTERNS.iter().any(|p| p.regex.is_match(input))
}

/// Names of the patterns that match.
pub fn threats(input: &str) -> Vec<String> {
    THREAT_PATTERNS
        .iter()
        .filter(|p| p.regex.is_match(input))
        .map(|p| p.name.to_string())
        .collect()
}

fn strip_threats(input: &str) -> String {
    THREAT_PATTERNS.iter().fold(input.to_string(), |acc, p| {
        p.regex.replace_all(&acc, "").into_owned()
    })
}

/// Escape `& < > " ' /` as HTML entities.
pub fn escape_html(input: &str) -> String {
    html_escape::encode_safe(input).into_owned()
}

/// Clean a string.
///
/// Block mode is all-or-nothing: the input comes back untouched when it is
/// clean and as `""` when anything matches. Sanitize and report modes strip
/// every match and entity-escape what is left.
pub fn clean(input: &str, mode: XssMode) -> String {
    match mode {
        XssMode::Block => {
            if detect(input) {
                String::new()
            } else {
                input.to_string()
            }
        }
        XssMode::Sanitize => escape_html(&strip_threats(input)),
        XssMode::Report => {
            let found = threats(input);
            if !found.is_empty() {
                tracing::warn!(threats = ?found, "XSS payload detected, cleaning");
                metrics::record_xss_detected("report");
            }
            escape_html(&strip_threats(input))
        }
    }
}

/// Detection report plus the sanitize-mode cleaning of `content`.
pub fn validate(content: &str) -> XssReport {
    let threats = threats(content);
    XssReport {
        is_valid: threats.is_empty(),
        sanitized: clean(content, XssMode::Sanitize),
        threats,
    }
}

/// Clean keys and string values of arrays and objects, recursively.
pub fn clean_value(value: Value, mode: XssMode) -> Value {
    match value {
        Value::String(s) => Value::String(clean(&s, mode)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| clean_value(v, mode)).collect())
        }
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (clean(&k, mode), clean_value(v, mode)))
                .collect();
            Value::Object(cleaned)
        }
        other => other,
    }
}

/// Like [`clean_value`], but only keys and strings that match a threat
/// pattern are rewritten; clean data passes through byte for byte.
/// Returns the cleaned value and how many strings were changed.
pub fn clean_threats(value: Value, mode: XssMode) -> (Value, usize) {
    fn fix(s: String, mode: XssMode, hits: &mut usize) -> String {
        if detect(&s) {
            *hits += 1;
            clean(&s, mode)
        } else {
            s
        }
    }

    fn walk(value: Value, mode: XssMode, hits: &mut usize) -> Value {
        match value {
            Value::String(s) => Value::String(fix(s, mode, hits)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| walk(v, mode, hits)).collect())
            }
            Value::Object(map) => {
                let mut cleaned = Map::with_capacity(map.len());
                for (k, v) in map {
                    let key = fix(k, mode, hits);
                    cleaned.insert(key, walk(v, mode, hits));
                }
                Value::Object(cleaned)
            }
            other => other,
        }
    }

    let mut hits = 0;
    let cleaned = walk(value, mode, &mut hits);
    (cleaned, hits)
}

/// True if any key or string value in `value` matches a threat pattern.
pub fn detect_in_value(value: &Value) -> bool {
    match value {
        Value::String(s) => detect(s),
        Value::Array(items) => items.iter().any(detect_in_value),
        Value::Object(map) => map.iter().any(|(k, v)| detect(k) || detect_in_value(v)),
        _ => false,
    }
}

const ALLOWED_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "em", "h1", "h2", "h3", "h4", "h5", "h6", "i", "li", "ol",
    "p", "pre", "span", "strong", "u", "ul",
];

const ALLOWED_ATTRIBUTES: &[&str] = &["href", "title", "class", "target", "rel"];

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)([^>]*)>").expect("tag regex"));

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z][a-zA-Z0-9-]*)\s*=\s*("[^"]*"|'[^']*'|[^\s>"']+)"#)
        .expect("attribute regex")
});

/// Reduce markup to a small formatting subset for rendering user content.
///
/// Threat patterns are stripped first, then tags outside the allow-list are
/// dropped and surviving tags keep only allow-listed attributes.
pub fn render_secure_html(input: &str) -> String {
    let stripped = strip_threats(input);
    TAG_RE
        .replace_all(&stripped, |caps: &Captures| {
            let closing = &caps[1];
            let tag = caps[2].to_ascii_lowercase();
            if !ALLOWED_TAGS.contains(&tag.as_str()) {
                return String::new();
            }
            if !closing.is_empty() {
                return format!("</{}>", tag);
            }
            let self_closing = caps[3].trim_end().ends_with('/');
            let attrs: String = ATTR_RE
                .captures_iter(&caps[3])
                .filter(|a| ALLOWED_ATTRIBUTES.contains(&a[1].to_ascii_lowercase().as_str()))
                .map(|a| format!(" {}={}", a[1].to_ascii_lowercase(), &a[2]))
                .collect();
            if self_closing {
                format!("<{}{} />", tag, attrs)
            } else {
                format!("<{}{}>", tag, attrs)
            }
        })
        .into_owned()
}

//! Type-specific input cleaners.
//!
//! Every cleaner is total: bad input yields `""`, `None` or `false`, never an
//! error. SQL stripping is a last line of defense; queries still have to be
//! parameterized.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::security::xss::{self, XssMode};

/// Default cap for [`sanitize_string`].
pub const DEFAULT_MAX_LENGTH: usize = 1000;

const MAX_SEARCH_LENGTH: usize = 200;
const MAX_FILENAME_LENGTH: usize = 255;

/// Which cleaner [`sanitize`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Html,
    Xss,
    Sql,
    Email,
    Phone,
    Url,
    String,
    Number,
    Boolean,
    Search,
    Filename,
}

const DANGEROUS_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "applet", "form", "input", "textarea", "button",
    "select", "option", "link", "meta", "style", "base", "frame", "frameset",
];

static DANGEROUS_TAG_RES: Lazy<Vec<(Regex, Regex)>> = Lazy::new(|| {
    DANGEROUS_TAGS
        .iter()
        .map(|tag| {
            let paired = Regex::new(&format!(r"(?is)<{0}\b[^>]*>.*?</{0}\s*>", tag))
                .expect("paired tag regex");
            let single =
                Regex::new(&format!(r"(?i)</?{}\b[^>]*/?>", tag)).expect("single tag regex");
            (paired, single)
        })
        .collect()
});

static DANGEROUS_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\s*\b(onload|onerror|onclick|ondblclick|onmouseover|onmouseout|onmouseenter|onfocus|onblur|onchange|oninput|onsubmit|onreset|onkeydown|onkeyup|onkeypress|onanimationstart|formaction|srcdoc)\s*=\s*("[^"]*"|'[^']*'|[^\s>]*)"#,
    )
    .expect("attribute regex")
});

static SCRIPT_SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(javascript|data)\s*:").expect("scheme regex"));

static SQL_TERMINATOR_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";\s*(--|#|/\*)").expect("terminator regex"));
static SQL_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION|SCRIPT)\b")
        .expect("keyword regex")
});
static SQL_BOOLEAN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(OR|AND)\s+['"]?\w+['"]?\s*=\s*['"]?\w+['"]?"#).expect("boolean regex")
});
static SQL_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/|--|/\*|\*/").expect("comment regex"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));
static HTTP_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").expect("url regex"));
static NUMBER_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(\d+(\.\d*)?|\.\d+)").expect("number regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static UNDERSCORE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("underscore regex"));

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Remove dangerous elements, event-handler attributes and script-capable URL schemes.
pub fn sanitize_html(input: &str) -> String {
    let mut out = input.to_string();
    for (paired, single) in DANGEROUS_TAG_RES.iter() {
        out = paired.replace_all(&out, "").into_owned();
        out = single.replace_all(&out, "").into_owned();
    }
    out = DANGEROUS_ATTR_RE.replace_all(&out, "").into_owned();
    SCRIPT_SCHEME_RE.replace_all(&out, "").into_owned()
}

/// XSS filter in sanitize mode.
pub fn sanitize_xss(input: &str) -> String {
    xss::clean(input, XssMode::Sanitize)
}

/// Strip SQL keywords, tautologies and comment markers.
pub fn sanitize_sql(input: &str) -> String {
    let out = SQL_TERMINATOR_COMMENT_RE.replace_all(input, "");
    let out = SQL_BOOLEAN_RE.replace_all(&out, "");
    let out = SQL_KEYWORD_RE.replace_all(&out, "");
    let out = SQL_COMMENT_RE.replace_all(&out, "");
    out.trim().to_string()
}

/// Trimmed, lower-cased address, or `""` if it does not look like `local@domain.tld`.
pub fn sanitize_email(input: &str) -> String {
    let trimmed = input.trim();
    if EMAIL_RE.is_match(trimmed) {
        trimmed.to_lowercase()
    } else {
        String::new()
    }
}

/// Digits, keeping a leading `+`.
pub fn sanitize_phone(input: &str) -> String {
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}

/// `http(s)` URLs only, with `javascript:`/`data:` removed.
pub fn sanitize_url(input: &str) -> String {
    let trimmed = input.trim();
    if !HTTP_URL_RE.is_match(trimmed) {
        return String::new();
    }
    SCRIPT_SCHEME_RE.replace_all(trimmed, "").into_owned()
}

/// Drop angle brackets and NUL, cap at `max_length` characters, trim.
///
/// Idempotent: a second pass never changes the output.
pub fn sanitize_string(input: &str, max_length: usize) -> String {
    let stripped: String = input.chars().filter(|c| !matches!(c, '<' | '>' | '\0')).collect();
    truncate_chars(&stripped, max_length).trim().to_string()
}

/// Parse a number, ignoring currency symbols, separators and other noise.
///
/// Only the leading numeric run counts: `"1.2.3"` is `1.2`, `"100-200"` is `100`.
pub fn sanitize_number(input: &str) -> Option<f64> {
    let digits: String = input
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
        .collect();
    let leading = NUMBER_PREFIX_RE.find(&digits)?;
    leading.as_str().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// `true`, `1`, `yes` and `on` (any case) are true; anything else is false.
pub fn sanitize_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
        }
        _ => false,
    }
}

/// Search box input: no markup or query metacharacters, single spaces, 200 chars.
pub fn sanitize_search(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '%' | ';' | '(' | ')' | '&' | '+'))
        .collect();
    let collapsed = WHITESPACE_RE.replace_all(stripped.trim(), " ");
    truncate_chars(&collapsed, MAX_SEARCH_LENGTH).trim_end().to_string()
}

/// Safe file name: `[A-Za-z0-9.-]` kept, everything else becomes a single `_`.
pub fn sanitize_filename(input: &str) -> String {
    let replaced: String = input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let collapsed = UNDERSCORE_RUN_RE.replace_all(&replaced, "_");
    truncate_chars(collapsed.trim_matches('_'), MAX_FILENAME_LENGTH)
}

/// Generic cleaner for query parameters.
pub fn sanitize_input(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | ';' | '(' | ')'))
        .collect();
    truncate_chars(&stripped, DEFAULT_MAX_LENGTH)
}

/// Apply `sanitize_string` to every string leaf; keys and other scalars are kept.
pub fn sanitize_object(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s, DEFAULT_MAX_LENGTH)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_object).collect()),
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, sanitize_object(v))).collect())
        }
        other => other,
    }
}

/// Form fields with every value passed through `sanitize_string`.
pub fn sanitize_form_data<I, K, V>(pairs: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), sanitize_string(v.as_ref(), DEFAULT_MAX_LENGTH)))
        .collect()
}

/// Dispatch to the cleaner for `kind`.
///
/// Non-string input is rendered to text first, except for numbers and
/// booleans which keep their JSON form. A number that fails to parse comes
/// back as `Value::Null`.
pub fn sanitize(input: &Value, kind: InputKind) -> Value {
    let text = match input {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    match kind {
        InputKind::Html => Value::String(sanitize_html(&text)),
        InputKind::Xss => Value::String(sanitize_xss(&text)),
        InputKind::Sql => Value::String(sanitize_sql(&text)),
        InputKind::Email => Value::String(sanitize_email(&text)),
        InputKind::Phone => Value::String(sanitize_phone(&text)),
        InputKind::Url => Value::String(sanitize_url(&text)),
        InputKind::String => Value::String(sanitize_string(&text, DEFAULT_MAX_LENGTH)),
        InputKind::Search => Value::String(sanitize_search(&text)),
        InputKind::Filename => Value::String(sanitize_filename(&text)),
        InputKind::Boolean => Value::Bool(sanitize_boolean(input)),
        InputKind::Number => match input {
            Value::Number(n) => Value::Number(n.clone()),
            _ => sanitize_number(&text)
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_html_removes_dangerous_markup() {
        let input = r#"<p onclick="buy()">Oats</p><script>steal()</script><img src=x onerror=alert(1)><iframe src="x"/><a href="javascript:void(0)">x</a>"#;
        let out = sanitize_html(input);
        assert_eq!(out, r#"<p>Oats</p><img src=x><a href="void(0)">x</a>"#);
    }

    #[test]
    fn test_sanitize_html_keeps_safe_markup() {
        assert_eq!(sanitize_html("<b>Bold</b> <em>claim</em>"), "<b>Bold</b> <em>claim</em>");
    }

    #[test]
    fn test_sanitize_sql() {
        assert_eq!(sanitize_sql("admin' OR 1=1 --"), "admin'");
        assert_eq!(sanitize_sql("x'; DROP TABLE users; --"), "x';  TABLE users");
        assert_eq!(sanitize_sql("1 UNION SELECT password FROM users"), "1   password FROM users");
        assert_eq!(sanitize_sql("a /* hidden */ b"), "a  b");
        assert_eq!(sanitize_sql("granola"), "granola");
    }

    #[test]
    fn test_sanitize_email() {
        assert_eq!(sanitize_email("Foo@Bar.COM "), "foo@bar.com");
        assert_eq!(sanitize_email("not-an-email"), "");
        assert_eq!(sanitize_email("a b@c.de"), "");
    }

    #[test]
    fn test_sanitize_phone() {
        assert_eq!(sanitize_phone("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(sanitize_phone("555.123+4567"), "5551234567");
    }

    #[test]
    fn test_sanitize_url() {
        assert_eq!(sanitize_url(" https://shop.example/p/1 "), "https://shop.example/p/1");
        assert_eq!(sanitize_url("javascript:alert(1)"), "");
        assert_eq!(sanitize_url("ftp://x"), "");
        assert_eq!(sanitize_url("http://x/?next=javascript:y"), "http://x/?next=y");
    }

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("  <b>hi</b>\0 ", 1000), "bhi/b");
        assert_eq!(sanitize_string("abcdef", 3), "abc");
        assert_eq!(sanitize_string("ab  cd", 3), "ab");
    }

    #[test]
    fn test_sanitize_string_is_idempotent() {
        let samples = ["  <x> y ", "< a", "ab  c", "\0\0z", "plain", "", "   ", "é<ü>ñ  "];
        for s in samples {
            for max in [1, 2, 3, 1000] {
                let once = sanitize_string(s, max);
                assert_eq!(sanitize_string(&once, max), once, "input {:?} max {}", s, max);
            }
        }
    }

    #[test]
    fn test_sanitize_number() {
        assert_eq!(sanitize_number("$1,234.56"), Some(1234.56));
        assert_eq!(sanitize_number("-12"), Some(-12.0));
        assert_eq!(sanitize_number("abc"), None);
        assert_eq!(sanitize_number("1.2.3"), Some(1.2));
        assert_eq!(sanitize_number("100-200"), Some(100.0));
        assert_eq!(sanitize_number(".5"), Some(0.5));
        assert_eq!(sanitize_number("-"), None);
    }

    #[test]
    fn test_sanitize_boolean() {
        assert!(sanitize_boolean(&json!("Yes")));
        assert!(sanitize_boolean(&json!("1")));
        assert!(sanitize_boolean(&json!(true)));
        assert!(sanitize_boolean(&json!(2)));
        assert!(!sanitize_boolean(&json!("nope")));
        assert!(!sanitize_boolean(&json!(null)));
    }

    #[test]
    fn test_sanitize_search() {
        assert_eq!(sanitize_search("  vegan   <b>protein</b> 100% "), "vegan bprotein/b 100");
        assert_eq!(sanitize_search(&"a".repeat(300)).len(), 200);
    }

    #[test]
    fn test_sanitize_filename() {
        let out = sanitize_filename("../../etc/passwd");
        assert_eq!(out, ".._.._etc_passwd");
        assert!(!out.contains('/'));
        assert_eq!(sanitize_filename("__my  photo!!.png__"), "my_photo_.png");
        assert_eq!(sanitize_filename(&"x".repeat(400)).len(), 255);
    }

    #[test]
    fn test_sanitize_input() {
        assert_eq!(sanitize_input(r#"oats"; drop(table) <x>'"#), "oats drop table x");
        assert_eq!(sanitize_input(&"q".repeat(1500)).len(), 1000);
    }

    #[test]
    fn test_sanitize_object_only_touches_strings() {
        let value = json!({
            "<name>": "  <b>Alice</b> ",
            "age": 30,
            "items": [" one ", {"deep": "<x>"}],
            "ok": false
        });
        let out = sanitize_object(value);
        assert_eq!(out["<name>"], "bAlice/b");
        assert_eq!(out["age"], 30);
        assert_eq!(out["items"], json!(["one", {"deep": "x"}]));
        assert_eq!(out["ok"], false);
    }

    #[test]
    fn test_sanitize_form_data() {
        let out = sanitize_form_data([("name", " <i>Bo</i> "), ("email", "bo@x.io")]);
        assert_eq!(
            out,
            vec![
                ("name".to_string(), "iBo/i".to_string()),
                ("email".to_string(), "bo@x.io".to_string())
            ]
        );
    }

    #[test]
    fn test_dispatch() {
        assert_eq!(sanitize(&json!("$1,234.56"), InputKind::Number), json!(1234.56));
        assert_eq!(sanitize(&json!("abc"), InputKind::Number), Value::Null);
        assert_eq!(sanitize(&json!(7), InputKind::Number), json!(7));
        assert_eq!(sanitize(&json!("ON"), InputKind::Boolean), json!(true));
        assert_eq!(sanitize(&json!("Foo@Bar.COM"), InputKind::Email), json!("foo@bar.com"));
        assert_eq!(sanitize(&json!("a/b"), InputKind::Filename), json!("a_b"));
        assert_eq!(sanitize(&json!("<script>x</script>"), InputKind::Xss), json!(""));
        assert_eq!(sanitize(&Value::Null, InputKind::String), json!(""));
    }
}

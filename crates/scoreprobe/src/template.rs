//! Attribute templating for check definitions.
//!
//! Definitions reference attributes with `{{.Key}}` actions. Rendering works
//! on the whole definition text before it is decoded, so an action may sit
//! anywhere in the nested structure. Supported syntax:
//!
//! - `{{.Key}}` / `{{ .Key }}` inserts the variable verbatim
//! - `{{- ` and ` -}}` trim the whitespace next to the action
//! - `{{/* ... */}}` is a comment
//!
//! A variable that is not defined renders as an empty string.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.([A-Za-z_][A-Za-z0-9_]*)$").expect("field action pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed action starting at byte {0}")]
    Unclosed(usize),

    #[error("empty action at byte {0}")]
    Empty(usize),

    #[error("unsupported action `{action}` at byte {offset}")]
    Unsupported { action: String, offset: usize },
}

/// Render `source` against `vars`
pub fn render(source: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = 0;

    while let Some(found) = source[rest..].find(OPEN) {
        let start = rest + found;
        out.push_str(&source[rest..start]);

        let body_start = start + OPEN.len();
        let body_end = source[body_start..]
            .find(CLOSE)
            .map(|end| body_start + end)
            .ok_or(TemplateError::Unclosed(start))?;

        let mut body = &source[body_start..body_end];
        let trim_left = body.starts_with("- ") || body == "-";
        let trim_right = body.ends_with(" -");
        if trim_left {
            body = &body[1..];
            let kept = out.trim_end().len();
            out.truncate(kept);
        }
        if trim_right {
            body = &body[..body.len() - 1];
        }

        let action = body.trim();
        if action.is_empty() {
            return Err(TemplateError::Empty(start));
        }

        if action.starts_with("/*") && action.ends_with("*/") && action.len() >= 4 {
            // comment
        } else if let Some(captures) = FIELD.captures(action) {
            let key = &captures[1];
            match vars.get(key) {
                Some(value) => out.push_str(value),
                // undefined keys render as nothing, not as a `<no value>` placeholder
                None => debug!(key, "template variable is not defined, rendering empty"),
            }
        } else {
            return Err(TemplateError::Unsupported { action: action.to_string(), offset: start });
        }

        rest = body_end + CLOSE.len();
        if trim_right {
            let skipped = source[rest..].len() - source[rest..].trim_start().len();
            rest += skipped;
        }
    }

    out.push_str(&source[rest..]);
    Ok(out)
}

/// Render `source`, falling back to the unrendered text on failure.
///
/// A bad template should surface as a decode or validation failure for the
/// one check that owns it, never as an error for the whole round.
pub fn render_or_original(source: &str, vars: &BTreeMap<String, String>, check_id: &str) -> String {
    match render(source, vars) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(check_id, "failed to render definition template, using it unrendered: {e}");
            source.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_renders_field_actions() {
        let rendered =
            render(r#"{"Dynamic":"{{.Foo}}","Static":"bar"}"#, &vars(&[("Foo", "baz")])).unwrap();
        assert_eq!(rendered, r#"{"Dynamic":"baz","Static":"bar"}"#);
    }

    #[test]
    fn test_spaces_inside_action() {
        let rendered = render("http://{{ .Host }}:{{.Port}}/", &vars(&[("Host", "a"), ("Port", "8")]));
        assert_eq!(rendered.unwrap(), "http://a:8/");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        assert_eq!(render(r#"{"Host":"{{.Host}}"}"#, &vars(&[])).unwrap(), r#"{"Host":""}"#);

        let rendered = render("{{.User}}@{{.Host}}", &vars(&[("Host", "db")])).unwrap();
        assert_eq!(rendered, "@db");
        assert!(!rendered.contains("no value"));
    }

    #[test]
    fn test_trim_markers() {
        let rendered = render("a  {{- .X -}}   b", &vars(&[("X", "1")])).unwrap();
        assert_eq!(rendered, "a1b");
    }

    #[test]
    fn test_comment_renders_nothing() {
        assert_eq!(render("a{{/* note */}}b", &vars(&[])).unwrap(), "ab");
    }

    #[test]
    fn test_text_without_actions_is_untouched() {
        let source = r#"{"a":{"b":[1,2,{"c":"}}"}]}}"#;
        assert_eq!(render(source, &vars(&[])).unwrap(), source);
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(render("x {{.Foo", &vars(&[])), Err(TemplateError::Unclosed(2)));
        assert_eq!(render("{{ }}", &vars(&[])), Err(TemplateError::Empty(0)));
        assert!(matches!(
            render("{{if .Foo}}x{{end}}", &vars(&[])),
            Err(TemplateError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_fail_soft_returns_original() {
        let source = r#"{"Host":"{{.Host"}"#;
        assert_eq!(render_or_original(source, &vars(&[("Host", "h")]), "web"), source);
    }
}

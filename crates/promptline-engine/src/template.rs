use std::sync::OnceLock;

use regex::{Captures, Regex};

use promptline_core::error::{PromptlineError, Result};

use crate::vars::Variables;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").unwrap())
}

/// A rendered template and the placeholders it could not fill.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub unresolved: Vec<String>,
}

/// Substitute `{{name}}` placeholders. Unknown names are left in place.
pub fn render(template: &str, vars: &Variables) -> Rendered {
    let mut unresolved: Vec<String> = Vec::new();
    let text = placeholder()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match vars.display(name) {
                Some(value) => value,
                None => {
                    if !unresolved.iter().any(|u| u == name) {
                        unresolved.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Rendered { text, unresolved }
}

/// Render, failing on unresolved placeholders when `strict` is set.
pub fn render_checked(template: &str, vars: &Variables, strict: bool) -> Result<String> {
    let rendered = render(template, vars);
    if strict && !rendered.unresolved.is_empty() {
        return Err(PromptlineError::UnresolvedVariable(rendered.unresolved));
    }
    Ok(rendered.text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> Variables {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    #[test]
    fn test_render_substitutes_and_tracks_unresolved() {
        let v = vars(&[("name", serde_json::json!("Ada")), ("doc.stem", serde_json::json!("intro"))]);
        let out = render("Hi {{name}}, see {{ doc.stem }} and {{missing}} {{missing}}", &v);
        assert_eq!(out.text, "Hi Ada, see intro and {{missing}} {{missing}}");
        assert_eq!(out.unresolved, vec!["missing".to_string()]);
    }

    #[test]
    fn test_strict_mode_fails() {
        let err = render_checked("{{a}} {{b}}", &Variables::new(), true).unwrap_err();
        match err {
            PromptlineError::UnresolvedVariable(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(render_checked("{{a}}", &Variables::new(), false).unwrap(), "{{a}}");
    }

    #[test]
    fn test_lists_render_one_per_line() {
        let v = vars(&[("items", serde_json::json!(["x", "y"]))]);
        assert_eq!(render("{{items}}", &v).text, "x\ny");
    }
}

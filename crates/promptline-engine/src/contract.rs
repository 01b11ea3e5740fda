use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use promptline_core::error::{ContractViolation, PromptlineError, Result};
use promptline_core::types::FieldKind;

/// Reserved tag carrying chain-of-thought reasoning.
pub const THINKING_TAG: &str = "thinking";

fn open_tag() -> &'static Regex {
    static OPEN_TAG: OnceLock<Regex> = OnceLock::new();
    OPEN_TAG.get_or_init(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_.\-]*)>").unwrap())
}

/// The typed fields an Instruct expects to extract from model output.
///
/// Field names are unique and keep their declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputContract {
    fields: Vec<(String, FieldKind)>,
    chain_of_thought: bool,
}

impl OutputContract {
    /// A contract with no declared fields.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a contract, rejecting duplicate or reserved field names.
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        let mut contract = Self::default();
        for (name, kind) in fields {
            contract.push(name.into(), kind).map_err(PromptlineError::Planning)?;
        }
        Ok(contract)
    }

    fn push(&mut self, name: String, kind: FieldKind) -> std::result::Result<(), String> {
        if name == THINKING_TAG {
            return Err(format!("`{}` is a reserved field name", THINKING_TAG));
        }
        let mut chars = name.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !valid {
            return Err(format!("`{}` is not a valid field name", name));
        }
        if self.fields.iter().any(|(n, _)| *n == name) {
            return Err(format!("duplicate output field `{}`", name));
        }
        self.fields.push((name, kind));
        Ok(())
    }

    /// Require a `<thinking>` tag ahead of the declared fields.
    pub fn with_chain_of_thought(mut self) -> Self {
        self.chain_of_thought = true;
        self
    }

    pub fn chain_of_thought(&self) -> bool {
        self.chain_of_thought
    }

    pub fn fields(&self) -> &[(String, FieldKind)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Instructions appended to every compiled prompt.
    pub fn format_instructions(&self) -> String {
        let mut out = String::new();

        if self.chain_of_thought {
            out.push_str(
                "First, think step by step inside <thinking></thinking> tags. \
                 Then give your answer.\n",
            );
        }

        if self.fields.is_empty() {
            if !self.chain_of_thought {
                out.push_str("When you are done, reply with exactly {} and nothing else.");
            }
            return out.trim_end().to_string();
        }

        out.push_str("Wrap each answer field in its own XML tag, exactly as shown:\n");
        for (name, kind) in &self.fields {
            let hint = match kind {
                FieldKind::String => "text",
                FieldKind::Number => "a number",
                FieldKind::Boolean => "true or false",
                FieldKind::StringList => "one item per line",
            };
            out.push_str(&format!("<{name}>{hint}</{name}>\n"));
        }
        out.trim_end().to_string()
    }

    /// Parse raw model output into a typed record.
    ///
    /// Tags are matched in a single left-to-right sweep. An outer tag
    /// swallows anything nested inside it, and the first occurrence of a
    /// name wins. Text outside matched tags is kept in `remaining`.
    pub fn parse(&self, raw: &str) -> std::result::Result<ParsedOutput, ContractViolation> {
        if self.fields.is_empty() && !self.chain_of_thought {
            return match raw {
                "" | "{}" => Ok(ParsedOutput::default()),
                other => Err(ContractViolation::UnexpectedContent(other.to_string())),
            };
        }

        let (tags, remaining) = scan_tags(raw);
        let find = |name: &str| {
            tags.iter()
                .find(|(n, _)| n == name)
                .map(|(_, content)| content.as_str())
        };

        let reasoning = if self.chain_of_thought {
            let thinking =
                find(THINKING_TAG).ok_or_else(|| ContractViolation::MissingField(THINKING_TAG.into()))?;
            Some(thinking.trim().to_string())
        } else {
            None
        };

        let mut record = TypedRecord::default();
        for (name, kind) in &self.fields {
            let content = find(name).ok_or_else(|| ContractViolation::MissingField(name.clone()))?;
            record.push(name.clone(), coerce(name, *kind, content)?);
        }

        Ok(ParsedOutput {
            record,
            remaining,
            reasoning,
        })
    }

    /// Format a record into the tagged text this contract parses.
    pub fn render(&self, record: &TypedRecord) -> String {
        self.fields
            .iter()
            .filter_map(|(name, _)| record.get(name).map(|v| (name, v)))
            .map(|(name, value)| format!("<{name}>{}</{name}>", value.to_text()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Find every matched `<name>…</name>` pair; return them in match order
/// together with the text left over once they are removed.
fn scan_tags(raw: &str) -> (Vec<(String, String)>, String) {
    let mut tags: Vec<(String, String)> = Vec::new();
    let mut remaining = String::with_capacity(raw.len());
    let mut cursor = 0;
    let mut search_from = 0;

    while let Some(caps) = open_tag().captures(&raw[search_from..]) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let open_start = search_from + whole.start();
        let open_end = search_from + whole.end();
        let name = name.as_str();
        let close = format!("</{}>", name);

        match raw[open_end..].find(&close) {
            Some(offset) => {
                let content_end = open_end + offset;
                remaining.push_str(&raw[cursor..open_start]);
                if !tags.iter().any(|(n, _)| n == name) {
                    tags.push((name.to_string(), raw[open_end..content_end].to_string()));
                }
                cursor = content_end + close.len();
                search_from = cursor;
            }
            None => search_from = open_end,
        }
    }
    remaining.push_str(&raw[cursor..]);

    (tags, remaining.trim().to_string())
}

fn coerce(
    field: &str,
    kind: FieldKind,
    content: &str,
) -> std::result::Result<FieldValue, ContractViolation> {
    let invalid = || ContractViolation::InvalidValue {
        field: field.to_string(),
        kind,
        value: content.to_string(),
    };

    match kind {
        FieldKind::String => Ok(FieldValue::String(content.to_string())),
        FieldKind::Number => content
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FieldValue::Number)
            .ok_or_else(invalid),
        FieldKind::Boolean => match content.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(FieldValue::Boolean(true)),
            "false" => Ok(FieldValue::Boolean(false)),
            _ => Err(invalid()),
        },
        FieldKind::StringList => Ok(FieldValue::StringList(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
        )),
    }
}

/// One coerced field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Number(f64),
    Boolean(bool),
    StringList(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::String(_) => FieldKind::String,
            Self::Number(_) => FieldKind::Number,
            Self::Boolean(_) => FieldKind::Boolean,
            Self::StringList(_) => FieldKind::StringList,
        }
    }

    /// Tag body for this value.
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::StringList(items) => items.join("\n"),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::StringList(items) => serde_json::json!(items),
        }
    }
}

/// A fully populated record, in contract field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedRecord {
    fields: Vec<(String, FieldValue)>,
}

impl TypedRecord {
    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(n, v)| (n.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// Result of a successful parse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub record: TypedRecord,
    /// Text outside every matched tag, trimmed.
    pub remaining: String,
    /// Content of the `<thinking>` tag for chain-of-thought contracts.
    pub reasoning: Option<String>,
}

// Deserialized from a table of `field = "kind"` pairs. The visitor keeps
// the order in which the entries appear in the source document.
impl<'de> Deserialize<'de> for OutputContract {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ContractVisitor;

        impl<'de> Visitor<'de> for ContractVisitor {
            type Value = OutputContract;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of field names to kinds")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut contract = OutputContract::default();
                while let Some((name, kind)) = map.next_entry::<String, String>()? {
                    let kind: FieldKind = kind.parse().map_err(de::Error::custom)?;
                    contract.push(name, kind).map_err(de::Error::custom)?;
                }
                Ok(contract)
            }
        }

        deserializer.deserialize_map(ContractVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(fields: &[(&str, FieldKind)]) -> OutputContract {
        OutputContract::new(fields.iter().map(|(n, k)| (n.to_string(), *k))).unwrap()
    }

    #[test]
    fn test_parse_all_kinds() {
        let c = contract(&[
            ("title", FieldKind::String),
            ("score", FieldKind::Number),
            ("ok", FieldKind::Boolean),
            ("tags", FieldKind::StringList),
        ]);
        let raw = "Sure!\n<title>Hello</title>\n<score> 4.5 </score><ok>TRUE</ok>\n<tags>\na\n\n  b \n</tags>";
        let parsed = c.parse(raw).unwrap();

        assert_eq!(parsed.record.get("title"), Some(&FieldValue::String("Hello".into())));
        assert_eq!(parsed.record.get("score"), Some(&FieldValue::Number(4.5)));
        assert_eq!(parsed.record.get("ok"), Some(&FieldValue::Boolean(true)));
        assert_eq!(
            parsed.record.get("tags"),
            Some(&FieldValue::StringList(vec!["a".into(), "b".into()]))
        );
        assert_eq!(parsed.remaining, "Sure!");
        assert!(parsed.reasoning.is_none());
    }

    #[test]
    fn test_record_keeps_contract_order() {
        let c = contract(&[("b", FieldKind::String), ("a", FieldKind::String)]);
        let parsed = c.parse("<a>1</a><b>2</b>").unwrap();
        let names: Vec<&str> = parsed.record.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_missing_field_is_named() {
        let c = contract(&[("title", FieldKind::String), ("body", FieldKind::String)]);
        let err = c.parse("<title>x</title>").unwrap_err();
        assert_eq!(err, ContractViolation::MissingField("body".into()));
        assert_eq!(err.field(), Some("body"));
    }

    #[test]
    fn test_empty_contract_accepts_only_empty_or_braces() {
        let c = OutputContract::empty();
        assert!(c.parse("").unwrap().record.is_empty());
        assert!(c.parse("{}").unwrap().record.is_empty());
        for bad in ["hello", "{ }", "<a>1</a>"] {
            assert!(matches!(
                c.parse(bad),
                Err(ContractViolation::UnexpectedContent(_))
            ));
        }
    }

    #[test]
    fn test_boolean_literals_only() {
        let c = contract(&[("ok", FieldKind::Boolean)]);
        assert!(c.parse("<ok>False</ok>").is_ok());
        for bad in ["yes", "1", ""] {
            let err = c.parse(&format!("<ok>{}</ok>", bad)).unwrap_err();
            assert_eq!(err.field(), Some("ok"));
        }
    }

    #[test]
    fn test_number_rejects_garbage() {
        let c = contract(&[("n", FieldKind::Number)]);
        assert!(matches!(
            c.parse("<n>twelve</n>"),
            Err(ContractViolation::InvalidValue { kind: FieldKind::Number, .. })
        ));
        assert!(c.parse("<n>NaN</n>").is_err());
        assert_eq!(
            c.parse("<n>-3e2</n>").unwrap().record.get("n"),
            Some(&FieldValue::Number(-300.0))
        );
    }

    #[test]
    fn test_empty_list_content() {
        let c = contract(&[("items", FieldKind::StringList)]);
        let parsed = c.parse("<items></items>").unwrap();
        assert_eq!(parsed.record.get("items"), Some(&FieldValue::StringList(vec![])));
    }

    #[test]
    fn test_outer_tag_wins_over_nested() {
        let c = contract(&[("outer", FieldKind::String), ("inner", FieldKind::String)]);
        // `inner` only appears nested inside `outer`, so the sweep never sees it.
        let err = c.parse("<outer>a <inner>b</inner></outer>").unwrap_err();
        assert_eq!(err.field(), Some("inner"));

        let parsed = c.parse("<outer>a <inner>b</inner></outer><inner>c</inner>").unwrap();
        assert_eq!(
            parsed.record.get("outer"),
            Some(&FieldValue::String("a <inner>b</inner>".into()))
        );
        assert_eq!(parsed.record.get("inner"), Some(&FieldValue::String("c".into())));
    }

    #[test]
    fn test_unclosed_tag_is_skipped() {
        let c = contract(&[("a", FieldKind::String)]);
        let parsed = c.parse("<b>dangling <a>x</a> tail").unwrap();
        assert_eq!(parsed.record.get("a"), Some(&FieldValue::String("x".into())));
        assert_eq!(parsed.remaining, "<b>dangling  tail");
    }

    #[test]
    fn test_chain_of_thought_requires_thinking() {
        let c = contract(&[("answer", FieldKind::Number)]).with_chain_of_thought();
        let err = c.parse("<answer>4</answer>").unwrap_err();
        assert_eq!(err, ContractViolation::MissingField("thinking".into()));

        let parsed = c
            .parse("<thinking>\n2 + 2 is 4\n</thinking>\n<answer>4</answer>")
            .unwrap();
        assert_eq!(parsed.reasoning.as_deref(), Some("2 + 2 is 4"));
        assert_eq!(parsed.record.len(), 1);
        assert!(c.format_instructions().contains("<thinking>"));
    }

    #[test]
    fn test_render_then_parse_roundtrip() {
        let c = contract(&[
            ("title", FieldKind::String),
            ("score", FieldKind::Number),
            ("ok", FieldKind::Boolean),
            ("tags", FieldKind::StringList),
        ]);
        let mut record = TypedRecord::default();
        record.push("title", FieldValue::String("A title".into()));
        record.push("score", FieldValue::Number(3.0));
        record.push("ok", FieldValue::Boolean(false));
        record.push("tags", FieldValue::StringList(vec!["x".into(), "y z".into()]));

        let parsed = c.parse(&c.render(&record)).unwrap();
        assert_eq!(parsed.record, record);
    }

    #[test]
    fn test_duplicate_and_reserved_names_rejected() {
        assert!(OutputContract::new([("a", FieldKind::String), ("a", FieldKind::Number)]).is_err());
        assert!(OutputContract::new([("thinking", FieldKind::String)]).is_err());
    }

    #[test]
    fn test_deserialize_keeps_document_order() {
        #[derive(Deserialize)]
        struct Holder {
            output: OutputContract,
        }
        let holder: Holder =
            toml::from_str(r#"output = { zeta = "string", alpha = "string-list", mid = "boolean" }"#)
                .unwrap();
        let names: Vec<&str> = holder.output.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        let err = toml::from_str::<Holder>(r#"output = { a = "list" }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_format_instructions_lists_fields() {
        let c = contract(&[("greeting", FieldKind::String), ("n", FieldKind::Number)]);
        let text = c.format_instructions();
        assert!(text.contains("<greeting>text</greeting>"));
        assert!(text.contains("<n>a number</n>"));
    }

    #[test]
    fn test_record_to_json() {
        let mut record = TypedRecord::default();
        record.push("n", FieldValue::Number(2.5));
        record.push("tags", FieldValue::StringList(vec!["a".into()]));
        assert_eq!(record.to_json(), serde_json::json!({"n": 2.5, "tags": ["a"]}));
    }
}

use serde::{Deserialize, Serialize};

use crate::errors::ReplayError;

/// Represents ways to locate a DOM element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Select by `data-testid` attribute
    TestId(String),
    /// Select by tag name (`button`, `a`, `body`, ...)
    Tag(String),
    /// Select an `input` or `textarea` whose placeholder contains the text
    Placeholder { text: String, case_sensitive: bool },
    /// Raw CSS, passed through to engines that understand it
    Css(String),
    /// Logical OR over a set of selectors (any may match)
    Or(Vec<Selector>),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl Selector {
    pub fn test_id(id: impl Into<String>) -> Self {
        Selector::TestId(id.into())
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Selector::Tag(tag.into())
    }

    pub fn placeholder(text: impl Into<String>, case_sensitive: bool) -> Self {
        Selector::Placeholder {
            text: text.into(),
            case_sensitive,
        }
    }

    /// Render as a CSS selector list.
    pub fn to_css(&self) -> Result<String, ReplayError> {
        match self {
            Selector::TestId(id) => Ok(format!("[data-testid={}]", css_string(id))),
            Selector::Tag(tag) => Ok(tag.clone()),
            Selector::Placeholder {
                text,
                case_sensitive,
            } => {
                let flag = if *case_sensitive { "" } else { " i" };
                let value = css_string(text);
                Ok(format!(
                    "input[placeholder*={value}{flag}], textarea[placeholder*={value}{flag}]"
                ))
            }
            Selector::Css(css) => Ok(css.clone()),
            Selector::Or(parts) => {
                let rendered = parts
                    .iter()
                    .map(Selector::to_css)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rendered.join(", "))
            }
            Selector::Invalid(reason) => Err(ReplayError::InvalidInput(reason.clone())),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::TestId(id) => write!(f, "testid:{id}"),
            Selector::Tag(tag) => write!(f, "tag:{tag}"),
            Selector::Placeholder {
                text,
                case_sensitive: true,
            } => write!(f, "placeholder:{text}"),
            Selector::Placeholder {
                text,
                case_sensitive: false,
            } => write!(f, "placeholder-i:{text}"),
            Selector::Css(css) => write!(f, "css:{css}"),
            Selector::Or(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(" || "))
            }
            Selector::Invalid(reason) => write!(f, "invalid:{reason}"),
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();

        // Raw CSS may itself contain commas and pipes, so it is never split.
        if let Some(css) = s.strip_prefix("css:") {
            return Selector::Css(css.trim().to_string());
        }

        if s.contains("||") {
            let parts: Vec<Selector> = s
                .split("||")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(Selector::from)
                .collect();
            return match parts.len() {
                0 => Selector::Invalid("Empty selector".to_string()),
                1 => parts.into_iter().next().unwrap_or_else(|| Selector::Invalid(String::new())),
                _ => Selector::Or(parts),
            };
        }

        match s {
            "" => Selector::Invalid("Empty selector".to_string()),
            _ if s.starts_with("testid:") => Selector::TestId(s["testid:".len()..].to_string()),
            _ if s.starts_with("tag:") => Selector::Tag(s["tag:".len()..].trim().to_lowercase()),
            _ if s.starts_with("placeholder-i:") => {
                Selector::placeholder(&s["placeholder-i:".len()..], false)
            }
            _ if s.starts_with("placeholder:") => {
                Selector::placeholder(&s["placeholder:".len()..], true)
            }
            _ if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => {
                Selector::Tag(s.to_lowercase())
            }
            _ if s.starts_with('[') || s.starts_with('#') || s.starts_with('.') => {
                Selector::Css(s.to_string())
            }
            _ => Selector::Invalid(format!(
                "Unknown selector format: \"{s}\". Use prefixes like 'testid:', 'tag:', 'placeholder:', 'placeholder-i:' or 'css:'."
            )),
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

/// Quote a value as a CSS string literal.
pub fn css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\a "),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixed_selectors() {
        assert_eq!(
            Selector::from("testid:workflowEdit.navigation.stepTitle"),
            Selector::TestId("workflowEdit.navigation.stepTitle".to_string())
        );
        assert_eq!(Selector::from("tag:Button"), Selector::Tag("button".to_string()));
        assert_eq!(Selector::from("body"), Selector::Tag("body".to_string()));
        assert_eq!(
            Selector::from("placeholder-i:Email"),
            Selector::placeholder("Email", false)
        );
    }

    #[test]
    fn test_parse_or_and_raw_css() {
        match Selector::from("tag:a || tag:button") {
            Selector::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("Expected Or selector, got: {other:?}"),
        }
        assert_eq!(
            Selector::from("css:input, textarea"),
            Selector::Css("input, textarea".to_string())
        );
    }

    #[test]
    fn test_unknown_format_is_invalid() {
        assert!(matches!(Selector::from("role:button"), Selector::Invalid(_)));
        assert!(Selector::from("").to_css().is_err());
    }

    #[test]
    fn test_test_id_css() {
        let css = Selector::test_id("workflowEdit.navigation.stepTitle")
            .to_css()
            .unwrap();
        assert_eq!(css, r#"[data-testid="workflowEdit.navigation.stepTitle"]"#);
    }

    #[test]
    fn test_placeholder_css_escapes_quotes() {
        let css = Selector::placeholder(r#"Say "hi""#, true).to_css().unwrap();
        assert_eq!(
            css,
            r#"input[placeholder*="Say \"hi\""], textarea[placeholder*="Say \"hi\""]"#
        );
        let insensitive = Selector::placeholder("email", false).to_css().unwrap();
        assert!(insensitive.contains(r#"[placeholder*="email" i]"#));
    }

    #[test]
    fn test_non_ascii_placeholder() {
        let sel = Selector::from("placeholder:電子メール");
        assert_eq!(sel, Selector::placeholder("電子メール", true));
        assert!(sel.to_css().unwrap().contains("電子メール"));
    }
}

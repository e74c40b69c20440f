//! Step text interpretation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static ORDINAL_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\s*").expect("ordinal pattern is valid"));

static TYPE_PAYLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^Type "(.*)""#).expect("type pattern is valid"));

const CLICK_PREFIX: &str = "Click on";

/// Typed form of one recorded step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Click { target_text: String },
    Type { text: String },
    Unknown { raw_text: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::Type { .. } => "type",
            Action::Unknown { .. } => "unknown",
        }
    }
}

/// Step text without its leading "N." ordinal.
pub fn strip_ordinal(raw: &str) -> &str {
    match ORDINAL_PREFIX.find(raw) {
        Some(m) => &raw[m.end()..],
        None => raw,
    }
}

/// Classify a raw step title. Pure: the same input always gives the same action.
pub fn interpret(raw: &str) -> Action {
    let text = strip_ordinal(raw).trim();

    if let Some(rest) = text.strip_prefix(CLICK_PREFIX) {
        let target = trim_ellipsis(rest.trim());
        if !target.is_empty() {
            return Action::Click {
                target_text: target.to_string(),
            };
        }
    } else if let Some(caps) = TYPE_PAYLOAD.captures(text) {
        return Action::Type {
            text: caps[1].to_string(),
        };
    }

    Action::Unknown {
        raw_text: raw.to_string(),
    }
}

fn trim_ellipsis(text: &str) -> &str {
    let mut text = text;
    loop {
        let stripped = text
            .strip_suffix("...")
            .or_else(|| text.strip_suffix('…'))
            .map(str::trim_end);
        match stripped {
            Some(rest) => text = rest,
            None => return text,
        }
    }
}

use serde::{Deserialize, Serialize};

/// Represents ways to locate a form field on the remote pages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selector {
    /// Select by the `name` attribute
    Name(String),
    /// Select by the `id` attribute
    Id(String),
}

impl Selector {
    pub fn name(value: impl Into<String>) -> Self {
        Selector::Name(value.into())
    }

    pub fn id(value: impl Into<String>) -> Self {
        Selector::Id(value.into())
    }

    /// CSS form of the selector. Ids on the remote pages are numeric, so
    /// attribute selectors are used instead of `#id`.
    pub fn to_css(&self) -> String {
        match self {
            Selector::Name(name) => format!("[name={}]", quote(name)),
            Selector::Id(id) => format!("[id={}]", quote(id)),
        }
    }

    /// JavaScript expression evaluating to the element or `null`.
    pub fn to_js_lookup(&self) -> String {
        match self {
            Selector::Name(name) => {
                format!("(document.getElementsByName({})[0] || null)", quote(name))
            }
            Selector::Id(id) => format!("document.getElementById({})", quote(id)),
        }
    }
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Name(name) => write!(f, "name:{name}"),
            Selector::Id(id) => write!(f, "id:{id}"),
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if let Some(id) = s.strip_prefix("id:").or_else(|| s.strip_prefix('#')) {
            return Selector::Id(id.trim().to_string());
        }
        Selector::Name(s.strip_prefix("name:").unwrap_or(s).trim().to_string())
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

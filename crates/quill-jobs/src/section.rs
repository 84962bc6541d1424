use quill_session::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named proposal section. `content` is whatever the server produced
/// for it: usually a string, sometimes structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(alias = "section_name", alias = "title")]
    pub name: String,
    #[serde(default)]
    pub content: Value,
}

impl Section {
    pub fn new(name: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Content as text, when the server sent a plain string.
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Reads a streamed unit as a section, rejecting blank names.
pub(crate) fn read_section(unit: Value, what: &'static str) -> Result<Section, MergeError> {
    let section: Section =
        serde_json::from_value(unit).map_err(|source| MergeError::Malformed { what, source })?;
    let name = section.name.trim();
    if name.is_empty() {
        return Err(MergeError::Invalid {
            what,
            reason: "section name is empty".to_string(),
        });
    }
    Ok(Section {
        name: name.to_string(),
        content: section.content,
    })
}

//! Declarative UI tree returned by plugins.
//!
//! By the time a [`RenderResponse`] exists in Rust, every callback a script
//! attached to the tree has been swapped for a [`CallbackRef`] string, so the
//! whole tree is plain serializable data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Render protocol version emitted by this runtime.
pub const PROTOCOL_VERSION: u32 = 1;

fn current_version() -> u32 {
    PROTOCOL_VERSION
}

/// The full output of one render pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default, alias = "map")]
    pub map_overlays: Vec<MapOverlayEntry>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Default for RenderResponse {
    fn default() -> Self {
        Self::empty()
    }
}

impl RenderResponse {
    /// An empty response of the current protocol version.
    pub fn empty() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            map_overlays: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map_overlays.is_empty() && self.components.is_empty()
    }

    /// Every callback reference in tree order.
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        for component in &self.components {
            for block in &component.content {
                if let Some(submit) = &block.submit {
                    refs.push(submit.as_str());
                }
                refs.extend(block.buttons.iter().filter_map(|b| b.action.as_deref()));
            }
        }
        refs
    }

    /// Find the first button with the given label.
    pub fn find_button(&self, text: &str) -> Option<&Button> {
        self.components
            .iter()
            .flat_map(|c| &c.content)
            .flat_map(|block| &block.buttons)
            .find(|button| button.text == text)
    }
}

/// A map annotation such as a label drawn over a building tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapOverlayEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A panel rendered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One view within a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    /// Reference to the form-submit callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit: Option<String>,
    #[serde(default)]
    pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Reference to the click callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Opaque key standing in for a script callback.
///
/// Derived from `component/content/submit` or `component/content/<button index>`,
/// so it is stable within one render pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackRef(String);

impl CallbackRef {
    pub fn submit(component_id: &str, content_id: &str) -> Self {
        Self(format!("{component_id}/{content_id}/submit"))
    }

    pub fn button(component_id: &str, content_id: &str, index: usize) -> Self {
        Self(format!("{component_id}/{content_id}/{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A click or form submission routed back into a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub values: serde_json::Value,
}

impl Submission {
    pub fn new(reference: impl Into<String>, values: serde_json::Value) -> Self {
        Self {
            reference: reference.into(),
            values,
        }
    }
}

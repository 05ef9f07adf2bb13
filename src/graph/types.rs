use std::fmt;

use emath::Pos2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(u64);

impl LinkId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Pos2,
    pub radius: f32,
    pub label: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub source: NodeId,
    pub target: NodeId,
    pub strength: f32,
}

impl Link {
    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }
}

/// Payload for [`GraphModel::add_node`](super::GraphModel::add_node). The id and
/// position are assigned by the model.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSpec {
    pub radius: f32,
    pub label: String,
    pub group: String,
    pub color: String,
    pub avatar: Option<String>,
    pub description: Option<String>,
}

impl NodeSpec {
    pub fn new(label: impl Into<String>, radius: f32) -> Self {
        Self {
            radius,
            label: label.into(),
            group: String::new(),
            color: String::new(),
            avatar: None,
            description: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Presentation details that can change without affecting layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeDetails {
    pub label: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

/// Immutable copy of a graph, handed to the simulator and to external loaders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub anchor: Option<NodeId>,
    pub anchor_position: Pos2,
    #[serde(default)]
    pub revision: u64,
}

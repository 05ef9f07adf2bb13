use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::graph::GraphSnapshot;
use crate::layout::LayoutSettings;
use crate::scheduler::LayoutResult;

/// A snapshot document, optionally carrying its own layout settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutRequest {
    #[serde(flatten)]
    pub snapshot: GraphSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<LayoutSettings>,
}

pub fn parse_request(raw: &str) -> Result<LayoutRequest> {
    let request: LayoutRequest =
        serde_json::from_str(raw).context("invalid graph snapshot JSON")?;
    if request.snapshot.nodes.is_empty() {
        return Err(anyhow!("graph snapshot contains no nodes"));
    }
    Ok(request)
}

pub fn render_layout(result: &LayoutResult, pretty: bool) -> Result<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    };
    rendered.context("failed to serialize layout result")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r##"{
        "anchor_position": { "x": 400.0, "y": 300.0 },
        "anchor": "me",
        "nodes": [
            { "id": "me", "position": { "x": 0.0, "y": 0.0 }, "radius": 24.0, "label": "Me", "pinned": true },
            { "id": "ada", "position": { "x": 420.0, "y": 310.0 }, "radius": 16.0, "label": "Ada", "group": "friend", "color": "#4f86f7" }
        ],
        "links": [
            { "id": 1, "source": "me", "target": "ada", "strength": 0.7 }
        ],
        "settings": { "iterations": 42, "constants": { "damping": 0.5 } }
    }"##;

    #[test]
    fn parses_snapshot_with_partial_settings() {
        let request = parse_request(SNAPSHOT).unwrap();
        assert_eq!(request.snapshot.nodes.len(), 2);
        assert_eq!(request.snapshot.links.len(), 1);
        assert_eq!(request.snapshot.anchor.as_ref().map(|id| id.as_str()), Some("me"));
        assert!(request.snapshot.nodes[0].pinned);
        assert_eq!(request.snapshot.nodes[1].avatar, None);

        let settings = request.settings.unwrap();
        assert_eq!(settings.iterations, 42);
        assert_eq!(settings.constants.damping, 0.5);
        assert_eq!(
            settings.constants.repulsion,
            crate::layout::ForceConstants::default().repulsion
        );
    }

    #[test]
    fn rejects_empty_and_malformed_documents() {
        assert!(parse_request("{ not json").is_err());

        let empty = r#"{ "anchor_position": { "x": 0.0, "y": 0.0 }, "nodes": [] }"#;
        let error = parse_request(empty).unwrap_err();
        assert!(error.to_string().contains("no nodes"));
    }
}

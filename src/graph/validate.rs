use std::collections::{HashMap, HashSet};

use emath::Pos2;

use super::error::{ValidationError, ValidationResult};
use super::types::{Link, Node, NodeId};

pub(crate) fn check_radius(id: Option<&NodeId>, radius: f32) -> ValidationResult<()> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveRadius {
            id: id.cloned(),
            radius,
        })
    }
}

pub(crate) fn check_strength(strength: f32) -> ValidationResult<()> {
    if strength > 0.0 && strength <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::StrengthOutOfRange(strength))
    }
}

pub(crate) fn check_anchor_position(position: Pos2) -> ValidationResult<()> {
    if position.x.is_finite() && position.y.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteAnchorPosition)
    }
}

/// Checks every graph invariant at once and returns the node index keyed by id.
///
/// `anchor` must name an existing node, and any node flagged `pinned` must be
/// that node.
pub(crate) fn check_graph<'a>(
    nodes: &'a [Node],
    links: &[Link],
    anchor: Option<&NodeId>,
) -> ValidationResult<HashMap<&'a NodeId, usize>> {
    let mut index_by_id = HashMap::with_capacity(nodes.len());
    let mut pinned: Option<&NodeId> = None;

    for (index, node) in nodes.iter().enumerate() {
        if index_by_id.insert(&node.id, index).is_some() {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        check_radius(Some(&node.id), node.radius)?;
        if !node.position.x.is_finite() || !node.position.y.is_finite() {
            return Err(ValidationError::NonFinitePosition(node.id.clone()));
        }
        if node.pinned {
            if let Some(current) = pinned {
                return Err(ValidationError::AnchorConflict {
                    current: current.clone(),
                    requested: node.id.clone(),
                });
            }
            pinned = Some(&node.id);
        }
    }

    if let Some(anchor) = anchor {
        if !index_by_id.contains_key(anchor) {
            return Err(ValidationError::UnknownNode(anchor.clone()));
        }
        if let Some(current) = pinned
            && current != anchor
        {
            return Err(ValidationError::AnchorConflict {
                current: current.clone(),
                requested: anchor.clone(),
            });
        }
    }

    let mut link_ids = HashSet::with_capacity(links.len());
    for link in links {
        if !link_ids.insert(link.id) {
            return Err(ValidationError::DuplicateLinkId(link.id));
        }
        for endpoint in [&link.source, &link.target] {
            if !index_by_id.contains_key(endpoint) {
                return Err(ValidationError::UnknownNode(endpoint.clone()));
            }
        }
        if link.source == link.target {
            return Err(ValidationError::SelfLink(link.source.clone()));
        }
        check_strength(link.strength)?;
    }

    Ok(index_by_id)
}

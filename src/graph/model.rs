use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use emath::{Pos2, vec2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::error::{ValidationError, ValidationResult};
use super::types::{GraphSnapshot, Link, LinkId, Node, NodeDetails, NodeId, NodeSpec};
use super::validate::{check_anchor_position, check_graph, check_radius, check_strength};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

fn next_instance() -> u64 {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

/// Half-width of the square around the anchor in which new nodes are dropped.
const SPAWN_JITTER: f32 = 48.0;

/// Canonical node and link set.
///
/// Every mutation either succeeds with all invariants intact or returns a
/// [`ValidationError`] and leaves the model untouched. Topology mutations bump
/// [`revision`](Self::revision); presentation edits and position updates do not.
pub struct GraphModel<R = StdRng> {
    nodes: Vec<Node>,
    index_by_id: HashMap<NodeId, usize>,
    links: Vec<Link>,
    anchor: Option<NodeId>,
    anchor_position: Pos2,
    revision: u64,
    next_node_seq: u64,
    /// `None` once `u64::MAX` has been handed out.
    next_link_seq: Option<u64>,
    instance: u64,
    rng: R,
}

impl GraphModel<StdRng> {
    pub fn seeded(anchor_position: Pos2, seed: u64) -> Self {
        Self::with_rng(anchor_position, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> GraphModel<R> {
    pub fn with_rng(anchor_position: Pos2, rng: R) -> Self {
        Self {
            nodes: Vec::new(),
            index_by_id: HashMap::new(),
            links: Vec::new(),
            anchor: None,
            anchor_position,
            revision: 0,
            next_node_seq: 1,
            next_link_seq: Some(1),
            instance: next_instance(),
            rng,
        }
    }

    /// Loads a complete snapshot, validating every invariant before anything is
    /// admitted.
    pub fn from_snapshot(snapshot: GraphSnapshot, rng: R) -> ValidationResult<Self> {
        check_anchor_position(snapshot.anchor_position)?;
        let anchor = {
            let index_by_id =
                check_graph(&snapshot.nodes, &snapshot.links, snapshot.anchor.as_ref())?;
            snapshot.anchor.clone().or_else(|| {
                snapshot
                    .nodes
                    .iter()
                    .find(|node| node.pinned && index_by_id.contains_key(&node.id))
                    .map(|node| node.id.clone())
            })
        };

        let mut nodes = snapshot.nodes;
        for node in &mut nodes {
            node.pinned = anchor.as_ref() == Some(&node.id);
            if node.pinned {
                node.position = snapshot.anchor_position;
            }
        }

        let index_by_id = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id.clone(), index))
            .collect();
        let next_link_seq = snapshot
            .links
            .iter()
            .map(|link| link.id.get())
            .max()
            .map_or(Some(1), |max| max.checked_add(1));

        Ok(Self {
            nodes,
            index_by_id,
            links: snapshot.links,
            anchor,
            anchor_position: snapshot.anchor_position,
            revision: snapshot.revision,
            next_node_seq: 1,
            next_link_seq,
            instance: next_instance(),
            rng,
        })
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> ValidationResult<NodeId> {
        check_radius(None, spec.radius)?;

        let id = self.fresh_node_id();
        let jitter = vec2(
            self.rng.random_range(-SPAWN_JITTER..=SPAWN_JITTER),
            self.rng.random_range(-SPAWN_JITTER..=SPAWN_JITTER),
        );

        self.index_by_id.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node {
            id: id.clone(),
            position: self.anchor_position + jitter,
            radius: spec.radius,
            label: spec.label,
            group: spec.group,
            color: spec.color,
            avatar: spec.avatar,
            description: spec.description,
            pinned: false,
        });
        self.bump_revision();

        debug!(node = %id, revision = self.revision, "node added");
        Ok(id)
    }

    pub fn add_link(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        strength: f32,
    ) -> ValidationResult<LinkId> {
        for endpoint in [source, target] {
            if !self.index_by_id.contains_key(endpoint) {
                return Err(ValidationError::UnknownNode(endpoint.clone()));
            }
        }
        if source == target {
            return Err(ValidationError::SelfLink(source.clone()));
        }
        check_strength(strength)?;
        let seq = self.next_link_seq.ok_or(ValidationError::LinkIdsExhausted)?;

        let id = LinkId::new(seq);
        self.next_link_seq = seq.checked_add(1);
        self.links.push(Link {
            id,
            source: source.clone(),
            target: target.clone(),
            strength,
        });
        self.bump_revision();

        debug!(link = %id, %source, %target, strength, "link added");
        Ok(id)
    }

    pub fn remove_link(&mut self, id: LinkId) -> ValidationResult<Link> {
        let index = self
            .links
            .iter()
            .position(|link| link.id == id)
            .ok_or(ValidationError::UnknownLink(id))?;
        let link = self.links.remove(index);
        self.bump_revision();

        debug!(link = %id, "link removed");
        Ok(link)
    }

    /// Removes a node together with every link that references it.
    pub fn remove_node(&mut self, id: &NodeId) -> ValidationResult<Node> {
        let index = *self
            .index_by_id
            .get(id)
            .ok_or_else(|| ValidationError::UnknownNode(id.clone()))?;

        let node = self.nodes.remove(index);
        let links_before = self.links.len();
        self.links.retain(|link| !link.touches(id));
        if self.anchor.as_ref() == Some(id) {
            self.anchor = None;
        }
        self.reindex();
        self.bump_revision();

        debug!(
            node = %id,
            removed_links = links_before - self.links.len(),
            "node removed"
        );
        Ok(node)
    }

    /// Pins `id` as the anchor. Pinning the current anchor again is a no-op.
    pub fn set_anchor(&mut self, id: &NodeId) -> ValidationResult<()> {
        let index = *self
            .index_by_id
            .get(id)
            .ok_or_else(|| ValidationError::UnknownNode(id.clone()))?;

        match &self.anchor {
            Some(current) if current == id => return Ok(()),
            Some(current) => {
                return Err(ValidationError::AnchorConflict {
                    current: current.clone(),
                    requested: id.clone(),
                });
            }
            None => {}
        }

        let node = &mut self.nodes[index];
        node.pinned = true;
        node.position = self.anchor_position;
        self.anchor = Some(id.clone());
        self.bump_revision();

        debug!(anchor = %id, "anchor set");
        Ok(())
    }

    /// Unpins the current anchor, returning its id.
    pub fn clear_anchor(&mut self) -> Option<NodeId> {
        let anchor = self.anchor.take()?;
        if let Some(&index) = self.index_by_id.get(&anchor) {
            self.nodes[index].pinned = false;
        }
        self.bump_revision();

        debug!(anchor = %anchor, "anchor cleared");
        Some(anchor)
    }

    pub fn set_anchor_position(&mut self, position: Pos2) -> ValidationResult<()> {
        check_anchor_position(position)?;
        if position == self.anchor_position {
            return Ok(());
        }

        self.anchor_position = position;
        if let Some(index) = self.anchor_index() {
            self.nodes[index].position = position;
        }
        self.bump_revision();

        debug!(x = position.x, y = position.y, "anchor position moved");
        Ok(())
    }

    /// Edits label, description or avatar. Layout is unaffected.
    pub fn update_node_details(
        &mut self,
        id: &NodeId,
        details: NodeDetails,
    ) -> ValidationResult<()> {
        let index = *self
            .index_by_id
            .get(id)
            .ok_or_else(|| ValidationError::UnknownNode(id.clone()))?;

        let node = &mut self.nodes[index];
        if let Some(label) = details.label {
            node.label = label;
        }
        if let Some(description) = details.description {
            node.description = Some(description);
        }
        if let Some(avatar) = details.avatar {
            node.avatar = Some(avatar);
        }
        Ok(())
    }

    /// Adopts computed positions as the starting point of the next run. Unknown
    /// ids and non-finite coordinates are skipped; the anchor stays put.
    pub fn apply_layout(&mut self, positions: &BTreeMap<NodeId, Pos2>) {
        for (id, position) in positions {
            if !position.x.is_finite() || !position.y.is_finite() {
                continue;
            }
            if let Some(&index) = self.index_by_id.get(id) {
                let node = &mut self.nodes[index];
                if !node.pinned {
                    node.position = *position;
                }
            }
        }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            links: self.links.clone(),
            anchor: self.anchor.clone(),
            anchor_position: self.anchor_position,
            revision: self.revision,
        }
    }

    fn fresh_node_id(&mut self) -> NodeId {
        loop {
            let candidate = NodeId::new(format!("node-{}", self.next_node_seq));
            self.next_node_seq = self.next_node_seq.wrapping_add(1);
            if !self.index_by_id.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn reindex(&mut self) {
        self.index_by_id.clear();
        for (index, node) in self.nodes.iter().enumerate() {
            self.index_by_id.insert(node.id.clone(), index);
        }
    }

    fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

impl<R> GraphModel<R> {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index_by_id.get(id).map(|&index| &self.nodes[index])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn anchor(&self) -> Option<&NodeId> {
        self.anchor.as_ref()
    }

    pub fn anchor_position(&self) -> Pos2 {
        self.anchor_position
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Identifies this model among every model created in the process. Two
    /// models never share an instance, even when their revisions agree.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    fn anchor_index(&self) -> Option<usize> {
        self.anchor
            .as_ref()
            .and_then(|anchor| self.index_by_id.get(anchor).copied())
    }
}

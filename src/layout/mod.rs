//! Force-directed layout.
//!
//! [`run`] is a pure function: it copies the graph into an owned arena of
//! bodies indexed by position in the node slice, integrates a fixed number of
//! steps and returns fresh coordinates. Nothing outside the call observes the
//! intermediate state.

mod forces;
mod quadtree;

use std::collections::{BTreeMap, HashMap};

use emath::{Pos2, Vec2};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::graph::{
    GraphSnapshot, Link, Node, NodeId, ValidationResult, check_anchor_position, check_graph,
};
use forces::{accumulate_repulsion_pairs, accumulate_repulsion_quadtree, separation};
use quadtree::Quadtree;

/// Computed coordinates keyed by node id.
pub type Positions = BTreeMap<NodeId, Pos2>;

/// Tunable force constants. Values outside their usable range are clamped
/// before a run, and non-finite values fall back to the defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceConstants {
    /// Numerator of the inverse-square repulsion between every pair.
    pub repulsion: f32,
    /// Pull toward the centre per unit of distance and node radius.
    pub gravity: f32,
    /// Spring stiffness, multiplied by each link's strength.
    pub spring: f32,
    pub rest_length: f32,
    /// Fraction of velocity kept after each step.
    pub damping: f32,
    /// Lower bound on pair distance in the repulsion term.
    pub min_distance: f32,
    pub max_speed: f32,
    /// Node count above which repulsion switches to the Barnes–Hut quadtree.
    pub barnes_hut_threshold: usize,
    pub barnes_hut_theta: f32,
}

impl Default for ForceConstants {
    fn default() -> Self {
        Self {
            repulsion: 20_000.0,
            gravity: 0.0005,
            spring: 0.05,
            rest_length: 100.0,
            damping: 0.6,
            min_distance: 1.0,
            max_speed: 40.0,
            barnes_hut_threshold: 300,
            barnes_hut_theta: 0.72,
        }
    }
}

impl ForceConstants {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let finite = |value: f32, fallback: f32| if value.is_finite() { value } else { fallback };

        Self {
            repulsion: finite(self.repulsion, defaults.repulsion).max(0.0),
            gravity: finite(self.gravity, defaults.gravity).max(0.0),
            spring: finite(self.spring, defaults.spring).max(0.0),
            rest_length: finite(self.rest_length, defaults.rest_length).max(0.0),
            damping: finite(self.damping, defaults.damping).clamp(0.0, 0.99),
            min_distance: finite(self.min_distance, defaults.min_distance).max(0.001),
            max_speed: finite(self.max_speed, defaults.max_speed).max(0.001),
            barnes_hut_threshold: self.barnes_hut_threshold.max(2),
            barnes_hut_theta: finite(self.barnes_hut_theta, defaults.barnes_hut_theta)
                .clamp(0.0, 2.0),
        }
    }
}

/// Iteration budget plus constants: everything a run needs besides the graph.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    pub iterations: usize,
    pub constants: ForceConstants,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            iterations: 300,
            constants: ForceConstants::default(),
        }
    }
}

struct Spring {
    source: usize,
    target: usize,
    strength: f32,
}

struct Bodies {
    positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
    radii: Vec<f32>,
    forces: Vec<Vec2>,
    springs: Vec<Spring>,
    anchor: Option<usize>,
}

impl Bodies {
    fn build(
        nodes: &[Node],
        links: &[Link],
        index_by_id: &HashMap<&NodeId, usize>,
        anchor: Option<usize>,
        anchor_position: Pos2,
    ) -> Self {
        let mut positions = nodes
            .iter()
            .map(|node| node.position.to_vec2())
            .collect::<Vec<_>>();
        if let Some(anchor) = anchor {
            positions[anchor] = anchor_position.to_vec2();
        }

        let springs = links
            .iter()
            .filter_map(|link| {
                Some(Spring {
                    source: *index_by_id.get(&link.source)?,
                    target: *index_by_id.get(&link.target)?,
                    strength: link.strength,
                })
            })
            .collect();

        Self {
            velocities: vec![Vec2::ZERO; nodes.len()],
            radii: nodes.iter().map(|node| node.radius).collect(),
            forces: vec![Vec2::ZERO; nodes.len()],
            positions,
            springs,
            anchor,
        }
    }

    /// Advances one step and returns how many bodies were held in place
    /// because their summed force was not finite.
    fn step(&mut self, center: Vec2, constants: &ForceConstants) -> usize {
        let node_count = self.positions.len();
        self.forces.fill(Vec2::ZERO);

        if node_count > constants.barnes_hut_threshold {
            if let Some(tree) = Quadtree::build(&self.positions) {
                accumulate_repulsion_quadtree(
                    &tree,
                    &self.positions,
                    constants.repulsion,
                    constants.min_distance,
                    constants.barnes_hut_theta,
                    &mut self.forces,
                );
            }
        } else {
            accumulate_repulsion_pairs(
                &self.positions,
                constants.repulsion,
                constants.min_distance,
                &mut self.forces,
            );
        }

        for (index, force) in self.forces.iter_mut().enumerate() {
            if Some(index) == self.anchor {
                continue;
            }
            *force += (center - self.positions[index]) * (constants.gravity * self.radii[index]);
        }

        for spring in &self.springs {
            let (direction, distance) = separation(
                self.positions[spring.source],
                self.positions[spring.target],
                spring.source,
                spring.target,
                constants.min_distance,
            );
            let stretch = (distance - constants.rest_length) * constants.spring * spring.strength;
            let correction = direction * stretch;

            self.forces[spring.source] -= correction;
            self.forces[spring.target] += correction;
        }

        let max_speed_sq = constants.max_speed * constants.max_speed;
        let mut held = 0;
        for index in 0..node_count {
            if Some(index) == self.anchor {
                self.velocities[index] = Vec2::ZERO;
                self.positions[index] = center;
                continue;
            }

            let force = self.forces[index];
            if !force.is_finite() {
                self.velocities[index] = Vec2::ZERO;
                held += 1;
                continue;
            }

            let mut velocity = (self.velocities[index] + force) * constants.damping;
            let speed_sq = velocity.length_sq();
            if speed_sq > max_speed_sq {
                velocity *= constants.max_speed / speed_sq.sqrt();
            }

            self.velocities[index] = velocity;
            self.positions[index] += velocity;
        }
        held
    }
}

/// Runs `iterations` steps of the force simulation and returns the final
/// position of every node.
///
/// Input that breaks a graph invariant is rejected before the first step. The
/// anchor, if any, is held at `anchor_position` throughout, and the same point
/// is the centre that gravity pulls toward.
pub fn run(
    nodes: &[Node],
    links: &[Link],
    anchor: Option<&NodeId>,
    anchor_position: Pos2,
    iterations: usize,
    constants: &ForceConstants,
) -> ValidationResult<Positions> {
    check_anchor_position(anchor_position)?;
    let index_by_id = check_graph(nodes, links, anchor)?;
    let anchor_index = anchor
        .and_then(|anchor| index_by_id.get(anchor).copied())
        .or_else(|| nodes.iter().position(|node| node.pinned));

    let constants = constants.sanitized();
    let mut bodies = Bodies::build(nodes, links, &index_by_id, anchor_index, anchor_position);
    let center = anchor_position.to_vec2();
    let mut held = 0;
    for _ in 0..iterations {
        held += bodies.step(center, &constants);
    }
    if held > 0 {
        warn!(held, iterations, "bodies held in place by non-finite forces");
    }

    Ok(nodes
        .iter()
        .zip(bodies.positions)
        .map(|(node, position)| (node.id.clone(), position.to_pos2()))
        .collect())
}

pub fn run_snapshot(
    snapshot: &GraphSnapshot,
    settings: &LayoutSettings,
) -> ValidationResult<Positions> {
    run(
        &snapshot.nodes,
        &snapshot.links,
        snapshot.anchor.as_ref(),
        snapshot.anchor_position,
        settings.iterations,
        &settings.constants,
    )
}

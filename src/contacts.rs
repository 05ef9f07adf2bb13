use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::Rng;
use thiserror::Error;

use crate::graph::{GraphModel, NodeId, NodeSpec, ValidationError};
use crate::scheduler::{SchedulerError, SimulationScheduler, TriggerReason};

pub const CONTACT_RADIUS: f32 = 18.0;

const GROUP_PALETTE: [&str; 8] = [
    "#4f86f7", "#f7a04f", "#5fbf77", "#d65f8a", "#8a6fd6", "#3fb8c4", "#c4a43f", "#8c8c8c",
];

/// What the "add contact" form hands over.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactSubmission {
    pub name: String,
    pub role: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The node was added but the layout run could not be scheduled.
    #[error("contact {id} was added but layout could not start")]
    Schedule {
        id: NodeId,
        #[source]
        source: SchedulerError,
    },
}

/// Stable colour for a group tag; contacts sharing a role share a colour.
pub fn group_color(group: &str) -> &'static str {
    let mut hasher = DefaultHasher::new();
    group.hash(&mut hasher);
    GROUP_PALETTE[(hasher.finish() % GROUP_PALETTE.len() as u64) as usize]
}

/// Adds a contact to the graph and requests a re-layout for the new topology.
pub fn submit<R: Rng>(
    model: &mut GraphModel<R>,
    scheduler: &mut SimulationScheduler,
    submission: ContactSubmission,
) -> Result<NodeId, SubmitError> {
    let name = submission.name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyLabel.into());
    }

    let role = submission.role.trim().to_owned();
    let mut spec = NodeSpec::new(name, CONTACT_RADIUS)
        .with_color(group_color(&role))
        .with_group(role);
    if let Some(avatar) = submission.avatar.filter(|avatar| !avatar.trim().is_empty()) {
        spec = spec.with_avatar(avatar);
    }

    let id = model.add_node(spec)?;
    scheduler
        .trigger(TriggerReason::TopologyChanged, model)
        .map_err(|source| SubmitError::Schedule {
            id: id.clone(),
            source,
        })?;
    Ok(id)
}

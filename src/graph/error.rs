use thiserror::Error;

use super::types::{LinkId, NodeId};

/// Which class of invariant a rejected mutation would have broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced node or link does not exist.
    Reference,
    /// A numeric value lies outside its allowed range.
    Range,
    /// The request collides with existing state.
    Conflict,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("node id {0} is already in use")]
    DuplicateNodeId(NodeId),

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("link {0} does not exist")]
    UnknownLink(LinkId),

    #[error("link {0} is already in use")]
    DuplicateLinkId(LinkId),

    #[error("radius {radius} must be finite and greater than zero")]
    NonPositiveRadius { id: Option<NodeId>, radius: f32 },

    #[error("node {0} has a non-finite position")]
    NonFinitePosition(NodeId),

    #[error("link strength {0} is outside (0, 1]")]
    StrengthOutOfRange(f32),

    #[error("node {0} cannot link to itself")]
    SelfLink(NodeId),

    #[error("node {current} is already the anchor; cannot pin {requested}")]
    AnchorConflict { current: NodeId, requested: NodeId },

    #[error("anchor position must be finite")]
    NonFiniteAnchorPosition,

    #[error("contact name must not be empty")]
    EmptyLabel,

    #[error("no link ids left to assign")]
    LinkIdsExhausted,
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownNode(_) | Self::UnknownLink(_) => ErrorKind::Reference,
            Self::NonPositiveRadius { .. }
            | Self::NonFinitePosition(_)
            | Self::StrengthOutOfRange(_)
            | Self::NonFiniteAnchorPosition
            | Self::EmptyLabel
            | Self::LinkIdsExhausted => ErrorKind::Range,
            Self::DuplicateNodeId(_)
            | Self::DuplicateLinkId(_)
            | Self::SelfLink(_)
            | Self::AnchorConflict { .. } => ErrorKind::Conflict,
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

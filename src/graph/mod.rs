mod error;
mod model;
mod types;
mod validate;

pub use error::{ErrorKind, ValidationError, ValidationResult};
pub use model::GraphModel;
pub use types::{GraphSnapshot, Link, LinkId, Node, NodeDetails, NodeId, NodeSpec};
pub(crate) use validate::{check_anchor_position, check_graph};

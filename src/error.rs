//! Error type shared by the tree, table, embedding and kernel layers.

use thiserror::Error;

/// Which identifier axis a failed lookup was performed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdAxis {
    Observation,
    Sample,
}

impl std::fmt::Display for IdAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdAxis::Observation => f.write_str("observation"),
            IdAxis::Sample => f.write_str("sample"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UnifracError {
    /// Tree text or raw structure that does not describe a balanced tree.
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// Parsing produced no nodes, or pruning removed every node.
    #[error("tree has no nodes")]
    EmptyTree,

    /// A branch length token that is not a number.
    #[error("invalid branch length '{token}' for node '{name}'")]
    InvalidLength { name: String, token: String },

    /// Parallel arrays that must agree in length do not.
    #[error("length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("unknown {axis} identifier '{id}'")]
    NotFound { axis: IdAxis, id: String },

    #[error("duplicate {axis} identifier '{id}'")]
    DuplicateId { axis: IdAxis, id: String },

    /// Out-of-range stripe, sample or node-block arguments.
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("failed to allocate {count} elements for {what}")]
    Allocation { what: &'static str, count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("hdf5: {0}")]
    Hdf5(#[from] hdf5::Error),
}

pub type Result<T> = std::result::Result<T, UnifracError>;

/// Allocate a zero-filled buffer, reporting exhaustion as an error instead of
/// aborting the process.
pub(crate) fn try_filled<T: Clone>(value: T, count: usize, what: &'static str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(count)
        .map_err(|_| UnifracError::Allocation { what, count })?;
    v.resize(count, value);
    Ok(v)
}

//! Error types for simulation construction.

use thiserror::Error;

/// Errors raised while building a simulation from parameters.
///
/// Growth itself never fails: numerical edge cases resolve to "no
/// contribution" and rejected branches are silent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A configuration value is outside its meaningful range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The volume resolves to zero cells along one axis.
    #[error("voxel grid has no cells along the {axis} axis")]
    EmptyGrid { axis: char },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

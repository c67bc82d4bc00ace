//! Core 3-D tree growth and canopy light simulation library.
//!
//! Main components:
//! - [`voxel_grid`]: toroidal occupancy grid and its directional light field.
//! - [`segment`]: branch segments, carbon budget, width growth, pruning and branching.
//! - [`tree`]: one tree's yearly update and whole-tree statistics.
//! - [`simulation`]: the tick loop over all trees sharing a grid.
//! - [`config`]: environment and species parameters with presets.
//! - [`error`]: construction errors.
//! - [`math`]: small vector helpers.
//! - [`types`]: shared type aliases and IDs.

pub mod config;
pub mod error;
pub mod math;
pub mod segment;
pub mod simulation;
pub mod tree;
pub mod types;
pub mod voxel_grid;

pub use config::{CameraDistance, LeafShape, SimulationParams, TreeParams};
pub use error::{Error, Result};
pub use simulation::Simulation;
pub use tree::{Tree, TreeReport};
pub use voxel_grid::{LightDirection, VoxelGrid};

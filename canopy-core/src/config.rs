//! Environmental and species parameters.
//!
//! Both parameter sets are plain `Copy` structs consumed once at
//! construction. Drivers that want to sweep a value (spacing, wind speed,
//! light split) build a fresh [`crate::simulation::Simulation`] per run.

use crate::error::{Error, Result};
use glam::Vec3;

/// Trees younger than this use the young branch-angle factor.
pub const MATURE_TREE_AGE: u32 = 10;

/// How leaves are drawn by a renderer. Has no effect on growth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LeafShape {
    Round,
    #[default]
    Textured,
}

/// Viewing distance class used by renderers to frame the scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraDistance {
    /// Single deciduous trees.
    #[default]
    Close,
    /// Stands of ordinary deciduous trees.
    Middle,
    /// Very large trees.
    Far,
}

/// Environment shared by every tree in a simulation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationParams {
    /// Extent of the growth volume in metres.
    pub size: Vec3,
    /// Edge length of one voxel cell in metres.
    pub cell_size: f32,
    /// Wind speed used for drag loads, m/s.
    pub max_wind_speed: f32,
    /// m/s².
    pub gravity: f32,
    /// Sunlight incident on one square metre over a year, MJ.
    pub total_sunlight_incident: f32,
    /// kg/m³.
    pub air_density: f32,
    /// Share of top-of-canopy light arriving from each direction, in
    /// down, north, south, east, west order.
    pub light_directions: [f32; 5],
    pub leaf_shape: LeafShape,
    pub camera_distance: CameraDistance,
    /// Number of trees planted along x.
    pub num_trees_x: usize,
    /// Number of trees planted along y.
    pub num_trees_y: usize,
    /// Minimum segment width counted as timber, metres.
    pub timber_diameter: f32,
}

impl SimulationParams {
    /// Equatorial conditions over a 10 × 10 × 7 m plot with a single tree.
    pub fn equator() -> Self {
        Self {
            size: Vec3::new(10.0, 10.0, 7.0),
            cell_size: 0.08,
            max_wind_speed: 20.0,
            gravity: 9.8,
            total_sunlight_incident: 6636.0,
            air_density: 1.2,
            light_directions: [0.6, 0.1, 0.1, 0.1, 0.1],
            leaf_shape: LeafShape::Textured,
            camera_distance: CameraDistance::Close,
            num_trees_x: 1,
            num_trees_y: 1,
            timber_diameter: 0.13,
        }
    }

    /// Sum of the five top-of-canopy light fractions.
    pub fn total_incident_light(&self) -> f32 {
        self.light_directions.iter().sum()
    }

    pub fn validate(&self) -> Result<()> {
        ensure(
            self.size.is_finite() && self.size.min_element() > 0.0,
            "size",
            "every extent must be positive",
        )?;
        ensure(self.cell_size > 0.0, "cell_size", "must be positive")?;
        ensure(
            self.size.z / self.cell_size >= 2.0,
            "size",
            "volume must be at least two cells tall",
        )?;
        ensure(self.num_trees_x > 0, "num_trees_x", "must be at least 1")?;
        ensure(self.num_trees_y > 0, "num_trees_y", "must be at least 1")?;
        ensure(
            self.light_directions.iter().all(|&l| l >= 0.0),
            "light_directions",
            "fractions must be non-negative",
        )?;
        ensure(
            self.total_incident_light() <= 1.0 + 1e-6,
            "light_directions",
            "fractions must sum to at most 1",
        )?;
        ensure(self.max_wind_speed >= 0.0, "max_wind_speed", "must be non-negative")?;
        ensure(self.gravity >= 0.0, "gravity", "must be non-negative")?;
        ensure(
            self.total_sunlight_incident >= 0.0,
            "total_sunlight_incident",
            "must be non-negative",
        )?;
        ensure(self.air_density >= 0.0, "air_density", "must be non-negative")?;
        ensure(self.timber_diameter >= 0.0, "timber_diameter", "must be non-negative")
    }
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self::equator()
    }
}

/// Species constants for one kind of tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeParams {
    /// Size of the random perturbation added to a parent's direction while
    /// the tree is young.
    pub young_branch_angle_factor: f32,
    /// Same, once the tree reaches [`MATURE_TREE_AGE`].
    pub old_branch_angle_factor: f32,
    /// Metres.
    pub segment_length: f32,
    /// kg/m³.
    pub wood_density: f32,
    pub drag_coefficient: f32,
    /// Fresh mass of the leaves on one segment, kg.
    pub leaf_mass: f32,
    /// Leaf area carried by one segment, m².
    pub leaf_area: f32,
    /// Fraction of incident light absorbed by the canopy.
    pub fraction_absorbed: f32,
    /// Photosynthetic efficiency, kg per MJ.
    pub efficiency: f32,
    /// Share of leaf production sent to the roots.
    pub root_apportion: f32,
    /// Years.
    pub max_age: u32,
    pub wood_water_fraction: f32,
    /// Dry mass of the leaves on one segment, kg.
    pub leaf_dry_mass: f32,
    /// Stress that buys one metre of width growth.
    pub stress_proportion: f32,
    /// Segments up to this age carry leaves.
    pub max_leaf_age: u32,
}

impl TreeParams {
    /// A generic oak-like deciduous tree.
    pub fn general_deciduous() -> Self {
        Self {
            young_branch_angle_factor: 0.01,
            old_branch_angle_factor: 0.05,
            segment_length: 0.1,
            wood_density: 900.0,
            drag_coefficient: 0.5,
            leaf_mass: 0.0096,
            leaf_area: 0.0032,
            fraction_absorbed: 0.8,
            efficiency: 0.0015,
            root_apportion: 0.4,
            max_age: 60,
            wood_water_fraction: 0.59,
            leaf_dry_mass: 0.00192,
            stress_proportion: 950_000_000.0,
            max_leaf_age: 1,
        }
    }

    /// American sycamore (*Platanus occidentalis*).
    pub fn american_sycamore() -> Self {
        Self {
            young_branch_angle_factor: 0.05,
            old_branch_angle_factor: 0.05,
            segment_length: 0.2,
            wood_density: 460.0,
            leaf_mass: 0.024,
            leaf_area: 0.08,
            max_age: 100,
            leaf_dry_mass: 0.0048,
            max_leaf_age: 2,
            ..Self::general_deciduous()
        }
    }

    /// Sugar maple (*Acer saccharum*).
    pub fn sugar_maple() -> Self {
        Self {
            young_branch_angle_factor: 0.05,
            old_branch_angle_factor: 0.05,
            segment_length: 0.2,
            wood_density: 676.0,
            leaf_mass: 0.012,
            leaf_area: 0.04,
            max_age: 100,
            leaf_dry_mass: 0.0024,
            max_leaf_age: 2,
            ..Self::general_deciduous()
        }
    }

    /// Branch-angle factor for a tree of the given age.
    #[inline]
    pub fn branch_angle_factor(&self, tree_age: u32) -> f32 {
        if tree_age < MATURE_TREE_AGE {
            self.young_branch_angle_factor
        } else {
            self.old_branch_angle_factor
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.segment_length > 0.0, "segment_length", "must be positive")?;
        ensure(self.wood_density > 0.0, "wood_density", "must be positive")?;
        ensure(self.stress_proportion > 0.0, "stress_proportion", "must be positive")?;
        ensure(
            self.young_branch_angle_factor >= 0.0 && self.old_branch_angle_factor >= 0.0,
            "branch_angle_factor",
            "must be non-negative",
        )?;
        ensure(self.leaf_area >= 0.0, "leaf_area", "must be non-negative")?;
        ensure(self.leaf_mass >= 0.0, "leaf_mass", "must be non-negative")?;
        ensure(self.leaf_dry_mass >= 0.0, "leaf_dry_mass", "must be non-negative")?;
        ensure(self.drag_coefficient >= 0.0, "drag_coefficient", "must be non-negative")?;
        ensure(self.efficiency >= 0.0, "efficiency", "must be non-negative")?;
        ensure(
            is_fraction(self.fraction_absorbed),
            "fraction_absorbed",
            "must lie in [0, 1]",
        )?;
        ensure(is_fraction(self.root_apportion), "root_apportion", "must lie in [0, 1]")?;
        ensure(
            (0.0..1.0).contains(&self.wood_water_fraction),
            "wood_water_fraction",
            "must lie in [0, 1)",
        )
    }
}

impl Default for TreeParams {
    fn default() -> Self {
        Self::general_deciduous()
    }
}

fn is_fraction(value: f32) -> bool {
    (0.0..=1.0).contains(&value)
}

fn ensure(condition: bool, name: &'static str, reason: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name,
            reason: reason.to_owned(),
        })
    }
}

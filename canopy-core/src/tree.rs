//! A single tree and its yearly update.

use crate::{
    config::{SimulationParams, TreeParams},
    segment::SegmentTree,
    voxel_grid::VoxelGrid,
};
use glam::Vec3;
use rand::Rng;
use std::cmp::Reverse;

/// Trees older than this are compared against the mature mass/leaf
/// allometry in [`Tree::mass_leaf_ratio`].
const MATURE_ALLOMETRY_AGE: u32 = 30;

/// Snapshot of the figures drivers usually print per tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TreeReport {
    pub age: u32,
    pub height: f32,
    pub diameter: f32,
    pub total_mass: f32,
    pub leaf_mass: f32,
    pub timber_mass: f32,
}

/// One tree growing in a shared [`VoxelGrid`].
#[derive(Clone, Debug)]
pub struct Tree {
    segments: SegmentTree,
    age: u32,
    timber_diameter: f32,
    total_stem_mass: f32,
    total_leaf_mass: f32,
    total_mass: f32,
}

impl Tree {
    /// Plants a seedling at `(x, y)` on the ground and claims the cell its
    /// first segment reaches.
    pub fn plant(
        env: &SimulationParams,
        params: &TreeParams,
        grid: &mut VoxelGrid,
        x: f32,
        y: f32,
    ) -> Self {
        let segments = SegmentTree::new(Vec3::new(x, y, 0.0), *params, *env);
        grid.set_cell_full(segments.get(segments.root()).end(), true);
        Self {
            segments,
            age: 0,
            timber_diameter: env.timber_diameter,
            total_stem_mass: 0.0,
            total_leaf_mass: 0.0,
            total_mass: 0.0,
        }
    }

    /// Runs one year of growth. Returns `false` once the tree has reached
    /// its maximum age, in which case nothing changes.
    ///
    /// The order is fixed: carbon budget from last year's light, reset and
    /// age every segment, width growth with pruning, then branching from
    /// the oldest segment down while budget remains.
    pub fn update<R: Rng + ?Sized>(&mut self, grid: &mut VoxelGrid, rng: &mut R) -> bool {
        if self.age >= self.segments.params().max_age {
            return false;
        }
        self.age += 1;
        let angle_factor = self.segments.params().branch_angle_factor(self.age);
        let root = self.segments.root();

        let produced = self.segments.compute_carbon_budget(root, grid);
        for id in self.segments.descendants_plus_this(root) {
            self.segments.reset_values(id);
            self.segments.age_one_year(id);
        }

        let before_width = self.segments.len();
        let mut budget = self.segments.update_segment_width(root, grid, produced);
        let pruned = before_width - self.segments.len();

        let mut by_age = self.segments.descendants_plus_this(root);
        by_age.sort_by_key(|&id| Reverse(self.segments.get(id).age()));
        let before_branching = self.segments.len();
        for &id in &by_age {
            if budget <= 0.0 {
                break;
            }
            budget = self
                .segments
                .update_segment_branching(id, grid, budget, angle_factor, rng);
        }
        let branches = self.segments.len() - before_branching;

        for &id in &by_age {
            self.segments.reset_values(id);
        }
        self.refresh_totals();

        tracing::debug!(
            age = self.age,
            produced,
            remaining = budget,
            segments = self.segments.len(),
            pruned,
            branches,
            "tree grew one year"
        );
        true
    }

    fn refresh_totals(&mut self) {
        let root = self.segments.root();
        self.total_stem_mass = self.segments.mass_with_descendants(root);
        self.total_leaf_mass = self.segments.leaf_mass_with_descendants(root);
        self.total_mass = self.total_stem_mass + self.total_leaf_mass;
    }

    #[inline]
    pub fn age(&self) -> u32 {
        self.age
    }

    /// Whether the tree will still grow on the next update.
    #[inline]
    pub fn is_growing(&self) -> bool {
        self.age < self.segments.params().max_age
    }

    #[inline]
    pub fn segments(&self) -> &SegmentTree {
        &self.segments
    }

    #[inline]
    pub fn params(&self) -> &TreeParams {
        self.segments.params()
    }

    /// Wood mass as of the last update, kg.
    #[inline]
    pub fn total_stem_mass(&self) -> f32 {
        self.total_stem_mass
    }

    /// Leaf mass as of the last update, kg.
    #[inline]
    pub fn total_leaf_mass(&self) -> f32 {
        self.total_leaf_mass
    }

    /// Wood plus leaf mass as of the last update, kg.
    #[inline]
    pub fn total_mass(&self) -> f32 {
        self.total_mass
    }

    /// Mass of every segment thicker than the timber threshold.
    pub fn timber_mass(&self) -> f32 {
        self.segments
            .iter()
            .filter(|(_, s)| s.width() > self.timber_diameter)
            .map(|(id, _)| self.segments.segment_mass(id))
            .sum()
    }

    /// Height of the highest segment end point.
    pub fn height(&self) -> f32 {
        self.segments.highest_point(self.segments.root())
    }

    /// Trunk width at the base.
    pub fn diameter(&self) -> f32 {
        self.segments.get(self.segments.root()).width()
    }

    pub fn center_of_mass(&self) -> Vec3 {
        self.segments.center_of_mass(self.segments.root())
    }

    pub fn wind_force(&self) -> f32 {
        self.segments.wind_force(self.segments.root())
    }

    pub fn center_of_wind_force(&self) -> Vec3 {
        self.segments.center_of_wind_force(self.segments.root())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.count_descendants(self.segments.root())
    }

    pub fn leaf_count(&self) -> usize {
        self.segments.count_leaves(self.segments.root())
    }

    /// Predicted leaf mass `0.25 · Ms^0.73` over the actual leaf mass.
    pub fn leaf_mass_ratio(&self) -> Option<f32> {
        if self.total_leaf_mass <= 0.0 {
            return None;
        }
        Some(0.25 * self.total_stem_mass.powf(0.73) / self.total_leaf_mass)
    }

    /// Total mass over leaf mass, with total mass raised to 0.75 once the
    /// tree is mature.
    pub fn mass_leaf_ratio(&self) -> Option<f32> {
        if self.total_leaf_mass <= 0.0 {
            return None;
        }
        let mass = if self.age > MATURE_ALLOMETRY_AGE {
            self.total_mass.powf(0.75)
        } else {
            self.total_mass
        };
        Some(mass / self.total_leaf_mass)
    }

    /// Height over diameter^(2/3).
    pub fn height_diameter_ratio(&self) -> Option<f32> {
        let d = self.diameter();
        if d <= 0.0 {
            return None;
        }
        Some(self.height() / d.powf(2.0 / 3.0))
    }

    pub fn report(&self) -> TreeReport {
        TreeReport {
            age: self.age,
            height: self.height(),
            diameter: self.diameter(),
            total_mass: self.total_mass,
            leaf_mass: self.total_leaf_mass,
            timber_mass: self.timber_mass(),
        }
    }
}

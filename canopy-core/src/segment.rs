//! Branch segments and the per-year growth operations on them.
//!
//! A tree is an arena of [`Segment`]s. Each segment is a straight cylinder
//! hanging off its parent's end point; the parent owns its children, the
//! child keeps a plain index back to its parent.
//!
//! Subtree aggregates (mass, leaf mass, centre of mass, wind force and its
//! centre) are memoized per growth pass. A cache slot is `None` until it is
//! first read after [`SegmentTree::reset_values`], so a genuinely zero
//! aggregate is never mistaken for a stale one.

use crate::{
    config::{SimulationParams, TreeParams},
    math::VecExt,
    types::SegmentId,
    voxel_grid::VoxelGrid,
};
use glam::Vec3;
use rand::Rng;
use std::{cell::Cell, f32::consts::PI};

/// Width of a freshly created segment, metres.
pub const INITIAL_WIDTH: f32 = 0.01;

/// A segment may branch while it has at most this many children.
pub const MAX_CHILDREN_FOR_BRANCHING: usize = 3;

#[derive(Clone, Debug, Default)]
struct Aggregates {
    mass: Cell<Option<f32>>,
    leaf_mass: Cell<Option<f32>>,
    center_of_mass: Cell<Option<Vec3>>,
    wind_force: Cell<Option<f32>>,
    center_of_wind_force: Cell<Option<Vec3>>,
}

/// One straight cylindrical section of trunk or branch.
#[derive(Clone, Debug)]
pub struct Segment {
    pub(crate) start: Vec3,
    pub(crate) end: Vec3,
    pub(crate) direction: Vec3,
    pub(crate) width: f32,
    pub(crate) age: u32,
    pub(crate) parent: Option<SegmentId>,
    pub(crate) children: Vec<SegmentId>,
    alive: bool,
    cache: Aggregates,
    /// Net carbon of this subtree, set by the last budget pass.
    carbon_produced: Option<f32>,
}

impl Segment {
    fn new(parent: Option<SegmentId>, start: Vec3, direction: Vec3) -> Self {
        Self {
            start,
            end: start + direction,
            direction,
            width: INITIAL_WIDTH,
            age: 0,
            parent,
            children: Vec::with_capacity(4),
            alive: true,
            cache: Aggregates::default(),
            carbon_produced: None,
        }
    }

    #[inline]
    pub fn start(&self) -> Vec3 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> Vec3 {
        self.end
    }

    /// Vector from start to end; its length is the species segment length.
    #[inline]
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    #[inline]
    pub fn unit_direction(&self) -> Vec3 {
        self.direction.normalize_or_zero()
    }

    /// Diameter, metres.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.width / 2.0
    }

    /// Years since creation.
    #[inline]
    pub fn age(&self) -> u32 {
        self.age
    }

    #[inline]
    pub fn parent(&self) -> Option<SegmentId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> &[SegmentId] {
        &self.children
    }

    /// Net carbon produced by this subtree in the last budget pass.
    #[inline]
    pub fn carbon_produced(&self) -> Option<f32> {
        self.carbon_produced
    }

    /// Orthonormal frame `(x, y, z)` with `z` along the segment, for
    /// renderers that orient leaf quads or wood cylinders.
    pub fn local_frame(&self) -> (Vec3, Vec3, Vec3) {
        let z = self.unit_direction();
        let x = z.one_perpendicular().normalize_or_zero();
        let y = z.cross(x);
        (x, y, z)
    }
}

/// Stress at a beam's base for a given load, N/m².
///
/// `d` is the beam width and `l` the lever arm; `z_force` acts through the
/// lever, `x_force` directly on the section.
#[inline]
pub fn beam_stress(x_force: f32, z_force: f32, l: f32, d: f32) -> f32 {
    (1.273 / (d * d) * (8.0 * l * z_force / d + x_force)).abs()
}

/// Bernoulli trial for branch formation at a tip receiving `light`.
///
/// Succeeds when `floor(r / light) == 0` for a uniform `r` in `[0, 1)`, so
/// the chance is `min(1, light)`. No light means no branching.
pub fn branching_trial<R: Rng + ?Sized>(light: f32, rng: &mut R) -> bool {
    if light <= 0.0 {
        return false;
    }
    (rng.random::<f64>() * (1.0 / f64::from(light))).floor() == 0.0
}

/// Arena holding every segment of one tree, plus the parameters the
/// growth operations read.
#[derive(Clone, Debug)]
pub struct SegmentTree {
    segments: Vec<Segment>,
    free: Vec<SegmentId>,
    root: SegmentId,
    params: TreeParams,
    env: SimulationParams,
}

impl SegmentTree {
    /// Creates a tree with a single vertical root segment rising from `base`.
    pub fn new(base: Vec3, params: TreeParams, env: SimulationParams) -> Self {
        let root = Segment::new(None, base, Vec3::new(0.0, 0.0, params.segment_length));
        Self {
            segments: vec![root],
            free: Vec::new(),
            root: 0,
            params,
            env,
        }
    }

    #[inline]
    pub fn root(&self) -> SegmentId {
        self.root
    }

    #[inline]
    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    #[inline]
    pub fn env(&self) -> &SimulationParams {
        &self.env
    }

    /// Segment by id. Ids must come from this tree.
    #[inline]
    pub fn get(&self, id: SegmentId) -> &Segment {
        &self.segments[id]
    }

    #[inline]
    pub fn is_alive(&self, id: SegmentId) -> bool {
        self.segments.get(id).is_some_and(|s| s.alive)
    }

    /// Number of live segments.
    pub fn len(&self) -> usize {
        self.segments.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live segments in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> + '_ {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.alive)
    }

    /// Appends a child of `parent` growing along `direction`.
    ///
    /// Does not touch the voxel grid; callers claim cells themselves.
    pub fn add_child(&mut self, parent: SegmentId, direction: Vec3) -> SegmentId {
        let start = self.segments[parent].end;
        let segment = Segment::new(Some(parent), start, direction);
        let id = match self.free.pop() {
            Some(id) => {
                self.segments[id] = segment;
                id
            }
            None => {
                self.segments.push(segment);
                self.segments.len() - 1
            }
        };
        self.segments[parent].children.push(id);
        id
    }

    /// Invalidates the memoized aggregates of one segment.
    pub fn reset_values(&mut self, id: SegmentId) {
        self.segments[id].cache = Aggregates::default();
    }

    pub fn age_one_year(&mut self, id: SegmentId) {
        self.segments[id].age += 1;
    }

    /// Whether the segment currently carries leaves.
    #[inline]
    pub fn is_leaf(&self, id: SegmentId) -> bool {
        self.segments[id].age <= self.params.max_leaf_age
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.params.segment_length
    }

    /// Fresh wood mass of the segment alone, kg.
    pub fn segment_mass(&self, id: SegmentId) -> f32 {
        let radius = self.segments[id].radius();
        let volume = PI * radius * radius * self.length();
        volume * self.params.wood_density
    }

    pub fn segment_dry_mass(&self, id: SegmentId) -> f32 {
        self.segment_mass(id) * (1.0 - self.params.wood_water_fraction)
    }

    // ---------------------------------------------------------------------
    // Carbon
    // ---------------------------------------------------------------------

    /// Net carbon the leaves of one segment fix in a year, after the root
    /// share and the leaves' own dry mass are paid for.
    pub fn leaf_carbon(&self, id: SegmentId, grid: &VoxelGrid) -> f32 {
        let light_per_leaf = self.env.total_sunlight_incident
            * self.params.leaf_area
            * grid.get_light(self.segments[id].end);
        let gross = self.params.efficiency * self.params.fraction_absorbed * light_per_leaf;
        let net = gross - gross * self.params.root_apportion;
        net - self.params.leaf_dry_mass
    }

    /// Sums leaf carbon over the subtree at `id`, recording each segment's
    /// subtree total for the pruning test.
    pub fn compute_carbon_budget(&mut self, id: SegmentId, grid: &VoxelGrid) -> f32 {
        let mut budget = 0.0;
        for i in 0..self.segments[id].children.len() {
            let child = self.segments[id].children[i];
            budget += self.compute_carbon_budget(child, grid);
        }
        if self.is_leaf(id) {
            budget += self.leaf_carbon(id, grid);
        }
        self.segments[id].carbon_produced = Some(budget);
        budget
    }

    // ---------------------------------------------------------------------
    // Memoized subtree aggregates
    // ---------------------------------------------------------------------

    /// Wood mass of this segment and all descendants.
    pub fn mass_with_descendants(&self, id: SegmentId) -> f32 {
        let seg = &self.segments[id];
        if let Some(mass) = seg.cache.mass.get() {
            return mass;
        }
        let mut mass = self.segment_mass(id);
        for &child in &seg.children {
            mass += self.mass_with_descendants(child);
        }
        seg.cache.mass.set(Some(mass));
        mass
    }

    /// Fresh leaf mass of this segment and all descendants.
    pub fn leaf_mass_with_descendants(&self, id: SegmentId) -> f32 {
        let seg = &self.segments[id];
        if let Some(mass) = seg.cache.leaf_mass.get() {
            return mass;
        }
        let mut mass: f32 = seg
            .children
            .iter()
            .map(|&c| self.leaf_mass_with_descendants(c))
            .sum();
        if self.is_leaf(id) {
            mass += self.params.leaf_mass;
        }
        seg.cache.leaf_mass.set(Some(mass));
        mass
    }

    /// Centre of mass of the subtree.
    ///
    /// The segment's own wood counts at its midpoint; each child subtree
    /// counts with its wood and leaf mass at its own centre.
    pub fn center_of_mass(&self, id: SegmentId) -> Vec3 {
        let seg = &self.segments[id];
        if let Some(center) = seg.cache.center_of_mass.get() {
            return center;
        }
        let midpoint = (seg.start + seg.end) * 0.5;
        let own = self.segment_mass(id);
        let mut total = own;
        let mut moment = midpoint * own;
        for &child in &seg.children {
            let mass = self.mass_with_descendants(child) + self.leaf_mass_with_descendants(child);
            total += mass;
            moment += self.center_of_mass(child) * mass;
        }
        let center = if total > 0.0 { moment / total } else { midpoint };
        seg.cache.center_of_mass.set(Some(center));
        center
    }

    /// Horizontal drag on every leaf-bearing segment of the subtree, N.
    pub fn wind_force(&self, id: SegmentId) -> f32 {
        let seg = &self.segments[id];
        if let Some(force) = seg.cache.wind_force.get() {
            return force;
        }
        let mut force = if self.is_leaf(id) { self.leaf_drag() } else { 0.0 };
        for &child in &seg.children {
            force += self.wind_force(child);
        }
        seg.cache.wind_force.set(Some(force));
        force
    }

    /// Force-weighted mean position of the subtree's leaves.
    ///
    /// A subtree without leaves has no wind load; its centre is reported
    /// as the segment start.
    pub fn center_of_wind_force(&self, id: SegmentId) -> Vec3 {
        let seg = &self.segments[id];
        if let Some(center) = seg.cache.center_of_wind_force.get() {
            return center;
        }
        let mut total = 0.0;
        let mut moment = Vec3::ZERO;
        if self.is_leaf(id) {
            let own = self.leaf_drag();
            moment += seg.end * own;
            total += own;
        }
        for &child in &seg.children {
            let force = self.wind_force(child);
            total += force;
            moment += self.center_of_wind_force(child) * force;
        }
        let center = if total != 0.0 { moment / total } else { seg.start };
        seg.cache.center_of_wind_force.set(Some(center));
        center
    }

    fn leaf_drag(&self) -> f32 {
        let v = self.env.max_wind_speed;
        0.5 * self.params.drag_coefficient * self.env.air_density * self.params.leaf_area * v * v
    }

    // ---------------------------------------------------------------------
    // Width growth and pruning
    // ---------------------------------------------------------------------

    /// Width the segment adds this year in response to gravity and wind
    /// loads at its base.
    pub fn width_increment(&self, id: SegmentId) -> f32 {
        let seg = &self.segments[id];
        let env = &self.env;

        let lever = self.center_of_mass(id) - seg.start;
        let l = lever.length();
        let stress_gravity = if l > 0.0 {
            let load = (self.mass_with_descendants(id) + self.leaf_mass_with_descendants(id))
                * env.gravity;
            let x_force = load * lever.z / l;
            let z_force = load * lever.horizontal_length() / l;
            beam_stress(x_force, z_force, l, seg.width)
        } else {
            0.0
        };

        let wind = self.wind_force(id);
        let arm = self.center_of_wind_force(id) - seg.start;
        let wind_l = arm.length();
        let stress_wind = if wind != 0.0 && wind_l > 0.0 {
            let x_force = wind * arm.horizontal_length() / wind_l;
            let z_force = wind * arm.z / wind_l;
            beam_stress(x_force, z_force, wind_l, seg.width)
        } else {
            0.0
        };

        let increment = (stress_gravity + stress_wind) / self.params.stress_proportion;
        debug_assert!(
            increment.is_finite() && increment >= 0.0,
            "width increment {increment} for segment {id}"
        );
        increment
    }

    /// Spends `budget` on width growth over the subtree, children first,
    /// and prunes any segment whose subtree cost more than it produced.
    ///
    /// Returns the remaining budget. A negative budget passes through
    /// untouched.
    pub fn update_segment_width(
        &mut self,
        id: SegmentId,
        grid: &mut VoxelGrid,
        budget: f32,
    ) -> f32 {
        if budget < 0.0 {
            return budget;
        }
        let mut remaining = budget;
        let children = self.segments[id].children.clone();
        for child in children {
            remaining = self.update_segment_width(child, grid, remaining);
        }

        if remaining > 0.0 {
            let before = self.segment_dry_mass(id);
            let increment = self.width_increment(id);
            self.segments[id].width += increment;
            remaining -= self.segment_dry_mass(id) - before;
        }

        let spent = budget - remaining;
        if let Some(produced) = self.segments[id].carbon_produced
            && spent > produced
        {
            self.prune(id, grid);
        }
        self.reset_values(id);
        remaining
    }

    /// Detaches the subtree at `id` from its parent and frees every voxel
    /// cell it occupied.
    ///
    /// Returns `false` without doing anything when `id` is already pruned
    /// or is the root.
    pub fn prune(&mut self, id: SegmentId, grid: &mut VoxelGrid) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let Some(parent) = self.segments[id].parent else {
            return false;
        };
        self.segments[parent].children.retain(|&c| c != id);

        let removed = self.descendants_plus_this(id);
        tracing::trace!(segment = id, removed = removed.len(), "pruned branch");
        for sid in removed {
            let seg = &mut self.segments[sid];
            grid.set_cell_full(seg.end, false);
            seg.alive = false;
            seg.parent = None;
            seg.children.clear();
            self.free.push(sid);
        }
        true
    }

    // ---------------------------------------------------------------------
    // Branching
    // ---------------------------------------------------------------------

    /// Possibly sprouts one new child at the end of segment `id`.
    ///
    /// The new direction is this segment's direction plus a random
    /// perturbation scaled by `angle_factor`. The child is kept only if its
    /// tip lands in a free cell, which it then claims; its dry mass is
    /// charged to `budget`.
    pub fn update_segment_branching<R: Rng + ?Sized>(
        &mut self,
        id: SegmentId,
        grid: &mut VoxelGrid,
        budget: f32,
        angle_factor: f32,
        rng: &mut R,
    ) -> f32 {
        let seg = &self.segments[id];
        if seg.children.len() > MAX_CHILDREN_FOR_BRANCHING
            || !branching_trial(grid.get_light(seg.end), rng)
        {
            return budget;
        }

        let perturbation = Vec3::new(
            rng.random::<f32>() - 0.5,
            rng.random::<f32>() - 0.5,
            rng.random::<f32>() - 0.5,
        ) * angle_factor;
        let direction = (seg.direction + perturbation).normalize_or_zero() * self.length();
        if direction == Vec3::ZERO {
            return budget;
        }

        let tip = seg.end + direction;
        if grid.cell_full(tip) {
            return budget;
        }
        grid.set_cell_full(tip, true);
        let child = self.add_child(id, direction);
        budget - self.segment_dry_mass(child)
    }

    // ---------------------------------------------------------------------
    // Structural queries
    // ---------------------------------------------------------------------

    /// Every segment below `id`, pre-order, excluding `id`.
    pub fn descendants(&self, id: SegmentId) -> Vec<SegmentId> {
        let mut out = self.descendants_plus_this(id);
        out.remove(0);
        out
    }

    /// `id` followed by every segment below it, pre-order.
    pub fn descendants_plus_this(&self, id: SegmentId) -> Vec<SegmentId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(sid) = stack.pop() {
            out.push(sid);
            stack.extend(self.segments[sid].children.iter().rev());
        }
        out
    }

    /// Number of segments in the subtree, including `id`.
    pub fn count_descendants(&self, id: SegmentId) -> usize {
        1 + self.segments[id]
            .children
            .iter()
            .map(|&c| self.count_descendants(c))
            .sum::<usize>()
    }

    /// Number of leaf-bearing segments in the subtree.
    pub fn count_leaves(&self, id: SegmentId) -> usize {
        usize::from(self.is_leaf(id))
            + self.segments[id]
                .children
                .iter()
                .map(|&c| self.count_leaves(c))
                .sum::<usize>()
    }

    pub fn descendant_has_leaf(&self, id: SegmentId) -> bool {
        self.is_leaf(id)
            || self.segments[id]
                .children
                .iter()
                .any(|&c| self.descendant_has_leaf(c))
    }

    /// Dry leaf mass of the subtree, kg.
    pub fn total_dry_leaf_mass(&self, id: SegmentId) -> f32 {
        let own = if self.is_leaf(id) {
            self.params.leaf_dry_mass
        } else {
            0.0
        };
        own + self.segments[id]
            .children
            .iter()
            .map(|&c| self.total_dry_leaf_mass(c))
            .sum::<f32>()
    }

    /// Highest end-point height in the subtree, never below zero.
    pub fn highest_point(&self, id: SegmentId) -> f32 {
        self.descendants_plus_this(id)
            .into_iter()
            .map(|sid| self.segments[sid].end.z)
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::{RngCore, SeedableRng, rngs::StdRng};

    /// Generator that always yields zero: every branching trial succeeds and
    /// every perturbation component is `-0.5`.
    pub(crate) struct ZeroRng;

    impl RngCore for ZeroRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(0);
        }
    }

    fn env() -> SimulationParams {
        SimulationParams {
            size: Vec3::new(4.0, 4.0, 4.0),
            cell_size: 0.08,
            ..SimulationParams::equator()
        }
    }

    fn lit_grid(light: [f32; 5]) -> VoxelGrid {
        let e = env();
        VoxelGrid::new(e.size, e.cell_size, light).unwrap()
    }

    fn planted(grid: &mut VoxelGrid) -> SegmentTree {
        let tree = SegmentTree::new(
            Vec3::new(2.0, 2.0, 0.0),
            TreeParams::general_deciduous(),
            env(),
        );
        grid.set_cell_full(tree.get(tree.root()).end(), true);
        tree
    }

    /// root -> child -> grandchild, straight up, with only the grandchild
    /// young enough to carry leaves.
    fn chain(grid: &mut VoxelGrid) -> (SegmentTree, [SegmentId; 3]) {
        let mut tree = planted(grid);
        let root = tree.root();
        let up = Vec3::new(0.0, 0.0, tree.length());
        let child = tree.add_child(root, up);
        let grandchild = tree.add_child(child, up);
        for id in [child, grandchild] {
            grid.set_cell_full(tree.get(id).end(), true);
        }
        tree.segments[root].age = 5;
        tree.segments[child].age = 4;
        tree.segments[grandchild].age = 1;
        (tree, [root, child, grandchild])
    }

    #[test]
    fn new_tree_has_vertical_root_of_one_segment_length() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let tree = planted(grid);
        let root = tree.get(tree.root());
        assert_eq!(root.start(), Vec3::new(2.0, 2.0, 0.0));
        assert_relative_eq!(root.end().z, 0.1);
        assert_eq!(root.width(), INITIAL_WIDTH);
        assert_eq!(root.age(), 0);
        assert!(root.parent().is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn carbon_budget_of_chain_equals_only_leaf_contribution() {
        let grid = &mut lit_grid([1.0, 0.0, 0.0, 0.0, 0.0]);
        let (mut tree, [root, child, grandchild]) = chain(grid);
        // An empty grid lit straight down reads exactly 1.0 in every cell.
        let uniform = lit_grid([1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(uniform.get_light(tree.get(grandchild).end()), 1.0);

        let leaf = tree.leaf_carbon(grandchild, &uniform);
        let budget = tree.compute_carbon_budget(root, &uniform);

        assert_eq!(budget, leaf);
        assert_eq!(tree.get(child).carbon_produced(), Some(leaf));
        assert_eq!(tree.get(grandchild).carbon_produced(), Some(leaf));

        let params = TreeParams::general_deciduous();
        let gross = params.efficiency * params.fraction_absorbed * 6636.0 * params.leaf_area;
        assert_relative_eq!(
            leaf,
            gross * (1.0 - params.root_apportion) - params.leaf_dry_mass,
            max_relative = 1e-5
        );
    }

    #[test]
    fn aggregates_fold_over_the_subtree() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (tree, [root, child, grandchild]) = chain(grid);
        let seg_mass = tree.segment_mass(root);

        assert_relative_eq!(
            tree.mass_with_descendants(root),
            3.0 * seg_mass,
            max_relative = 1e-6
        );
        assert_relative_eq!(tree.leaf_mass_with_descendants(root), 0.0096);
        assert_eq!(tree.leaf_mass_with_descendants(child), 0.0096);
        assert_eq!(tree.count_descendants(root), 3);
        assert_eq!(tree.count_leaves(root), 1);
        assert!(tree.descendant_has_leaf(root));
        assert!(!tree.is_leaf(child));
        assert_relative_eq!(tree.total_dry_leaf_mass(root), 0.00192);
        assert_relative_eq!(tree.highest_point(root), 0.3, epsilon = 1e-6);

        // Wind loads only the leaf-bearing grandchild, at its tip.
        let drag = 0.5 * 0.5 * 1.2 * 0.0032 * 20.0 * 20.0;
        assert_relative_eq!(tree.wind_force(root), drag, max_relative = 1e-6);
        assert!(
            tree.center_of_wind_force(root)
                .abs_diff_eq(tree.get(grandchild).end(), 1e-6)
        );

        // A vertical chain keeps its centre of mass on the axis.
        let com = tree.center_of_mass(root);
        assert_relative_eq!(com.x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(com.y, 2.0, epsilon = 1e-6);
        assert!(com.z > 0.15 && com.z < 0.3);
    }

    #[test]
    fn aggregates_are_memoized_until_reset() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, ..]) = chain(grid);
        let before = tree.mass_with_descendants(root);

        tree.segments[root].width *= 2.0;
        assert_eq!(tree.mass_with_descendants(root), before);

        tree.reset_values(root);
        assert!(tree.mass_with_descendants(root) > before);
    }

    #[test]
    fn leafless_subtree_has_zero_wind_and_centre_at_start() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let root = tree.root();
        tree.segments[root].age = 9;
        assert_eq!(tree.wind_force(root), 0.0);
        assert_eq!(tree.center_of_wind_force(root), tree.get(root).start());
    }

    #[test]
    fn beam_stress_matches_closed_form() {
        let d = 0.02_f32;
        let expected = 1.273 / (d * d) * (8.0 * 0.5 * 3.0 / d + 2.0);
        assert_relative_eq!(beam_stress(2.0, 3.0, 0.5, d), expected);
        assert_relative_eq!(beam_stress(-2.0, -3.0, 0.5, d), expected);
    }

    #[test]
    fn width_increment_follows_load() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let root = tree.root();
        tree.segments[root].age = 1;

        let params = TreeParams::general_deciduous();
        let mass = tree.segment_mass(root) + params.leaf_mass;
        let gravity = beam_stress(mass * 9.8, 0.0, 0.05, INITIAL_WIDTH);
        let drag = tree.leaf_drag();
        let wind = beam_stress(0.0, drag, 0.1, INITIAL_WIDTH);

        assert_relative_eq!(
            tree.width_increment(root),
            (gravity + wind) / params.stress_proportion,
            max_relative = 1e-4
        );
    }

    #[test]
    fn width_grows_and_is_paid_for() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, child, grandchild]) = chain(grid);
        let budget = tree.compute_carbon_budget(root, grid);
        assert!(budget > 0.0);

        let widths: Vec<f32> = [root, child, grandchild]
            .iter()
            .map(|&id| tree.get(id).width())
            .collect();
        let dry_before: f32 = [root, child, grandchild]
            .iter()
            .map(|&id| tree.segment_dry_mass(id))
            .sum();

        let remaining = tree.update_segment_width(root, grid, budget);

        let dry_after: f32 = [root, child, grandchild]
            .iter()
            .map(|&id| tree.segment_dry_mass(id))
            .sum();
        assert_relative_eq!(budget - remaining, dry_after - dry_before, max_relative = 1e-3);
        for (id, before) in [root, child, grandchild].into_iter().zip(widths) {
            assert!(tree.get(id).width() > before, "segment {id} did not thicken");
        }
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn negative_budget_passes_through_width_pass() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, ..]) = chain(grid);
        tree.compute_carbon_budget(root, grid);
        assert_eq!(tree.update_segment_width(root, grid, -1.0), -1.0);
        assert_eq!(tree.get(root).width(), INITIAL_WIDTH);
    }

    #[test]
    fn width_step_overspends_by_at_most_its_own_cost() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, child, grandchild]) = chain(grid);
        tree.compute_carbon_budget(root, grid);

        let tiny = 1e-9;
        let before = tree.segment_dry_mass(grandchild);
        let remaining = tree.update_segment_width(grandchild, grid, tiny);
        let cost = tree.segment_dry_mass(grandchild) - before;
        assert!(remaining >= tiny - cost - 1e-9);
        assert!(tree.is_alive(child));
    }

    #[test]
    fn unproductive_branch_is_pruned_and_frees_its_cells() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, child, grandchild]) = chain(grid);
        // A side branch off the root whose leaves sit in darkness.
        let side = tree.add_child(root, Vec3::new(0.1, 0.0, 0.0));
        let side_tip = tree.add_child(side, Vec3::new(0.1, 0.0, 0.0));
        for id in [side, side_tip] {
            grid.set_cell_full(tree.get(id).end(), true);
        }
        tree.segments[side].age = 3;
        tree.segments[side_tip].age = 0;
        tree.compute_carbon_budget(root, grid);
        tree.segments[side].carbon_produced = Some(-1.0);

        let side_cells = [tree.get(side).end(), tree.get(side_tip).end()];
        tree.update_segment_width(root, grid, 1.0);

        assert!(!tree.is_alive(side));
        assert!(!tree.is_alive(side_tip));
        for p in side_cells {
            assert!(!grid.cell_full(p));
        }
        let remaining = tree.descendants_plus_this(root);
        assert!(!remaining.contains(&side));
        assert!(!remaining.contains(&side_tip));
        assert_eq!(remaining, vec![root, child, grandchild]);
        assert!(grid.cell_full(tree.get(grandchild).end()));
    }

    #[test]
    fn prune_is_a_no_op_for_root_and_already_pruned_segments() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, child, grandchild]) = chain(grid);

        assert!(!tree.prune(root, grid));
        assert!(tree.prune(child, grid));
        assert!(!tree.prune(child, grid));
        assert!(!tree.prune(grandchild, grid));
        assert_eq!(tree.len(), 1);
        assert!(tree.get(root).children().is_empty());
        assert!(!grid.cell_full(Vec3::new(2.0, 2.0, 0.25)));
    }

    #[test]
    fn pruned_slots_are_reused() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let (mut tree, [root, _, grandchild]) = chain(grid);
        tree.prune(grandchild, grid);
        let reused = tree.add_child(root, Vec3::new(0.0, 0.1, 0.0));
        assert_eq!(reused, grandchild);
        assert!(tree.is_alive(reused));
        assert_eq!(tree.get(reused).parent(), Some(root));
    }

    #[test]
    fn forced_branching_claims_a_cell_and_charges_the_budget() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let root = tree.root();

        let remaining = tree.update_segment_branching(root, grid, 1.0, 0.01, &mut ZeroRng);

        assert_eq!(tree.get(root).children().len(), 1);
        let child = tree.get(root).children()[0];
        let seg = tree.get(child);
        assert_relative_eq!(seg.direction().length(), 0.1, epsilon = 1e-6);
        assert_eq!(seg.start(), tree.get(root).end());
        assert!(grid.cell_full(seg.end()));
        assert_relative_eq!(remaining, 1.0 - tree.segment_dry_mass(child));
    }

    #[test]
    fn branching_is_rejected_when_tip_cell_is_taken() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let root = tree.root();

        tree.update_segment_branching(root, grid, 1.0, 0.01, &mut ZeroRng);
        // Same perturbation again, so the proposal lands on the same cell.
        let remaining = tree.update_segment_branching(root, grid, 0.5, 0.01, &mut ZeroRng);

        assert_eq!(remaining, 0.5);
        assert_eq!(tree.get(root).children().len(), 1);
    }

    #[test]
    fn branching_stops_after_four_children() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let root = tree.root();
        for dx in [0.1, -0.1, 0.0, 0.0] {
            let dy = if dx == 0.0 { 0.1 } else { 0.0 };
            tree.add_child(root, Vec3::new(dx, dy, 0.0));
        }
        let children = tree.get(root).children().len();
        assert_eq!(tree.update_segment_branching(root, grid, 1.0, 0.01, &mut ZeroRng), 1.0);
        assert_eq!(tree.get(root).children().len(), children);
    }

    #[test]
    fn branching_trial_tracks_light() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!branching_trial(0.0, &mut rng));
        assert!((0..100).all(|_| branching_trial(1.0, &mut rng)));
        assert!((0..100).all(|_| branching_trial(2.5, &mut rng)));

        let hits = (0..10_000)
            .filter(|_| branching_trial(0.25, &mut rng))
            .count();
        assert_abs_diff_eq!(hits as f64 / 10_000.0, 0.25, epsilon = 0.03);
    }

    #[test]
    fn descendants_are_pre_order() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let root = tree.root();
        let a = tree.add_child(root, Vec3::Z * 0.1);
        let b = tree.add_child(root, Vec3::X * 0.1);
        let a1 = tree.add_child(a, Vec3::Y * 0.1);

        assert_eq!(tree.descendants_plus_this(root), vec![root, a, a1, b]);
        assert_eq!(tree.descendants(root), vec![a, a1, b]);
        assert_eq!(tree.descendants(a1), Vec::<SegmentId>::new());
    }

    #[test]
    fn local_frame_is_orthonormal() {
        let grid = &mut lit_grid([0.6, 0.1, 0.1, 0.1, 0.1]);
        let mut tree = planted(grid);
        let id = tree.add_child(tree.root(), Vec3::new(0.03, 0.04, 0.05));
        let (x, y, z) = tree.get(id).local_frame();
        for v in [x, y, z] {
            assert_relative_eq!(v.length(), 1.0, epsilon = 1e-5);
        }
        assert_relative_eq!(x.dot(z), 0.0, epsilon = 1e-6);
        assert_relative_eq!(y.dot(z), 0.0, epsilon = 1e-6);
    }
}

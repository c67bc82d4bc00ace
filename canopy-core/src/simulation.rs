//! The yearly tick loop over every tree sharing one voxel grid.
//!
//! Each tick runs, in order:
//! 1. [`Tree::update`] for every tree, planting order, all writing into the
//!    same [`VoxelGrid`]. A tree that proposes a branch into a cell another
//!    tree already claimed this tick simply loses it.
//! 2. One [`VoxelGrid::update_light`] refresh, only if some tree grew.
//!
//! Budgets are computed from the light field of the previous tick; the
//! grid is never relit mid-tick.

use crate::{
    config::{SimulationParams, TreeParams},
    error::Result,
    tree::Tree,
    voxel_grid::VoxelGrid,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Extra ticks [`Simulation::grow_to_completion`] runs past the maximum
/// tree age.
const COMPLETION_MARGIN: u32 = 20;

pub struct Simulation<R = StdRng> {
    params: SimulationParams,
    tree_params: TreeParams,
    grid: VoxelGrid,
    trees: Vec<Tree>,
    rng: R,
    year: u32,
}

impl Simulation<StdRng> {
    /// Builds a simulation seeded from the operating system.
    pub fn new(params: SimulationParams, tree_params: TreeParams) -> Result<Self> {
        Self::with_rng(params, tree_params, StdRng::from_os_rng())
    }

    /// Builds a simulation whose growth is reproducible for a given seed.
    pub fn with_seed(params: SimulationParams, tree_params: TreeParams, seed: u64) -> Result<Self> {
        Self::with_rng(params, tree_params, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> Simulation<R> {
    /// Validates both parameter sets, lights an empty grid and plants a
    /// `num_trees_x × num_trees_y` lattice of seedlings, each at the centre
    /// of its share of the ground.
    ///
    /// ### Parameters
    /// - `params` - Environment shared by every tree.
    /// - `tree_params` - Species constants used for every tree.
    /// - `rng` - Random source for all branching decisions.
    pub fn with_rng(params: SimulationParams, tree_params: TreeParams, rng: R) -> Result<Self> {
        params.validate()?;
        tree_params.validate()?;

        let mut grid = VoxelGrid::new(params.size, params.cell_size, params.light_directions)?;
        let step_x = params.size.x / params.num_trees_x as f32;
        let step_y = params.size.y / params.num_trees_y as f32;
        let mut trees = Vec::with_capacity(params.num_trees_x * params.num_trees_y);
        for i in 0..params.num_trees_x {
            for j in 0..params.num_trees_y {
                let x = (i as f32 + 0.5) * step_x;
                let y = (j as f32 + 0.5) * step_y;
                trees.push(Tree::plant(&params, &tree_params, &mut grid, x, y));
            }
        }

        let dims = grid.dims();
        tracing::info!(
            trees = trees.len(),
            cells_x = dims.x,
            cells_y = dims.y,
            cells_z = dims.z,
            max_age = tree_params.max_age,
            "simulation created"
        );

        Ok(Self {
            params,
            tree_params,
            grid,
            trees,
            rng,
            year: 0,
        })
    }

    /// Advances every tree by one year and relights the grid.
    ///
    /// Returns `false` once every tree has reached its maximum age; the
    /// grid and year counter are then left untouched.
    pub fn update(&mut self) -> bool {
        let _span = tracing::debug_span!("tick", year = self.year + 1).entered();
        let mut grew = false;
        for tree in &mut self.trees {
            grew |= tree.update(&mut self.grid, &mut self.rng);
        }
        if grew {
            self.grid.update_light();
            self.year += 1;
        }
        grew
    }

    /// Runs `years` ticks.
    pub fn run(&mut self, years: u32) {
        for _ in 0..years {
            self.update();
        }
    }

    /// Runs well past the point where every tree has stopped growing.
    pub fn grow_to_completion(&mut self) {
        self.run(self.tree_params.max_age + COMPLETION_MARGIN);
    }

    pub fn is_growing(&self) -> bool {
        self.trees.iter().any(Tree::is_growing)
    }

    /// Combined wood and leaf mass of every tree, kg.
    pub fn total_mass(&self) -> f32 {
        self.trees.iter().map(Tree::total_mass).sum()
    }

    /// Mass of every segment thick enough to count as timber, kg.
    pub fn total_timber_mass(&self) -> f32 {
        self.trees.iter().map(Tree::timber_mass).sum()
    }

    /// Light reaching each ground cell as `(x, y, light_in)`.
    pub fn ground_light(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.grid.ground_light()
    }

    #[inline]
    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    #[inline]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    #[inline]
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    #[inline]
    pub fn tree_params(&self) -> &TreeParams {
        &self.tree_params
    }

    /// Number of ticks in which at least one tree grew.
    #[inline]
    pub fn year(&self) -> u32 {
        self.year
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        segment::{INITIAL_WIDTH, tests::ZeroRng},
    };
    use approx::assert_relative_eq;
    use glam::{IVec3, Vec3};
    use std::collections::HashSet;

    fn small_env() -> SimulationParams {
        SimulationParams {
            size: Vec3::new(1.0, 1.0, 1.5),
            ..SimulationParams::equator()
        }
    }

    fn species(max_age: u32) -> TreeParams {
        TreeParams {
            max_age,
            ..TreeParams::general_deciduous()
        }
    }

    #[test]
    fn five_years_with_forced_branching() {
        let mut sim = Simulation::with_rng(small_env(), species(5), ZeroRng).unwrap();
        sim.run(5);

        let tree = &sim.trees()[0];
        assert_eq!(tree.age(), 5);
        assert!(tree.total_mass() > 0.0);
        assert!(tree.diameter() > INITIAL_WIDTH);
        assert_eq!(sim.year(), 5);
        assert!(!sim.is_growing());
    }

    #[test]
    fn trees_are_planted_at_the_centre_of_their_plots() {
        let params = SimulationParams {
            num_trees_x: 2,
            num_trees_y: 3,
            ..small_env()
        };
        let sim = Simulation::with_seed(params, species(5), 0).unwrap();
        assert_eq!(sim.trees().len(), 6);

        let base = |i: usize| {
            let segments = sim.trees()[i].segments();
            segments.get(segments.root()).start()
        };
        assert_relative_eq!(base(0).x, 0.25);
        assert_relative_eq!(base(0).y, 1.0 / 6.0);
        assert_relative_eq!(base(5).x, 0.75);
        assert_relative_eq!(base(5).y, 5.0 / 6.0);
        assert_eq!(base(5).z, 0.0);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let params = SimulationParams {
            num_trees_x: 0,
            ..small_env()
        };
        let err = Simulation::with_seed(params, species(5), 0).err().unwrap();
        assert!(matches!(err, Error::InvalidParameter { name: "num_trees_x", .. }));

        let tree_params = TreeParams {
            segment_length: 0.0,
            ..species(5)
        };
        assert!(Simulation::with_seed(small_env(), tree_params, 0).is_err());
    }

    #[test]
    fn light_is_refreshed_once_per_growing_tick() {
        let mut sim = Simulation::with_rng(small_env(), species(1), ZeroRng).unwrap();
        let segments = sim.trees()[0].segments();
        let cell = sim.grid().find_cell(segments.get(segments.root()).start());
        let under_tree = |sim: &Simulation<ZeroRng>| {
            sim.ground_light()
                .find(|&(x, y, _)| x as i32 == cell.x && y as i32 == cell.y)
                .map(|(_, _, light)| light)
                .unwrap()
        };

        // Planting claims cells but the light field is still the empty one.
        assert_relative_eq!(under_tree(&sim), 1.0);
        assert!(sim.update());
        assert!(under_tree(&sim) < 1.0);
        assert_eq!(sim.year(), 1);

        let before: Vec<_> = sim.ground_light().collect();
        assert!(!sim.update());
        assert_eq!(sim.year(), 1);
        assert_eq!(sim.ground_light().collect::<Vec<_>>(), before);
    }

    #[test]
    fn neighbouring_trees_never_share_a_cell() {
        let params = SimulationParams {
            size: Vec3::new(0.4, 0.4, 1.2),
            num_trees_x: 2,
            ..SimulationParams::equator()
        };
        let tree_params = TreeParams {
            young_branch_angle_factor: 3.0,
            old_branch_angle_factor: 3.0,
            ..species(15)
        };
        let mut sim = Simulation::with_seed(params, tree_params, 11).unwrap();

        for _ in 0..15 {
            sim.update();
            let mut claimed: HashSet<IVec3> = HashSet::new();
            for tree in sim.trees() {
                for (_, seg) in tree.segments().iter() {
                    let cell = sim.grid().find_cell(seg.end());
                    assert!(sim.grid().cell_full(seg.end()));
                    assert!(claimed.insert(cell), "cell {cell} claimed twice");
                }
            }
        }
    }

    #[test]
    fn same_seed_grows_the_same_forest() {
        let params = SimulationParams {
            num_trees_x: 2,
            ..small_env()
        };
        let grow = || {
            let mut sim = Simulation::with_seed(params, species(8), 99).unwrap();
            sim.run(8);
            sim.trees()
                .iter()
                .flat_map(|t| t.segments().iter().map(|(_, s)| (s.end(), s.width())))
                .collect::<Vec<_>>()
        };
        assert_eq!(grow(), grow());
    }

    #[test]
    fn completion_stops_every_tree() {
        let mut sim = Simulation::with_seed(small_env(), species(4), 5).unwrap();
        sim.grow_to_completion();
        assert!(!sim.is_growing());
        assert_eq!(sim.year(), 4);
        assert!(sim.total_timber_mass() <= sim.total_mass());
    }
}

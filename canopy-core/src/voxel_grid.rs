//! Voxel occupancy and directional light field.
//!
//! The growth volume is cut into cubic cells. Each cell records whether a
//! branch tip occupies it and how much light enters and leaves it along
//! five directions. Light is injected above the canopy and carried one
//! layer down per step: the "down" channel from the cell directly above,
//! the four compass channels from the diagonal neighbour one layer up.
//! An occupied cell lets [`TRANSMITTANCE`] of each channel through.
//!
//! Horizontal indexing wraps toroidally, vertical indexing does not.

use crate::error::{Error, Result};
use glam::{IVec3, UVec3, Vec3};

/// Fraction of light an occupied cell passes on.
pub const TRANSMITTANCE: f32 = 0.2;

/// Slack applied before rounding a volume up to whole cells, so that
/// extents that are exact multiples of the cell size do not gain a layer
/// from float noise.
const CELL_COUNT_TOLERANCE: f32 = 1e-4;

/// One of the five tracked light-flow components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightDirection {
    Down = 0,
    North = 1,
    South = 2,
    East = 3,
    West = 4,
}

impl LightDirection {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Down,
        Self::North,
        Self::South,
        Self::East,
        Self::West,
    ];

    /// Channel index into the directional arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Horizontal offset `(dx, dy)` of the upper-layer cell that feeds this
    /// channel.
    #[inline]
    pub const fn source_offset(self) -> (i32, i32) {
        match self {
            Self::Down => (0, 0),
            Self::North => (0, 1),
            Self::South => (0, -1),
            Self::East => (1, 0),
            Self::West => (-1, 0),
        }
    }
}

/// State of a single cell.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Voxel {
    pub occupied: bool,
    /// Sum of `directional_in`.
    pub light_in: f32,
    /// Sum of `directional_out`.
    pub light_out: f32,
    pub directional_in: [f32; LightDirection::COUNT],
    pub directional_out: [f32; LightDirection::COUNT],
}

impl Voxel {
    fn set_light(&mut self, incoming: [f32; LightDirection::COUNT]) {
        self.directional_in = incoming;
        self.directional_out = if self.occupied {
            incoming.map(|l| l * TRANSMITTANCE)
        } else {
            incoming
        };
        self.light_in = self.directional_in.iter().sum();
        self.light_out = self.directional_out.iter().sum();
    }
}

/// 3-D grid of [`Voxel`]s covering the growth volume.
///
/// Storage holds one extra layer on top of the `dims.z` addressable layers
/// so that light can always be seeded one layer above the highest
/// propagated layer.
#[derive(Clone, Debug)]
pub struct VoxelGrid {
    dims: UVec3,
    cell_size: f32,
    start_light: [f32; LightDirection::COUNT],
    /// Highest layer light is recomputed from. Only ever rises.
    max_z: usize,
    voxels: Vec<Voxel>,
}

impl VoxelGrid {
    /// Creates an empty grid over a volume of `size` metres and lights it.
    ///
    /// The first light pass runs over every layer so that no cell starts
    /// dark; afterwards propagation is bounded by the occupied height.
    pub fn new(size: Vec3, cell_size: f32, start_light: [f32; LightDirection::COUNT]) -> Result<Self> {
        if !(cell_size > 0.0) {
            return Err(Error::InvalidParameter {
                name: "cell_size",
                reason: "must be positive".to_owned(),
            });
        }

        let nx = cells_along(size.x, cell_size);
        let ny = cells_along(size.y, cell_size);
        let nz = cells_along(size.z, cell_size);
        for (axis, n) in [('x', nx), ('y', ny), ('z', nz)] {
            if n == 0 {
                return Err(Error::EmptyGrid { axis });
            }
        }

        let layers = nz as usize + 1;
        let mut grid = Self {
            dims: UVec3::new(nx, ny, nz),
            cell_size,
            start_light,
            max_z: nz as usize - 1,
            voxels: vec![Voxel::default(); nx as usize * ny as usize * layers],
        };
        grid.update_light();
        grid.max_z = 1.min(nz as usize - 1);
        Ok(grid)
    }

    /// Number of cells along each axis.
    #[inline]
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Highest layer the next light pass starts from.
    #[inline]
    pub fn max_z(&self) -> usize {
        self.max_z
    }

    #[inline]
    pub fn start_light(&self) -> [f32; LightDirection::COUNT] {
        self.start_light
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims.y as usize + y) * self.dims.x as usize + x
    }

    /// Resolves the cell containing `point`.
    ///
    /// `x` and `y` are wrapped into range; `z` is returned as is and may lie
    /// outside the grid.
    pub fn find_cell(&self, point: Vec3) -> IVec3 {
        let scaled = point / self.cell_size;
        IVec3::new(
            (scaled.x.floor() as i32).rem_euclid(self.dims.x as i32),
            (scaled.y.floor() as i32).rem_euclid(self.dims.y as i32),
            scaled.z.floor() as i32,
        )
    }

    /// Corner point of a cell, in metres.
    #[inline]
    pub fn cell_to_point(&self, cell: IVec3) -> Vec3 {
        cell.as_vec3() * self.cell_size
    }

    /// Storage index of a resolved cell, or `None` when its height is
    /// outside the grid.
    fn cell_index(&self, cell: IVec3) -> Option<usize> {
        if cell.z < 0 || cell.z >= self.dims.z as i32 {
            return None;
        }
        Some(self.index(cell.x as usize, cell.y as usize, cell.z as usize))
    }

    /// Whether growth into `point` is blocked.
    ///
    /// Points below the ground or above the ceiling count as full.
    pub fn cell_full(&self, point: Vec3) -> bool {
        match self.cell_index(self.find_cell(point)) {
            Some(i) => self.voxels[i].occupied,
            None => true,
        }
    }

    /// Marks the cell containing `point` as occupied or free.
    ///
    /// Points outside the vertical range are ignored. Raises the light
    /// high-water mark to the cell's layer.
    pub fn set_cell_full(&mut self, point: Vec3, full: bool) {
        let cell = self.find_cell(point);
        let Some(i) = self.cell_index(cell) else {
            return;
        };
        self.voxels[i].occupied = full;
        self.max_z = self.max_z.max(cell.z as usize);
    }

    /// Total light entering the cell containing `point`.
    ///
    /// Above the grid this is the unattenuated top-of-canopy light; below
    /// the ground it is zero.
    pub fn get_light(&self, point: Vec3) -> f32 {
        let cell = self.find_cell(point);
        if cell.z >= self.dims.z as i32 {
            return self.start_light.iter().sum();
        }
        match self.cell_index(cell) {
            Some(i) => self.voxels[i].light_in,
            None => 0.0,
        }
    }

    /// Cell at integer coordinates, if within the addressable grid.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Option<&Voxel> {
        if x >= self.dims.x as usize || y >= self.dims.y as usize || z >= self.dims.z as usize {
            return None;
        }
        Some(&self.voxels[self.index(x, y, z)])
    }

    /// Iterates every addressable cell with its coordinates.
    pub fn cells(&self) -> impl Iterator<Item = (UVec3, &Voxel)> + '_ {
        let (nx, ny) = (self.dims.x as usize, self.dims.y as usize);
        let addressable = nx * ny * self.dims.z as usize;
        self.voxels[..addressable].iter().enumerate().map(move |(i, v)| {
            let x = i % nx;
            let y = (i / nx) % ny;
            let z = i / (nx * ny);
            (UVec3::new(x as u32, y as u32, z as u32), v)
        })
    }

    /// Coordinates of every occupied cell.
    pub fn occupied_cells(&self) -> impl Iterator<Item = UVec3> + '_ {
        self.cells().filter(|(_, v)| v.occupied).map(|(c, _)| c)
    }

    /// Light reaching the ground, as `(x, y, light_in)` per ground cell.
    pub fn ground_light(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        let (nx, ny) = (self.dims.x as usize, self.dims.y as usize);
        self.voxels[..nx * ny]
            .iter()
            .enumerate()
            .map(move |(i, v)| (i % nx, i / nx, v.light_in))
    }

    /// Re-seeds the top of the canopy and propagates light downward.
    ///
    /// Only layers `0..=max_z` are recomputed; cells above keep the
    /// unattenuated light they were last given.
    pub fn update_light(&mut self) {
        let (nx, ny) = (self.dims.x as usize, self.dims.y as usize);
        let top = self.max_z.min(self.dims.z as usize - 1);

        let seed = top + 1;
        let start = self.start_light;
        for y in 0..ny {
            for x in 0..nx {
                let i = self.index(x, y, seed);
                let voxel = &mut self.voxels[i];
                voxel.directional_in = start;
                voxel.directional_out = start;
                voxel.light_in = start.iter().sum();
                voxel.light_out = voxel.light_in;
            }
        }

        for z in (0..=top).rev() {
            for y in 0..ny {
                for x in 0..nx {
                    let mut incoming = [0.0; LightDirection::COUNT];
                    for dir in LightDirection::ALL {
                        let (dx, dy) = dir.source_offset();
                        let sx = wrap_index(x, dx, nx);
                        let sy = wrap_index(y, dy, ny);
                        incoming[dir.index()] =
                            self.voxels[self.index(sx, sy, z + 1)].directional_out[dir.index()];
                    }
                    let i = self.index(x, y, z);
                    self.voxels[i].set_light(incoming);
                }
            }
        }
    }
}

#[inline]
fn wrap_index(i: usize, offset: i32, len: usize) -> usize {
    (i as i64 + i64::from(offset)).rem_euclid(len as i64) as usize
}

fn cells_along(extent: f32, cell_size: f32) -> u32 {
    (extent / cell_size - CELL_COUNT_TOLERANCE).ceil().max(0.0) as u32
}

//! Procedural obstacle map generation
//!
//! Maps are built from blue-noise scatter points. Each point seeds either a
//! river (a biased random walk) or an obstacle blob (a bounded flood). A map
//! is only published once every free cell is reachable from every other free
//! cell through 4-neighbour steps; a map that fails the check is discarded
//! and generation starts over.
//!
//! Free cells are 4-connected exactly when no 8-connected patch of terrain
//! (the map edge included) encloses a hole. Every river and blob is therefore
//! grown as its own patch: it stays off the edge ring, keeps a free cell
//! between itself and older terrain, and never closes a loop around free
//! cells. With that, almost every pass passes the connectivity check.

use std::collections::{HashSet, VecDeque};
use std::f64::consts::{SQRT_2, TAU};

use bytes::Bytes;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

/// Contents of a single map cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cell {
    Free = 0,
    Vehicle = 1,
    River = 2,
    Obstacle = 3,
}

const NEIGHBORS_4: [(i64, i64); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Compass headings for river walks, clockwise from north
const COMPASS: [(i64, i64); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Heading changes a river may take when it turns, in 45 degree steps
const TURN_OFFSETS: [i64; 5] = [0, -1, 1, -2, 2];
/// Straight ahead dominates; diagonal and orthogonal neighbours share the rest
const TURN_WEIGHTS: [u32; 5] = [6, 2, 2, 2, 2];

/// Candidate points tried around an active sample before it is retired
const POISSON_ATTEMPTS: usize = 30;

/// Fixed-size 2D grid of cells stored row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl Grid {
    /// Create a grid with every cell free
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::Free; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < i64::from(self.width) && y < i64::from(self.height)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Read a cell; out-of-bounds coordinates read as obstacles
    pub fn get(&self, x: i64, y: i64) -> Cell {
        if self.in_bounds(x, y) {
            self.cells[self.index(x as u32, y as u32)]
        } else {
            Cell::Obstacle
        }
    }

    /// Write a cell; out-of-bounds writes are ignored
    pub fn set(&mut self, x: i64, y: i64, cell: Cell) {
        if self.in_bounds(x, y) {
            let idx = self.index(x as u32, y as u32);
            self.cells[idx] = cell;
        }
    }

    /// Reset every cell to free
    pub fn clear(&mut self) {
        self.cells.fill(Cell::Free);
    }

    pub fn count(&self, cell: Cell) -> usize {
        self.cells.iter().filter(|c| **c == cell).count()
    }

    /// True when the square of half-width `radius` centred on (x, y) lies
    /// inside the grid and contains only free cells.
    pub fn footprint_clear(&self, x: i64, y: i64, radius: u32) -> bool {
        let r = i64::from(radius);
        if !self.in_bounds(x - r, y - r) || !self.in_bounds(x + r, y + r) {
            return false;
        }
        (y - r..=y + r).all(|cy| (x - r..=x + r).all(|cx| self.get(cx, cy) == Cell::Free))
    }

    /// Write `cell` over the footprint square centred on (x, y)
    pub fn mark_footprint(&mut self, x: i64, y: i64, radius: u32, cell: Cell) {
        let r = i64::from(radius);
        for cy in y - r..=y + r {
            for cx in x - r..=x + r {
                self.set(cx, cy, cell);
            }
        }
    }

    /// Flattened row-major byte buffer for transmission
    pub fn to_bytes(&self) -> Bytes {
        self.cells.iter().map(|c| *c as u8).collect::<Vec<u8>>().into()
    }

    /// Number of free cells reachable from the first free cell (row-major)
    /// through 4-neighbour steps over free cells.
    pub fn reachable_free_cells(&self) -> usize {
        let Some(start) = self.cells.iter().position(|c| *c == Cell::Free) else {
            return 0;
        };

        let width = self.width as usize;
        let mut seen = vec![false; self.cells.len()];
        let mut queue = VecDeque::new();
        seen[start] = true;
        queue.push_back(start);
        let mut reached = 0;

        while let Some(idx) = queue.pop_front() {
            reached += 1;
            let x = (idx % width) as i64;
            let y = (idx / width) as i64;
            for (dx, dy) in NEIGHBORS_4 {
                let (nx, ny) = (x + dx, y + dy);
                if !self.in_bounds(nx, ny) {
                    continue;
                }
                let n = self.index(nx as u32, ny as u32);
                if !seen[n] && self.cells[n] == Cell::Free {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }

        reached
    }

    /// The connectivity invariant: all free cells form one region.
    ///
    /// A grid with no free cells at all does not qualify.
    pub fn is_connected(&self) -> bool {
        let free = self.count(Cell::Free);
        free > 0 && self.reachable_free_cells() == free
    }
}

/// Tunables for map generation
#[derive(Debug, Clone)]
pub struct MapParams {
    pub width: u32,
    pub height: u32,
    /// Minimum distance between scatter points
    pub min_seed_distance: f64,
    /// Chance that a scatter point seeds a river instead of a blob
    pub river_probability: f64,
    /// Cell budget range for tree-shaped blobs
    pub tree_cells: (u32, u32),
    /// Radius range for disc-shaped blobs
    pub disc_radius: (f64, f64),
    /// Planned step range for river walks
    pub river_steps: (u32, u32),
    /// Steps between heading changes on a river walk
    pub river_turn_interval: u32,
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            width: 1542,
            height: 512,
            min_seed_distance: 24.0,
            river_probability: 0.3,
            tree_cells: (12, 60),
            disc_radius: (2.0, 6.0),
            river_steps: (20, 90),
            river_turn_interval: 5,
        }
    }
}

/// What a scatter point grows into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeedKind {
    River,
    Blob,
}

/// A scatter point tagged with its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Seed {
    pub x: u32,
    pub y: u32,
    pub kind: SeedKind,
}

/// Builds obstacle maps that satisfy the connectivity invariant
pub struct MapGenerator {
    params: MapParams,
}

impl MapGenerator {
    pub fn new(params: MapParams) -> Self {
        Self { params }
    }

    /// Generate maps until one has a single connected free region.
    ///
    /// There is no retry limit; parameters that can never produce a connected
    /// map keep this spinning, which surfaces as a server that never finishes
    /// starting.
    pub fn generate<R: Rng>(&self, rng: &mut R) -> Grid {
        let mut grid = Grid::new(self.params.width, self.params.height);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.populate(&mut grid, rng);
            if grid.is_connected() {
                info!(
                    attempt,
                    width = grid.width(),
                    height = grid.height(),
                    rivers = grid.count(Cell::River),
                    obstacles = grid.count(Cell::Obstacle),
                    "Map generated"
                );
                return grid;
            }
            warn!(attempt, "Generated map has isolated free cells, regenerating");
        }
    }

    /// One generation pass over a cleared grid. No connectivity check.
    pub fn populate<R: Rng>(&self, grid: &mut Grid, rng: &mut R) {
        grid.clear();

        let mut seeds: Vec<Seed> = poisson_disc(
            self.params.width,
            self.params.height,
            self.params.min_seed_distance,
            rng,
        )
        .into_iter()
        .map(|(x, y)| Seed {
            x,
            y,
            kind: if rng.gen_bool(self.params.river_probability) {
                SeedKind::River
            } else {
                SeedKind::Blob
            },
        })
        .collect();
        seeds.sort();

        debug!(seeds = seeds.len(), "Scatter points sampled");

        for seed in seeds {
            match seed.kind {
                SeedKind::River => self.carve_river(grid, seed, rng),
                SeedKind::Blob => self.grow_blob(grid, seed, rng),
            }
        }
    }

    fn grow_blob<R: Rng>(&self, grid: &mut Grid, seed: Seed, rng: &mut R) {
        let region = if rng.gen_bool(0.5) {
            let (lo, hi) = self.params.tree_cells;
            let budget = rng.gen_range(lo..=hi.max(lo)) as usize;
            tree_region(grid, seed, budget, rng)
        } else {
            let (lo, hi) = self.params.disc_radius;
            let radius = if hi > lo { rng.gen_range(lo..hi) } else { lo };
            disc_region(grid, seed, radius)
        };

        if let Some(cells) = region {
            for (x, y) in cells {
                grid.set(x, y, Cell::Obstacle);
            }
        }
    }

    fn carve_river<R: Rng>(&self, grid: &mut Grid, seed: Seed, rng: &mut R) {
        let (lo, hi) = self.params.river_steps;
        let planned = rng.gen_range(lo..=hi.max(lo));
        let interval = self.params.river_turn_interval.max(1);
        let turns = match WeightedIndex::new(TURN_WEIGHTS) {
            Ok(dist) => dist,
            Err(_) => return,
        };

        let mut heading = rng.gen_range(0..COMPASS.len());
        let (mut x, mut y) = (i64::from(seed.x), i64::from(seed.y));
        let mut carved: Vec<(i64, i64)> = Vec::with_capacity(planned as usize);

        for step in 0..planned {
            if step > 0 {
                if step % interval == 0 {
                    let offset = TURN_OFFSETS[turns.sample(rng)];
                    heading = (heading as i64 + offset).rem_euclid(COMPASS.len() as i64) as usize;
                }
                let (dx, dy) = COMPASS[heading];
                x += dx;
                y += dy;
            }

            // The two previous cells of the walk may touch the new one; anything
            // older would let the river curl shut around free cells.
            let recent = &carved[carved.len().saturating_sub(2)..];
            if !clear_of_terrain(grid, x, y, recent) {
                if (carved.len() as u32) * 2 < planned {
                    for (cx, cy) in carved {
                        grid.set(cx, cy, Cell::Free);
                    }
                }
                return;
            }

            grid.set(x, y, Cell::River);
            carved.push((x, y));
        }
    }
}

/// What surrounds a candidate blob cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surroundings {
    Clear,
    /// On the edge ring or next to non-river terrain; skipped
    Blocked,
    /// Next to a river; the whole blob is abandoned
    River,
}

/// True when (x, y) lies off the edge ring and its 3x3 neighbourhood holds
/// only free cells, not counting the cells in `ignore`.
fn clear_of_terrain(grid: &Grid, x: i64, y: i64, ignore: &[(i64, i64)]) -> bool {
    let (w, h) = (i64::from(grid.width), i64::from(grid.height));
    if x < 1 || y < 1 || x >= w - 1 || y >= h - 1 {
        return false;
    }
    (y - 1..=y + 1).all(|ny| {
        (x - 1..=x + 1).all(|nx| grid.get(nx, ny) == Cell::Free || ignore.contains(&(nx, ny)))
    })
}

fn surroundings(grid: &Grid, x: i64, y: i64) -> Surroundings {
    let near_river = (y - 1..=y + 1)
        .any(|ny| (x - 1..=x + 1).any(|nx| grid.in_bounds(nx, ny) && grid.get(nx, ny) == Cell::River));
    if near_river {
        Surroundings::River
    } else if clear_of_terrain(grid, x, y, &[]) {
        Surroundings::Clear
    } else {
        Surroundings::Blocked
    }
}

/// True when `cells` wall off free cells from the rest of the map.
///
/// Floods the bounding box (grown by one cell) from its corner through every
/// cell not in `cells`; anything left over is a pocket.
fn encloses_cells(cells: &[(i64, i64)]) -> bool {
    let Some(&(first_x, first_y)) = cells.first() else {
        return false;
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first_x, first_y, first_x, first_y);
    for &(x, y) in cells {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    let (min_x, min_y, max_x, max_y) = (min_x - 1, min_y - 1, max_x + 1, max_y + 1);

    let wall: HashSet<(i64, i64)> = cells.iter().copied().collect();
    let open = ((max_x - min_x + 1) * (max_y - min_y + 1)) as usize - wall.len();

    let start = (min_x, min_y);
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in NEIGHBORS_4 {
            let next = (x + dx, y + dy);
            if next.0 < min_x || next.1 < min_y || next.0 > max_x || next.1 > max_y {
                continue;
            }
            if !wall.contains(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    seen.len() < open
}

/// Breadth-first growth that stops after `budget` cells.
///
/// Neighbour order is shuffled per cell so the ragged outer layer differs
/// between blobs. Returns `None` when the growth would touch a river or
/// wall in a pocket of free cells.
fn tree_region<R: Rng>(
    grid: &Grid,
    seed: Seed,
    budget: usize,
    rng: &mut R,
) -> Option<Vec<(i64, i64)>> {
    let origin = (i64::from(seed.x), i64::from(seed.y));
    let mut visited = HashSet::from([origin]);
    let mut queue = VecDeque::from([origin]);
    let mut cells = Vec::with_capacity(budget);

    while let Some((x, y)) = queue.pop_front() {
        if cells.len() >= budget {
            break;
        }
        match surroundings(grid, x, y) {
            Surroundings::River => return None,
            Surroundings::Blocked => continue,
            Surroundings::Clear => cells.push((x, y)),
        }

        let mut neighbors = NEIGHBORS_4;
        neighbors.shuffle(rng);
        for (dx, dy) in neighbors {
            let next = (x + dx, y + dy);
            if grid.in_bounds(next.0, next.1) && visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    (!encloses_cells(&cells)).then_some(cells)
}

/// Breadth-first growth bounded by Euclidean distance from the seed.
///
/// Returns `None` when the disc would touch a river or wall in a pocket.
fn disc_region(grid: &Grid, seed: Seed, radius: f64) -> Option<Vec<(i64, i64)>> {
    let origin = (i64::from(seed.x), i64::from(seed.y));
    let limit = radius * radius;
    let mut visited = HashSet::from([origin]);
    let mut queue = VecDeque::from([origin]);
    let mut cells = Vec::new();

    while let Some((x, y)) = queue.pop_front() {
        match surroundings(grid, x, y) {
            Surroundings::River => return None,
            Surroundings::Blocked => continue,
            Surroundings::Clear => cells.push((x, y)),
        }

        for (dx, dy) in NEIGHBORS_4 {
            let (nx, ny) = (x + dx, y + dy);
            let (ox, oy) = ((nx - origin.0) as f64, (ny - origin.1) as f64);
            if grid.in_bounds(nx, ny) && ox * ox + oy * oy <= limit && visited.insert((nx, ny)) {
                queue.push_back((nx, ny));
            }
        }
    }

    (!encloses_cells(&cells)).then_some(cells)
}

/// Blue-noise scatter over a `width` x `height` area (Bridson's algorithm).
///
/// Every returned point is at least `radius` away from every other.
pub fn poisson_disc<R: Rng>(width: u32, height: u32, radius: f64, rng: &mut R) -> Vec<(u32, u32)> {
    if width == 0 || height == 0 || radius <= 0.0 {
        return Vec::new();
    }

    let (w, h) = (f64::from(width), f64::from(height));
    let cell = radius / SQRT_2;
    let cols = (w / cell).ceil() as usize;
    let rows = (h / cell).ceil() as usize;
    let mut lattice: Vec<Option<usize>> = vec![None; cols * rows];
    let lattice_pos = |x: f64, y: f64| (((x / cell) as usize).min(cols - 1), ((y / cell) as usize).min(rows - 1));

    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut active: Vec<usize> = Vec::new();

    let first = (rng.gen_range(0.0..w), rng.gen_range(0.0..h));
    let (c, r) = lattice_pos(first.0, first.1);
    lattice[r * cols + c] = Some(0);
    points.push(first);
    active.push(0);

    while !active.is_empty() {
        let slot = rng.gen_range(0..active.len());
        let (px, py) = points[active[slot]];
        let mut placed = false;

        for _ in 0..POISSON_ATTEMPTS {
            let angle = rng.gen_range(0.0..TAU);
            let dist = rng.gen_range(radius..2.0 * radius);
            let (cx, cy) = (px + angle.cos() * dist, py + angle.sin() * dist);
            if cx < 0.0 || cy < 0.0 || cx >= w || cy >= h {
                continue;
            }

            let (col, row) = lattice_pos(cx, cy);
            let far_enough = (row.saturating_sub(2)..(row + 3).min(rows)).all(|nr| {
                (col.saturating_sub(2)..(col + 3).min(cols)).all(|nc| match lattice[nr * cols + nc] {
                    Some(i) => {
                        let (qx, qy) = points[i];
                        (qx - cx).powi(2) + (qy - cy).powi(2) >= radius * radius
                    }
                    None => true,
                })
            });
            if !far_enough {
                continue;
            }

            lattice[row * cols + col] = Some(points.len());
            active.push(points.len());
            points.push((cx, cy));
            placed = true;
            break;
        }

        if !placed {
            active.swap_remove(slot);
        }
    }

    points
        .into_iter()
        .map(|(x, y)| ((x as u32).min(width - 1), (y as u32).min(height - 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn small_params() -> MapParams {
        MapParams {
            width: 160,
            height: 96,
            min_seed_distance: 16.0,
            river_steps: (10, 40),
            ..MapParams::default()
        }
    }

    #[test]
    fn generated_maps_are_connected() {
        let generator = MapGenerator::new(small_params());
        for seed in 0..5 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let grid = generator.generate(&mut rng);
            let free = grid.count(Cell::Free);
            assert!(free > 0);
            assert_eq!(grid.reachable_free_cells(), free);
            assert_eq!(grid.count(Cell::Vehicle), 0);
        }
    }

    #[test]
    fn generated_maps_contain_terrain() {
        let generator = MapGenerator::new(small_params());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let grid = generator.generate(&mut rng);
        assert!(grid.count(Cell::Obstacle) > 0);
        assert!(grid.count(Cell::Free) > grid.count(Cell::Obstacle) + grid.count(Cell::River));
    }

    #[test]
    fn same_seed_produces_same_map() {
        let generator = MapGenerator::new(small_params());
        let a = generator.generate(&mut ChaCha8Rng::seed_from_u64(42));
        let b = generator.generate(&mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn default_size_map_connects_on_first_pass() {
        let generator = MapGenerator::new(MapParams::default());
        let mut grid = Grid::new(1542, 512);
        for seed in 0..2 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            generator.populate(&mut grid, &mut rng);
            assert!(grid.count(Cell::River) > 0);
            assert!(grid.count(Cell::Obstacle) > 0);
            assert_eq!(grid.reachable_free_cells(), grid.count(Cell::Free));
        }
    }

    #[test]
    fn terrain_keeps_off_the_edge_ring() {
        let generator = MapGenerator::new(small_params());
        let mut grid = Grid::new(160, 96);
        generator.populate(&mut grid, &mut ChaCha8Rng::seed_from_u64(13));

        for x in 0..160 {
            assert_eq!(grid.get(x, 0), Cell::Free);
            assert_eq!(grid.get(x, 95), Cell::Free);
        }
        for y in 0..96 {
            assert_eq!(grid.get(0, y), Cell::Free);
            assert_eq!(grid.get(159, y), Cell::Free);
        }
    }

    #[test]
    fn river_stops_short_of_existing_terrain() {
        let params = MapParams {
            river_steps: (6, 6),
            ..MapParams::default()
        };
        let generator = MapGenerator::new(params);
        let mut grid = Grid::new(21, 21);
        // Rock sits diagonally next to the start, so no step is clear
        grid.set(11, 11, Cell::Obstacle);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        generator.carve_river(&mut grid, Seed { x: 10, y: 10, kind: SeedKind::River }, &mut rng);
        assert_eq!(grid.count(Cell::River), 0);
    }

    #[test]
    fn blob_skips_cells_next_to_other_terrain() {
        let mut grid = Grid::new(30, 30);
        grid.set(18, 15, Cell::Obstacle);
        let seed = Seed { x: 15, y: 15, kind: SeedKind::Blob };
        let cells = disc_region(&grid, seed, 4.0).unwrap();
        assert!(!cells.is_empty());
        for (x, y) in &cells {
            assert!((x - 18).abs() > 1 || (y - 15).abs() > 1);
        }
    }

    #[test]
    fn ring_shaped_region_is_detected() {
        let ring: Vec<(i64, i64)> = NEIGHBORS_4.iter().map(|(dx, dy)| (5 + dx, 5 + dy)).collect();
        assert!(encloses_cells(&ring));

        let bar: Vec<(i64, i64)> = (0..5).map(|x| (x, 2)).collect();
        assert!(!encloses_cells(&bar));
        assert!(!encloses_cells(&[]));
    }

    #[test]
    fn enclosed_pocket_breaks_connectivity() {
        let mut grid = Grid::new(10, 10);
        assert!(grid.is_connected());

        // Ring of rock around (5, 5)
        for (dx, dy) in NEIGHBORS_4 {
            grid.set(5 + dx, 5 + dy, Cell::Obstacle);
        }
        assert!(!grid.is_connected());
        assert_eq!(grid.reachable_free_cells(), grid.count(Cell::Free) - 1);
    }

    #[test]
    fn fully_blocked_grid_is_not_connected() {
        let mut grid = Grid::new(4, 4);
        grid.mark_footprint(1, 1, 2, Cell::Obstacle);
        grid.mark_footprint(2, 2, 2, Cell::Obstacle);
        assert_eq!(grid.count(Cell::Free), 0);
        assert!(!grid.is_connected());
    }

    #[test]
    fn poisson_points_respect_minimum_distance() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let radius = 10.0;
        let points = poisson_disc(200, 120, radius, &mut rng);
        assert!(points.len() > 20);

        for (i, a) in points.iter().enumerate() {
            assert!(a.0 < 200 && a.1 < 120);
            for b in &points[i + 1..] {
                let dx = f64::from(a.0) - f64::from(b.0);
                let dy = f64::from(a.1) - f64::from(b.1);
                // Truncation to whole cells can shave just under two cells off
                assert!((dx * dx + dy * dy).sqrt() > radius - 2.0);
            }
        }
    }

    #[test]
    fn blob_growth_aborts_next_to_river() {
        let mut grid = Grid::new(20, 20);
        grid.set(11, 10, Cell::River);
        let seed = Seed { x: 10, y: 10, kind: SeedKind::Blob };

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(tree_region(&grid, seed, 30, &mut rng).is_none());
        assert!(disc_region(&grid, seed, 4.0).is_none());
    }

    #[test]
    fn disc_region_stays_within_radius() {
        let grid = Grid::new(30, 30);
        let seed = Seed { x: 15, y: 15, kind: SeedKind::Blob };
        let cells = disc_region(&grid, seed, 3.0).unwrap();
        assert!(cells.contains(&(15, 15)));
        assert!(cells.contains(&(18, 15)));
        assert!(!cells.contains(&(18, 16)));
        assert!(cells.iter().all(|(x, y)| (x - 15).pow(2) + (y - 15).pow(2) <= 9));
    }

    #[test]
    fn tree_region_respects_budget() {
        let grid = Grid::new(40, 40);
        let seed = Seed { x: 20, y: 20, kind: SeedKind::Blob };
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let cells = tree_region(&grid, seed, 25, &mut rng).unwrap();
        assert_eq!(cells.len(), 25);
        assert_eq!(cells[0], (20, 20));
    }

    #[test]
    fn short_river_walk_is_rolled_back() {
        let params = MapParams {
            width: 5,
            height: 5,
            river_steps: (60, 60),
            ..MapParams::default()
        };
        let generator = MapGenerator::new(params);
        let mut grid = Grid::new(5, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        // The first heading change comes after 5 steps, so the walk reaches
        // the edge ring of the 5x5 grid after at most 2 cells, far short of
        // half of 60.
        generator.carve_river(&mut grid, Seed { x: 2, y: 2, kind: SeedKind::River }, &mut rng);
        assert_eq!(grid.count(Cell::River), 0);
    }

    #[test]
    fn long_river_walk_is_kept() {
        let params = MapParams {
            river_steps: (4, 4),
            ..MapParams::default()
        };
        let generator = MapGenerator::new(params);
        let mut grid = Grid::new(21, 21);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        // Four straight steps from the centre always fit
        generator.carve_river(&mut grid, Seed { x: 10, y: 10, kind: SeedKind::River }, &mut rng);
        assert_eq!(grid.count(Cell::River), 4);
        assert_eq!(grid.get(10, 10), Cell::River);
    }

    #[test]
    fn footprint_checks_bounds_and_occupancy() {
        let mut grid = Grid::new(10, 10);
        assert!(grid.footprint_clear(1, 1, 1));
        assert!(!grid.footprint_clear(0, 1, 1));
        assert!(!grid.footprint_clear(8, 9, 1));

        grid.mark_footprint(5, 5, 1, Cell::Vehicle);
        assert_eq!(grid.count(Cell::Vehicle), 9);
        assert!(!grid.footprint_clear(6, 6, 1));
        assert!(grid.footprint_clear(2, 2, 1));

        grid.mark_footprint(5, 5, 1, Cell::Free);
        assert_eq!(grid.count(Cell::Free), 100);
    }

    #[test]
    fn byte_buffer_is_row_major() {
        let mut grid = Grid::new(3, 2);
        grid.set(2, 0, Cell::River);
        grid.set(0, 1, Cell::Obstacle);
        assert_eq!(&grid.to_bytes()[..], &[0, 0, 2, 3, 0, 0]);
    }
}

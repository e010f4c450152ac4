//! Conway's Game of Life frame source
//!
//! The arena keeps two grids. A tick reads the active grid, writes the other
//! one and flips the active index. Cells outside the grid count as dead.

use image::{Rgba, RgbaImage};
use rand::Rng;

/// Colour of a live cell
pub const ALIVE: Rgba<u8> = Rgba([107, 142, 35, 255]);
/// Colour of a dead cell
pub const DEAD: Rgba<u8> = Rgba([241, 241, 212, 255]);

/// One generation of cells, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl Grid {
    /// All-dead grid
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Cell state; out-of-range coordinates are dead
    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.cells[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, alive: bool) {
        if x < self.width && y < self.height {
            self.cells[y as usize * self.width as usize + x as usize] = alive;
        }
    }

    pub fn population(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    fn live_neighbors(&self, x: i64, y: i64) -> usize {
        let mut count = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if (dx, dy) != (0, 0) && self.get(x + dx, y + dy) {
                    count += 1;
                }
            }
        }
        count
    }
}

/// Double-buffered simulation
#[derive(Debug, Clone)]
pub struct Arena {
    grids: [Grid; 2],
    active: usize,
    generation: u64,
}

impl Arena {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            grids: [Grid::new(width, height), Grid::new(width, height)],
            active: 0,
            generation: 0,
        }
    }

    /// Arena whose first generation is `grid`
    pub fn from_grid(grid: Grid) -> Self {
        let spare = Grid::new(grid.width, grid.height);
        Self {
            grids: [grid, spare],
            active: 0,
            generation: 0,
        }
    }

    /// Fill the active grid with coin flips
    pub fn seed<R: Rng>(&mut self, rng: &mut R) {
        for cell in self.grids[self.active].cells.iter_mut() {
            *cell = rng.gen_bool(0.5);
        }
        self.generation = 0;
    }

    /// Current generation
    pub fn grid(&self) -> &Grid {
        &self.grids[self.active]
    }

    /// Index of the active buffer, 0 or 1
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Advance one generation (B3/S23)
    pub fn step(&mut self) {
        let next = 1 - self.active;
        let [a, b] = &mut self.grids;
        let (current, target) = if self.active == 0 { (&*a, b) } else { (&*b, a) };

        for y in 0..current.height as i64 {
            for x in 0..current.width as i64 {
                let n = current.live_neighbors(x, y);
                let alive = matches!((current.get(x, y), n), (true, 2) | (true, 3) | (false, 3));
                target.cells[y as usize * current.width as usize + x as usize] = alive;
            }
        }

        self.active = next;
        self.generation += 1;
    }

    /// Paint the active grid into `image`, resizing it if needed
    pub fn render_into(&self, image: &mut RgbaImage) {
        let grid = self.grid();
        if image.width() != grid.width || image.height() != grid.height {
            *image = RgbaImage::new(grid.width, grid.height);
        }
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = if grid.get(x as i64, y as i64) { ALIVE } else { DEAD };
        }
    }

    /// Paint the active grid into a new image
    pub fn render(&self) -> RgbaImage {
        let mut image = RgbaImage::new(self.grid().width, self.grid().height);
        self.render_into(&mut image);
        image
    }
}

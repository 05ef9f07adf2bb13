//! Flat Barnes–Hut quadtree over body positions.
//!
//! Cells live in one arena and each cell owns a contiguous run of `order`, so
//! the bodies below any cell, leaf or branch, are a plain slice. Siblings are
//! stored next to each other, which lets a branch name its children by range.

use std::ops::Range;

use emath::{Vec2, vec2};

const LEAF_CAPACITY: usize = 8;
const MAX_DEPTH: u32 = 12;

pub(super) const ROOT: usize = 0;

/// Axis-aligned square given by its centre and half side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) struct Square {
    pub(super) center: Vec2,
    pub(super) half_side: f32,
}

impl Square {
    fn enclosing(points: &[Vec2]) -> Option<Self> {
        let first = *points.first()?;
        if !points.iter().all(|point| point.is_finite()) {
            return None;
        }

        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), point| (min.min(*point), max.max(*point)));
        let span = max - min;
        Some(Self {
            center: (min + max) * 0.5,
            half_side: span.x.max(span.y) * 0.5 + 1.0,
        })
    }

    pub(super) fn contains(self, point: Vec2) -> bool {
        (point.x - self.center.x).abs() <= self.half_side
            && (point.y - self.center.y).abs() <= self.half_side
    }

    pub(super) fn side(self) -> f32 {
        self.half_side * 2.0
    }

    /// Bit 0 set for the right half, bit 1 for the lower half.
    fn quadrant_of(self, point: Vec2) -> usize {
        usize::from(point.x >= self.center.x) | (usize::from(point.y >= self.center.y) << 1)
    }

    fn quadrant(self, quadrant: usize) -> Self {
        let half_side = self.half_side * 0.5;
        let offset = |positive: bool| if positive { half_side } else { -half_side };
        Self {
            center: self.center + vec2(offset(quadrant & 1 != 0), offset(quadrant & 2 != 0)),
            half_side,
        }
    }
}

pub(super) struct Cell {
    pub(super) square: Square,
    /// Mean position of the bodies below this cell.
    pub(super) mass_center: Vec2,
    bodies: Range<usize>,
    children: Range<usize>,
}

impl Cell {
    pub(super) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of bodies below this cell; every body weighs the same.
    pub(super) fn mass(&self) -> f32 {
        self.bodies.len() as f32
    }

    pub(super) fn children(&self) -> Range<usize> {
        self.children.clone()
    }
}

pub(super) struct Quadtree {
    cells: Vec<Cell>,
    order: Vec<usize>,
}

impl Quadtree {
    /// Returns `None` for an empty or non-finite body set.
    pub(super) fn build(positions: &[Vec2]) -> Option<Self> {
        let square = Square::enclosing(positions)?;
        let mut tree = Self {
            cells: Vec::new(),
            order: (0..positions.len()).collect(),
        };
        tree.push_cell(square, 0..positions.len(), positions);

        let mut unsplit = vec![(ROOT, 0)];
        while let Some((cell, depth)) = unsplit.pop() {
            if depth >= MAX_DEPTH || tree.cells[cell].bodies.len() <= LEAF_CAPACITY {
                continue;
            }
            let children = tree.split(cell, positions);
            unsplit.extend(children.map(|child| (child, depth + 1)));
        }
        Some(tree)
    }

    pub(super) fn cell(&self, index: usize) -> &Cell {
        &self.cells[index]
    }

    pub(super) fn bodies(&self, cell: &Cell) -> &[usize] {
        &self.order[cell.bodies.clone()]
    }

    fn push_cell(&mut self, square: Square, bodies: Range<usize>, positions: &[Vec2]) {
        let sum = self.order[bodies.clone()]
            .iter()
            .fold(Vec2::ZERO, |sum, &index| sum + positions[index]);
        let mass_center = if bodies.is_empty() {
            square.center
        } else {
            sum / bodies.len() as f32
        };

        self.cells.push(Cell {
            square,
            mass_center,
            bodies,
            children: 0..0,
        });
    }

    /// Sorts the cell's bodies by quadrant and gives each non-empty quadrant a
    /// child cell. Bodies that all share one quadrant stay in a leaf, since
    /// further splits could never tell them apart.
    fn split(&mut self, cell: usize, positions: &[Vec2]) -> Range<usize> {
        let Cell { square, bodies, .. } = &self.cells[cell];
        let (square, bodies) = (*square, bodies.clone());

        let slice = &mut self.order[bodies.clone()];
        slice.sort_by_key(|&index| square.quadrant_of(positions[index]));

        let mut counts = [0usize; 4];
        for &index in slice.iter() {
            counts[square.quadrant_of(positions[index])] += 1;
        }
        if counts.iter().filter(|&&count| count > 0).count() <= 1 {
            return 0..0;
        }

        let first_child = self.cells.len();
        let mut start = bodies.start;
        for (quadrant, count) in counts.into_iter().enumerate() {
            if count == 0 {
                continue;
            }
            self.push_cell(square.quadrant(quadrant), start..start + count, positions);
            start += count;
        }

        let children = first_child..self.cells.len();
        self.cells[cell].children = children.clone();
        children
    }
}

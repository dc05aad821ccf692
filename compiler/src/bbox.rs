// bbox.rs: Offsets, bounding boxes and the shape lattice
//
// A `BoundingBox` is a per-dimension half-open range [lb, ub) relative to the
// iteration origin. Boxes join by hull; the empty box is the join identity.
// `Shape` adds the "not yet observed" element on top: `Unknown` is distinct
// from `Known(empty)`, which means "computed, but never read".
//
// Preconditions: boxes and offsets combined in one operation share a rank,
//   and their coordinates lie within `MAX_COORD` (checked at load and by V1).
// Postconditions: `Shape::grow` never shrinks the stored box.
// Failure modes: none (rank mismatches are debug assertions).
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest coordinate magnitude accepted in offsets and declared boxes.
/// Keeps every sum the passes form comfortably inside `i64`.
pub const MAX_COORD: i64 = i32::MAX as i64;

fn coord_in_range(v: i64) -> bool {
    (-MAX_COORD..=MAX_COORD).contains(&v)
}

// ── Offset ──────────────────────────────────────────────────────────────────

/// Static integer offset vector of an access, relative to the current point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset(pub Vec<i64>);

impl Offset {
    pub fn zeros(rank: usize) -> Self {
        Offset(vec![0; rank])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Every component lies within `±MAX_COORD`.
    pub fn in_range(&self) -> bool {
        self.0.iter().all(|&v| coord_in_range(v))
    }

    /// Offset composition: nested offsets add component-wise.
    pub fn compose(&self, other: &Offset) -> Offset {
        debug_assert_eq!(self.rank(), other.rank());
        Offset(self.0.iter().zip(&other.0).map(|(a, b)| a + b).collect())
    }

    /// Copy with `delta` added along `axis`.
    pub fn shifted_along(&self, axis: usize, delta: i64) -> Offset {
        let mut out = self.clone();
        if let Some(v) = out.0.get_mut(axis) {
            *v += delta;
        }
        out
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

// ── Bounding box ────────────────────────────────────────────────────────────

/// Half-open integer box `[lb, ub)` per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lb: Vec<i64>,
    pub ub: Vec<i64>,
}

impl BoundingBox {
    pub fn new(lb: Vec<i64>, ub: Vec<i64>) -> Self {
        debug_assert_eq!(lb.len(), ub.len());
        BoundingBox { lb, ub }
    }

    /// Build from `(lb, ub)` pairs, one per dimension.
    pub fn from_ranges(ranges: &[(i64, i64)]) -> Self {
        BoundingBox {
            lb: ranges.iter().map(|r| r.0).collect(),
            ub: ranges.iter().map(|r| r.1).collect(),
        }
    }

    /// The canonical empty box of a rank.
    pub fn empty(rank: usize) -> Self {
        BoundingBox {
            lb: vec![0; rank],
            ub: vec![0; rank],
        }
    }

    pub fn rank(&self) -> usize {
        self.lb.len()
    }

    /// Both bound vectors have `rank` entries and every bound lies within
    /// `±MAX_COORD`.
    pub fn is_well_formed(&self, rank: usize) -> bool {
        self.lb.len() == rank
            && self.ub.len() == rank
            && self.lb.iter().chain(&self.ub).all(|&v| coord_in_range(v))
    }

    pub fn is_empty(&self) -> bool {
        self.lb.iter().zip(&self.ub).any(|(l, u)| l >= u)
    }

    /// Number of points along `axis` (0 when empty along it).
    pub fn extent(&self, axis: usize) -> i64 {
        match (self.lb.get(axis), self.ub.get(axis)) {
            (Some(l), Some(u)) => (u - l).max(0),
            _ => 0,
        }
    }

    pub fn volume(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (0..self.rank()).map(|d| self.extent(d) as u64).product()
    }

    /// The box translated by `offset`. Empty stays (canonically) empty.
    pub fn shifted(&self, offset: &Offset) -> BoundingBox {
        debug_assert_eq!(self.rank(), offset.rank());
        if self.is_empty() {
            return BoundingBox::empty(self.rank());
        }
        BoundingBox {
            lb: self.lb.iter().zip(&offset.0).map(|(l, o)| l + o).collect(),
            ub: self.ub.iter().zip(&offset.0).map(|(u, o)| u + o).collect(),
        }
    }

    /// Least upper bound: the hull of both boxes, ignoring empty operands.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        debug_assert_eq!(self.rank(), other.rank());
        if self.is_empty() {
            return if other.is_empty() {
                BoundingBox::empty(self.rank())
            } else {
                other.clone()
            };
        }
        if other.is_empty() {
            return self.clone();
        }
        BoundingBox {
            lb: self.lb.iter().zip(&other.lb).map(|(a, b)| *a.min(b)).collect(),
            ub: self.ub.iter().zip(&other.ub).map(|(a, b)| *a.max(b)).collect(),
        }
    }

    /// True when every point of `other` lies in `self`.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        if other.is_empty() {
            return true;
        }
        if self.is_empty() {
            return false;
        }
        (0..self.rank()).all(|d| self.lb[d] <= other.lb[d] && other.ub[d] <= self.ub[d])
    }

    pub fn contains_point(&self, point: &[i64]) -> bool {
        point.len() == self.rank()
            && point
                .iter()
                .enumerate()
                .all(|(d, &p)| self.lb[d] <= p && p < self.ub[d])
    }

    /// Copy with the range along `axis` replaced.
    pub fn with_axis(&self, axis: usize, lb: i64, ub: i64) -> BoundingBox {
        let mut out = self.clone();
        out.lb[axis] = lb;
        out.ub[axis] = ub;
        out
    }

    /// All points in row-major order (last dimension fastest).
    pub fn points(&self) -> Points {
        Points::new(self.clone(), None)
    }

    /// Points stepping by `step` along `axis` starting at `lb[axis]`.
    pub fn points_with_step(&self, axis: usize, step: i64) -> Points {
        Points::new(self.clone(), Some((axis, step.max(1))))
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "empty");
        }
        write!(f, "[")?;
        for d in 0..self.rank() {
            if d > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", self.lb[d], self.ub[d])?;
        }
        write!(f, "]")
    }
}

/// Row-major point iterator over a box.
pub struct Points {
    bbox: BoundingBox,
    step: Option<(usize, i64)>,
    current: Option<Vec<i64>>,
}

impl Points {
    fn new(bbox: BoundingBox, step: Option<(usize, i64)>) -> Self {
        let current = if bbox.is_empty() {
            None
        } else {
            Some(bbox.lb.clone())
        };
        Points {
            bbox,
            step,
            current,
        }
    }

    fn stride(&self, dim: usize) -> i64 {
        match self.step {
            Some((axis, step)) if axis == dim => step,
            _ => 1,
        }
    }
}

impl Iterator for Points {
    type Item = Vec<i64>;

    fn next(&mut self) -> Option<Vec<i64>> {
        let point = self.current.take()?;
        let mut next = point.clone();
        let mut dim = next.len();
        while dim > 0 {
            dim -= 1;
            next[dim] += self.stride(dim);
            if next[dim] < self.bbox.ub[dim] {
                self.current = Some(next);
                return Some(point);
            }
            next[dim] = self.bbox.lb[dim];
        }
        Some(point)
    }
}

// ── Shape lattice ───────────────────────────────────────────────────────────

/// Analysis value attached to temporaries, buffers and apply regions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Shape {
    /// Not yet observed (⊥).
    #[default]
    Unknown,
    /// Observed; may be the empty box.
    Known(BoundingBox),
}

impl Shape {
    pub fn is_known(&self) -> bool {
        matches!(self, Shape::Known(_))
    }

    pub fn as_box(&self) -> Option<&BoundingBox> {
        match self {
            Shape::Known(b) => Some(b),
            Shape::Unknown => None,
        }
    }

    /// Join `bbox` into this shape. Returns true if the shape changed.
    pub fn grow(&mut self, bbox: &BoundingBox) -> bool {
        match self {
            Shape::Unknown => {
                let seeded = if bbox.is_empty() {
                    BoundingBox::empty(bbox.rank())
                } else {
                    bbox.clone()
                };
                *self = Shape::Known(seeded);
                true
            }
            Shape::Known(current) => {
                let joined = current.union(bbox);
                if joined == *current {
                    false
                } else {
                    *current = joined;
                    true
                }
            }
        }
    }

    /// Lattice join.
    pub fn join(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Shape::Unknown, s) | (s, Shape::Unknown) => s.clone(),
            (Shape::Known(a), Shape::Known(b)) => Shape::Known(a.union(b)),
        }
    }

    /// True if `self` is at least as large as `other` in the lattice order.
    pub fn covers(&self, other: &Shape) -> bool {
        match (self, other) {
            (_, Shape::Unknown) => true,
            (Shape::Unknown, Shape::Known(_)) => false,
            (Shape::Known(a), Shape::Known(b)) => a.contains(b),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Unknown => write!(f, "?"),
            Shape::Known(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b1(lb: i64, ub: i64) -> BoundingBox {
        BoundingBox::from_ranges(&[(lb, ub)])
    }

    #[test]
    fn shift_and_union() {
        let b = b1(0, 10);
        assert_eq!(b.shifted(&Offset(vec![-1])), b1(-1, 9));
        assert_eq!(b.union(&b.shifted(&Offset(vec![1]))), b1(0, 11));
    }

    #[test]
    fn empty_is_union_identity() {
        let e = BoundingBox::empty(1);
        assert!(e.is_empty());
        assert_eq!(e.union(&b1(2, 4)), b1(2, 4));
        assert_eq!(b1(2, 4).union(&e), b1(2, 4));
        assert!(b1(2, 4).contains(&e));
        assert!(!e.contains(&b1(2, 4)));
    }

    #[test]
    fn shifting_empty_stays_empty() {
        let e = BoundingBox::from_ranges(&[(5, 5)]);
        assert_eq!(e.shifted(&Offset(vec![3])), BoundingBox::empty(1));
    }

    #[test]
    fn unknown_differs_from_empty() {
        let unknown = Shape::Unknown;
        let empty = Shape::Known(BoundingBox::empty(2));
        assert_ne!(unknown, empty);
        assert!(empty.covers(&unknown));
        assert!(!unknown.covers(&empty));
    }

    #[test]
    fn grow_is_monotone() {
        let mut s = Shape::Unknown;
        assert!(s.grow(&b1(0, 4)));
        assert!(!s.grow(&b1(1, 3)));
        assert!(s.grow(&b1(-2, 1)));
        assert_eq!(s, Shape::Known(b1(-2, 4)));
    }

    #[test]
    fn points_row_major() {
        let b = BoundingBox::from_ranges(&[(0, 2), (5, 7)]);
        let pts: Vec<_> = b.points().collect();
        assert_eq!(
            pts,
            vec![vec![0, 5], vec![0, 6], vec![1, 5], vec![1, 6]]
        );
    }

    #[test]
    fn points_stepped() {
        let b = b1(0, 9);
        let pts: Vec<_> = b.points_with_step(0, 2).collect();
        assert_eq!(pts, vec![vec![0], vec![2], vec![4], vec![6], vec![8]]);
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", BoundingBox::from_ranges(&[(0, 10), (-1, 3)])), "[0:10, -1:3]");
        assert_eq!(format!("{}", BoundingBox::empty(3)), "empty");
        assert_eq!(format!("{}", Offset(vec![-1, 0])), "[-1, 0]");
    }

    #[test]
    fn well_formedness_checks_rank_and_magnitude() {
        assert!(b1(-3, 7).is_well_formed(1));
        assert!(!b1(-3, 7).is_well_formed(2));
        assert!(!BoundingBox { lb: vec![0], ub: vec![] }.is_well_formed(1));
        assert!(!b1(0, i64::MAX).is_well_formed(1));
        assert!(b1(-MAX_COORD, MAX_COORD).is_well_formed(1));
        assert!(Offset(vec![MAX_COORD, -MAX_COORD]).in_range());
        assert!(!Offset(vec![0, i64::MAX]).in_range());
    }
}

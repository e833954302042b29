//! Integer grid geometry.
//!
//! All placement data in records is stored in grid units; one lambda is
//! [`GRID_PER_LAMBDA`] grid units. Transforms are exact for Manhattan
//! orientations. Other angles are computed in `f64` and snapped outward.

use std::fmt;

/// Grid units per lambda.
pub const GRID_PER_LAMBDA: i64 = 400;

/// Largest coordinate magnitude a record may hold.
///
/// Placing a cell whose bounds reach this limit at an anchor that also
/// reaches it still fits in an `i64`; arithmetic beyond that saturates.
pub const MAX_COORD: i64 = 1 << 40;

/// Converts a lambda coordinate to the nearest grid coordinate.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn lambda_to_grid(lambda: f64) -> i64 {
    (lambda * GRID_PER_LAMBDA as f64).round() as i64
}

/// Converts a grid coordinate to lambda.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn grid_to_lambda(grid: i64) -> f64 {
    grid as f64 / GRID_PER_LAMBDA as f64
}

/// A point in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GridPoint {
    /// X coordinate.
    pub x: i64,
    /// Y coordinate.
    pub y: i64,
}

impl GridPoint {
    /// The origin.
    pub const ORIGIN: Self = Self { x: 0, y: 0 };

    /// Creates a point.
    #[must_use]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// True when both coordinates are within [`MAX_COORD`].
    #[must_use]
    pub const fn in_range(self) -> bool {
        self.x.unsigned_abs() <= MAX_COORD as u64 && self.y.unsigned_abs() <= MAX_COORD as u64
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An axis-aligned rectangle in grid units, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GridRect {
    /// Left edge.
    pub min_x: i64,
    /// Bottom edge.
    pub min_y: i64,
    /// Right edge.
    pub max_x: i64,
    /// Top edge.
    pub max_y: i64,
}

impl GridRect {
    /// The canonical empty rectangle, all zero.
    pub const EMPTY: Self = Self {
        min_x: 0,
        min_y: 0,
        max_x: 0,
        max_y: 0,
    };

    /// Creates a rectangle from two corners in any order.
    #[must_use]
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Creates a `width` by `height` rectangle centered on the origin.
    ///
    /// Odd sizes put the extra unit on the positive side.
    #[must_use]
    pub fn centered(width: i64, height: i64) -> Self {
        let hx = width / 2;
        let hy = height / 2;
        Self {
            min_x: -hx,
            min_y: -hy,
            max_x: width - hx,
            max_y: height - hy,
        }
    }

    /// Returns true for the canonical empty rectangle.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Width in grid units.
    #[must_use]
    pub const fn width(&self) -> i64 {
        self.max_x.saturating_sub(self.min_x)
    }

    /// Height in grid units.
    #[must_use]
    pub const fn height(&self) -> i64 {
        self.max_y.saturating_sub(self.min_y)
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Returns the rectangle moved by `offset`, saturating at the `i64`
    /// limits.
    #[must_use]
    pub const fn translate(&self, offset: GridPoint) -> Self {
        Self {
            min_x: self.min_x.saturating_add(offset.x),
            min_y: self.min_y.saturating_add(offset.y),
            max_x: self.max_x.saturating_add(offset.x),
            max_y: self.max_y.saturating_add(offset.y),
        }
    }

    /// Returns true when `p` lies inside or on the boundary.
    #[must_use]
    pub const fn contains(&self, p: GridPoint) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

impl fmt::Display for GridRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}..{}]x[{}..{}]",
            self.min_x, self.max_x, self.min_y, self.max_y
        )
    }
}

/// Orientation of a placed instance.
///
/// Mirroring is applied first (`mirror_x` negates x, `mirror_y` negates
/// y), then a counter-clockwise rotation by `angle` tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Orientation {
    angle: i16,
    mirror_x: bool,
    mirror_y: bool,
}

impl Orientation {
    /// No rotation or mirroring.
    pub const IDENT: Self = Self::new(0, false, false);
    /// 90 degrees counter-clockwise.
    pub const R90: Self = Self::new(900, false, false);
    /// 180 degrees.
    pub const R180: Self = Self::new(1800, false, false);
    /// 270 degrees counter-clockwise.
    pub const R270: Self = Self::new(2700, false, false);

    /// Creates an orientation. The angle is reduced modulo 360 degrees.
    #[must_use]
    pub const fn new(angle: i16, mirror_x: bool, mirror_y: bool) -> Self {
        Self {
            angle: angle.rem_euclid(3600),
            mirror_x,
            mirror_y,
        }
    }

    /// Rotation angle in tenths of a degree, in `0..3600`.
    #[must_use]
    pub const fn angle(self) -> i16 {
        self.angle
    }

    /// True when x is negated before rotation.
    #[must_use]
    pub const fn mirror_x(self) -> bool {
        self.mirror_x
    }

    /// True when y is negated before rotation.
    #[must_use]
    pub const fn mirror_y(self) -> bool {
        self.mirror_y
    }

    /// True for multiples of 90 degrees.
    #[must_use]
    pub const fn is_manhattan(self) -> bool {
        self.angle % 900 == 0
    }

    /// Transforms a point about the origin.
    ///
    /// Only exact for Manhattan orientations; other angles round to the
    /// nearest grid unit.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn transform_point(self, p: GridPoint) -> GridPoint {
        match self.rotate_exact(self.mirror(p)) {
            Some(q) => q,
            None => {
                let (x, y) = self.rotate_f64(self.mirror(p));
                GridPoint::new(x.round() as i64, y.round() as i64)
            }
        }
    }

    /// Transforms a rectangle about the origin and returns the bounding box
    /// of the result.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn transform_rect(self, r: &GridRect) -> GridRect {
        let corners = [
            GridPoint::new(r.min_x, r.min_y),
            GridPoint::new(r.max_x, r.min_y),
            GridPoint::new(r.max_x, r.max_y),
            GridPoint::new(r.min_x, r.max_y),
        ];
        if self.is_manhattan() {
            let mut out: Option<GridRect> = None;
            for c in corners {
                let q = self.transform_point(c);
                let pr = GridRect::new(q.x, q.y, q.x, q.y);
                out = Some(out.map_or(pr, |o| o.union(&pr)));
            }
            return out.unwrap_or(GridRect::EMPTY);
        }
        let (mut lx, mut ly) = (f64::INFINITY, f64::INFINITY);
        let (mut hx, mut hy) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in corners {
            let (x, y) = self.rotate_f64(self.mirror(c));
            lx = lx.min(x);
            ly = ly.min(y);
            hx = hx.max(x);
            hy = hy.max(y);
        }
        GridRect {
            min_x: lx.floor() as i64,
            min_y: ly.floor() as i64,
            max_x: hx.ceil() as i64,
            max_y: hy.ceil() as i64,
        }
    }

    fn mirror(self, p: GridPoint) -> GridPoint {
        GridPoint::new(
            if self.mirror_x { p.x.saturating_neg() } else { p.x },
            if self.mirror_y { p.y.saturating_neg() } else { p.y },
        )
    }

    fn rotate_exact(self, p: GridPoint) -> Option<GridPoint> {
        match self.angle {
            0 => Some(p),
            900 => Some(GridPoint::new(p.y.saturating_neg(), p.x)),
            1800 => Some(GridPoint::new(p.x.saturating_neg(), p.y.saturating_neg())),
            2700 => Some(GridPoint::new(p.y, p.x.saturating_neg())),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn rotate_f64(self, p: GridPoint) -> (f64, f64) {
        let rad = f64::from(self.angle).to_radians() / 10.0;
        let (sin, cos) = rad.sin_cos();
        let (x, y) = (p.x as f64, p.y as f64);
        (x * cos - y * sin, x * sin + y * cos)
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", f64::from(self.angle) / 10.0)?;
        if self.mirror_x {
            f.write_str("X")?;
        }
        if self.mirror_y {
            f.write_str("Y")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_grid_conversion() {
        assert_eq!(lambda_to_grid(1.0), 400);
        assert_eq!(lambda_to_grid(-0.5), -200);
        assert_eq!(lambda_to_grid(0.0012), 0);
        assert!((grid_to_lambda(600) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn centered_rect() {
        let r = GridRect::centered(10, 4);
        assert_eq!(r, GridRect::new(-5, -2, 5, 2));
        assert_eq!(r.width(), 10);
        assert_eq!(r.height(), 4);
    }

    #[test]
    fn rotate_non_square_rect() {
        let r = Orientation::R90.transform_rect(&GridRect::centered(10, 4));
        assert_eq!(r, GridRect::new(-2, -5, 2, 5));
        let placed = r.translate(GridPoint::new(5, 5));
        assert_eq!(placed, GridRect::new(3, 0, 7, 10));
    }

    #[test]
    fn mirror_then_rotate() {
        let o = Orientation::new(900, true, false);
        // (3, 1) -> mirror x -> (-3, 1) -> rotate 90 -> (-1, -3)
        assert_eq!(o.transform_point(GridPoint::new(3, 1)), GridPoint::new(-1, -3));
        let r = o.transform_rect(&GridRect::new(0, 0, 4, 2));
        assert_eq!(r, GridRect::new(-2, -4, 0, 0));
    }

    #[test]
    fn angle_is_normalized() {
        assert_eq!(Orientation::new(-900, false, false), Orientation::R270);
        assert_eq!(Orientation::new(4500, false, false), Orientation::R90);
        assert!(!Orientation::new(450, false, false).is_manhattan());
    }

    #[test]
    fn non_manhattan_snaps_outward() {
        let o = Orientation::new(450, false, false);
        let r = o.transform_rect(&GridRect::centered(10, 10));
        // diagonal of a 10x10 square is ~14.14
        assert_eq!(r, GridRect::new(-8, -8, 8, 8));
    }

    #[test]
    fn union_and_empty() {
        assert!(GridRect::EMPTY.is_empty());
        let u = GridRect::new(0, 0, 2, 2).union(&GridRect::new(-1, 1, 1, 5));
        assert_eq!(u, GridRect::new(-1, 0, 2, 5));
        assert!(u.contains(GridPoint::new(2, 5)));
    }

    #[test]
    fn extreme_coordinates_saturate() {
        let r = GridRect::new(i64::MIN, -1, i64::MAX, 1);
        assert_eq!(r.width(), i64::MAX);
        let moved = r.translate(GridPoint::new(i64::MAX, i64::MIN));
        assert_eq!(moved.max_x, i64::MAX);
        assert_eq!(moved.min_y, i64::MIN);
        let turned = Orientation::R180.transform_rect(&r);
        assert_eq!(turned.min_x, -i64::MAX);
        assert_eq!(turned.max_x, i64::MAX);
    }

    #[test]
    fn coordinate_range() {
        assert!(GridPoint::new(MAX_COORD, -MAX_COORD).in_range());
        assert!(!GridPoint::new(MAX_COORD + 1, 0).in_range());
        assert!(!GridPoint::new(0, i64::MIN).in_range());
    }
}

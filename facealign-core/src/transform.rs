use crate::align::AlignmentError;
use nalgebra::{Matrix3, Vector3};

/// Below this |sin| of the angle spanned at the first point, three points count as collinear
const COLLINEAR_EPSILON: f64 = 1e-9;

/// Source spread below this fraction of the destination spread counts as a single point
const COINCIDENT_EPSILON: f64 = 1e-12;

/// Largest deviation from the `[[a, -b], [b, a]]` pattern still read as a similarity
const SIMILARITY_TOLERANCE: f64 = 1e-9;

pub type Point = (f64, f64);

/// 2D affine map stored in homogeneous form (last row is always `[0, 0, 1]`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    matrix: Matrix3<f64>,
}

impl AffineTransform {
    /// Build from the two rows of a 2×3 matrix
    pub fn from_rows(rows: [[f64; 3]; 2]) -> Self {
        let [[a, b, c], [d, e, f]] = rows;
        Self {
            matrix: Matrix3::new(a, b, c, d, e, f, 0.0, 0.0, 1.0),
        }
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// The 2×3 matrix, row-major
    pub fn matrix(&self) -> [[f64; 3]; 2] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        ]
    }

    pub fn apply(&self, (x, y): Point) -> Point {
        let m = &self.matrix;
        (
            m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)],
            m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)],
        )
    }

    /// Inverse map, `None` when the linear part is singular
    pub fn inverse(&self) -> Option<Self> {
        let det = self.matrix[(0, 0)] * self.matrix[(1, 1)]
            - self.matrix[(0, 1)] * self.matrix[(1, 0)];
        if !det.is_finite() || det.abs() < f64::EPSILON {
            return None;
        }
        self.matrix.try_inverse().map(|matrix| Self { matrix })
    }

    /// Read back scale/rotation/translation when the linear part has no shear
    /// or reflection, `None` otherwise
    pub fn as_similarity(&self) -> Option<SimilarityTransform> {
        let [[a, neg_b, tx], [b, d, ty]] = self.matrix();
        let tolerance = SIMILARITY_TOLERANCE * a.hypot(b).max(1.0);
        if (a - d).abs() > tolerance || (b + neg_b).abs() > tolerance {
            return None;
        }
        Some(SimilarityTransform { a, b, tx, ty })
    }
}

/// Uniform scale + rotation + translation:
/// x' = a*x - b*y + tx
/// y' = b*x + a*y + ty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl SimilarityTransform {
    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    /// Rotation angle in radians
    pub fn rotation(&self) -> f64 {
        self.b.atan2(self.a)
    }

    pub fn translation(&self) -> Point {
        (self.tx, self.ty)
    }

    pub fn apply(&self, (x, y): Point) -> Point {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn to_affine(&self) -> AffineTransform {
        AffineTransform::from_rows([[self.a, -self.b, self.tx], [self.b, self.a, self.ty]])
    }
}

/// Solve the affine map taking each of the three `src` points exactly onto `dst`.
///
/// Fails when the source points are collinear or coincide, since the map is
/// then not unique.
pub fn estimate_affine(src: &[Point; 3], dst: &[Point; 3]) -> Result<AffineTransform, AlignmentError> {
    let [(x0, y0), (x1, y1), (x2, y2)] = *src;

    let (ux, uy) = (x1 - x0, y1 - y0);
    let (vx, vy) = (x2 - x0, y2 - y0);
    let cross = ux * vy - uy * vx;
    let span = ux.hypot(uy) * vx.hypot(vy);
    if !cross.is_finite() || span == 0.0 || cross.abs() <= COLLINEAR_EPSILON * span {
        return Err(AlignmentError::InvalidArgument(
            "source points are collinear, affine transform is not unique".to_string(),
        ));
    }

    let system = Matrix3::new(x0, y0, 1.0, x1, y1, 1.0, x2, y2, 1.0);
    let inverse = system.try_inverse().ok_or_else(|| {
        AlignmentError::InvalidArgument("singular affine system".to_string())
    })?;

    let row_x = inverse * Vector3::new(dst[0].0, dst[1].0, dst[2].0);
    let row_y = inverse * Vector3::new(dst[0].1, dst[1].1, dst[2].1);

    Ok(AffineTransform::from_rows([
        [row_x[0], row_x[1], row_x[2]],
        [row_y[0], row_y[1], row_y[2]],
    ]))
}

/// Least-squares similarity transform from `src` onto `dst` (closed-form Umeyama in 2D).
///
/// Two point pairs give an exact fit; more give the best fit in the
/// sum-of-squared-distances sense.
pub fn estimate_similarity(src: &[Point], dst: &[Point]) -> Result<SimilarityTransform, AlignmentError> {
    if src.len() != dst.len() {
        return Err(AlignmentError::InvalidArgument(format!(
            "point count mismatch: {} source vs {} destination",
            src.len(),
            dst.len()
        )));
    }
    if src.len() < 2 {
        return Err(AlignmentError::InvalidArgument(format!(
            "similarity fit needs at least 2 points, got {}",
            src.len()
        )));
    }

    let n = src.len() as f64;
    let centroid = |points: &[Point]| {
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
        (sx / n, sy / n)
    };
    let (src_cx, src_cy) = centroid(src);
    let (dst_cx, dst_cy) = centroid(dst);

    let mut variance = 0.0;
    let mut dst_variance = 0.0;
    let mut dot = 0.0;
    let mut cross = 0.0;
    for (&(x, y), &(u, v)) in src.iter().zip(dst) {
        let (x, y) = (x - src_cx, y - src_cy);
        let (u, v) = (u - dst_cx, v - dst_cy);
        variance += x * x + y * y;
        dst_variance += u * u + v * v;
        dot += x * u + y * v;
        cross += x * v - y * u;
    }

    // Both measures ignore translation; an all-equal source has zero extent
    let (min_x, max_x, min_y, max_y) = src.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(min_x, max_x, min_y, max_y), &(x, y)| (min_x.min(x), max_x.max(x), min_y.min(y), max_y.max(y)),
    );
    let extent = (max_x - min_x).hypot(max_y - min_y);
    if !variance.is_finite()
        || extent == 0.0
        || variance <= 0.0
        || variance <= COINCIDENT_EPSILON * dst_variance
    {
        return Err(AlignmentError::InvalidArgument(
            "source points coincide, similarity transform is degenerate".to_string(),
        ));
    }

    let a = dot / variance;
    let b = cross / variance;
    let tx = dst_cx - (a * src_cx - b * src_cy);
    let ty = dst_cy - (b * src_cx + a * src_cy);

    Ok(SimilarityTransform { a, b, tx, ty })
}

/// Root-mean-square distance between mapped `src` points and `dst`
pub fn residual(transform: &AffineTransform, src: &[Point], dst: &[Point]) -> f64 {
    if src.is_empty() {
        return 0.0;
    }
    let sum: f64 = src
        .iter()
        .zip(dst)
        .map(|(&p, &(u, v))| {
            let (x, y) = transform.apply(p);
            (x - u).powi(2) + (y - v).powi(2)
        })
        .sum();
    (sum / src.len() as f64).sqrt()
}

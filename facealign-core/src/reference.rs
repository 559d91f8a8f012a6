//! Five-point mean face used by SphereFace-style recognizers.
//!
//! This layout is independent of [`crate::template::TemplateModel`]: it has its
//! own fixed canvas and is not reachable through the landmark subsets.

/// Target canvas as (height, width)
pub const SPHEREFACE_CANVAS: (u32, u32) = (112, 96);

/// Left eye, right eye, nose tip, left and right mouth corners on the 112x96 canvas
pub const SPHEREFACE_5_POINTS: [(f64, f64); 5] = [
    (30.2946, 51.6963),
    (65.5318, 51.5014),
    (48.0252, 71.7366),
    (33.5493, 92.3655),
    (62.7299, 92.2041),
];

/// The canvas and reference points as one pair
pub fn sphereface_mean_5points() -> ((u32, u32), [(f64, f64); 5]) {
    (SPHEREFACE_CANVAS, SPHEREFACE_5_POINTS)
}

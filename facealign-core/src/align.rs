use crate::template::{LandmarkSubset, TemplateModel};
use crate::transform::{self, AffineTransform, Point};
use crate::warp;
use image::{ImageBuffer, Pixel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Landmark set too short: subset needs {required} points, got {actual}")]
    PreconditionViolation { required: usize, actual: usize },
}

/// Default output edge length in pixels
pub const DEFAULT_SIZE: u32 = 256;

/// Default face scale within the output canvas
pub const DEFAULT_SCALE: f64 = 1.0;

/// Largest accepted output edge length in pixels
pub const MAX_OUTPUT_EDGE: u32 = 32768;

/// Transform model used to map landmarks onto the template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignMode {
    /// Exact affine fit on a 3-point subset against the normalized template
    #[serde(rename = "affine3")]
    Affine3,
    /// Least-squares similarity fit on any subset against the raw template
    #[serde(rename = "similarity", alias = "similarity_n")]
    SimilarityN,
}

impl AlignMode {
    pub fn name(self) -> &'static str {
        match self {
            AlignMode::Affine3 => "affine3",
            AlignMode::SimilarityN => "similarity",
        }
    }

    /// Subset used when the caller does not pick one
    pub fn default_subset(self) -> LandmarkSubset {
        match self {
            AlignMode::Affine3 => LandmarkSubset::OuterEyesAndNose,
            AlignMode::SimilarityN => LandmarkSubset::AllPoints,
        }
    }
}

impl fmt::Display for AlignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlignMode {
    type Err = AlignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "affine3" | "affine" | "3" => Ok(AlignMode::Affine3),
            "similarity" | "similarity_n" | "similarity-n" | "68" => Ok(AlignMode::SimilarityN),
            other => Err(AlignmentError::InvalidArgument(format!(
                "unknown alignment mode: {:?}",
                other
            ))),
        }
    }
}

/// Per-call alignment parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignOptions {
    pub mode: AlignMode,
    pub subset: LandmarkSubset,
    pub size: u32,
    pub scale: f64,
}

impl AlignOptions {
    pub fn affine3() -> Self {
        Self::for_mode(AlignMode::Affine3)
    }

    pub fn similarity() -> Self {
        Self::for_mode(AlignMode::SimilarityN)
    }

    pub fn for_mode(mode: AlignMode) -> Self {
        Self {
            mode,
            subset: mode.default_subset(),
            size: DEFAULT_SIZE,
            scale: DEFAULT_SCALE,
        }
    }

    pub fn with_subset(mut self, subset: LandmarkSubset) -> Self {
        self.subset = subset;
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Check everything that does not depend on the landmarks
    pub fn validate(&self) -> Result<(), AlignmentError> {
        if self.size == 0 {
            return Err(AlignmentError::InvalidArgument(
                "output size must be greater than 0".to_string(),
            ));
        }

        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(AlignmentError::InvalidArgument(format!(
                "scale must be a positive number, got {}",
                self.scale
            )));
        }

        let count = self.subset.indices().len();
        match self.mode {
            AlignMode::Affine3 if count != 3 => Err(AlignmentError::InvalidArgument(format!(
                "affine3 alignment needs exactly 3 landmarks, subset {} has {}",
                self.subset, count
            ))),
            AlignMode::SimilarityN if count < 2 => Err(AlignmentError::InvalidArgument(format!(
                "similarity alignment needs at least 2 landmarks, subset {} has {}",
                self.subset, count
            ))),
            _ => self.output_dimensions().map(|_| ()),
        }
    }

    /// Width and height of the aligned image
    pub fn output_dimensions(&self) -> Result<(u32, u32), AlignmentError> {
        let side = match self.mode {
            AlignMode::Affine3 => self.size as f64,
            AlignMode::SimilarityN => (self.size as f64 * self.scale).round(),
        };
        if side < 1.0 || side > MAX_OUTPUT_EDGE as f64 {
            return Err(AlignmentError::InvalidArgument(format!(
                "size {} at scale {} gives a {}px canvas, expected 1..={}",
                self.size, self.scale, side, MAX_OUTPUT_EDGE
            )));
        }
        Ok((side as u32, side as u32))
    }
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self::affine3()
    }
}

/// Fits detected landmarks to the template and resamples the face into the canonical frame.
///
/// The two modes place the template differently in the output canvas:
///
/// * [`AlignMode::Affine3`]: `size * normalized * scale + size * (1 - scale) / 2`,
///   the min-max normalized template fills the canvas and `scale < 1` shrinks it
///   around the centre. Output is always `size x size`.
/// * [`AlignMode::SimilarityN`]: `raw * (size * scale)`, the raw template is
///   scaled without re-centering. Output is `round(size * scale)` square.
///
/// Models trained on one convention will not accept crops from the other.
#[derive(Debug, Clone, Copy)]
pub struct AlignmentEngine<'a> {
    template: &'a TemplateModel,
}

impl<'a> AlignmentEngine<'a> {
    pub fn new(template: &'a TemplateModel) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &'a TemplateModel {
        self.template
    }

    /// Align with the 3-point affine fit
    pub fn align_affine3<P>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
        landmarks: &[(f32, f32)],
        subset: LandmarkSubset,
        size: u32,
        scale: f64,
    ) -> Result<ImageBuffer<P, Vec<u8>>, AlignmentError>
    where
        P: Pixel<Subpixel = u8>,
    {
        let options = AlignOptions::affine3()
            .with_subset(subset)
            .with_size(size)
            .with_scale(scale);
        self.align(image, landmarks, &options)
    }

    /// Align with the N-point least-squares similarity fit
    pub fn align_similarity_n<P>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
        landmarks: &[(f32, f32)],
        subset: LandmarkSubset,
        size: u32,
        scale: f64,
    ) -> Result<ImageBuffer<P, Vec<u8>>, AlignmentError>
    where
        P: Pixel<Subpixel = u8>,
    {
        let options = AlignOptions::similarity()
            .with_subset(subset)
            .with_size(size)
            .with_scale(scale);
        self.align(image, landmarks, &options)
    }

    /// Align according to `options.mode`
    pub fn align<P>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
        landmarks: &[(f32, f32)],
        options: &AlignOptions,
    ) -> Result<ImageBuffer<P, Vec<u8>>, AlignmentError>
    where
        P: Pixel<Subpixel = u8>,
    {
        let transform = self.estimate(landmarks, options)?;
        let (width, height) = options.output_dimensions()?;

        log::debug!(
            "Warping {}x{} image into {}x{} ({} mode)",
            image.width(),
            image.height(),
            width,
            height,
            options.mode
        );
        warp::warp_affine(image, &transform, width, height)
    }

    /// Fit the source -> canonical transform without resampling
    pub fn estimate(
        &self,
        landmarks: &[(f32, f32)],
        options: &AlignOptions,
    ) -> Result<AffineTransform, AlignmentError> {
        options.validate()?;

        let src = Self::source_points(landmarks, options.subset)?;
        let dst = self.destination_points(options);

        let transform = match options.mode {
            AlignMode::Affine3 => {
                let src = [src[0], src[1], src[2]];
                let dst = [dst[0], dst[1], dst[2]];
                transform::estimate_affine(&src, &dst)?
            }
            AlignMode::SimilarityN => {
                let similarity = transform::estimate_similarity(&src, &dst)?;
                log::debug!(
                    "Similarity fit: scale {:.4}, rotation {:.2}°",
                    similarity.scale(),
                    similarity.rotation().to_degrees()
                );
                similarity.to_affine()
            }
        };

        if transform.inverse().is_none() {
            return Err(AlignmentError::InvalidArgument(
                "fitted transform collapses the image".to_string(),
            ));
        }

        log::debug!(
            "{} fit on {} landmarks ({}), RMS residual {:.4}px",
            options.mode,
            src.len(),
            options.subset,
            transform::residual(&transform, &src, &dst)
        );

        Ok(transform)
    }

    /// Template positions in output pixels for the mode's placement convention
    pub fn destination_points(&self, options: &AlignOptions) -> Vec<Point> {
        let size = options.size as f64;
        let scale = options.scale;
        let indices = options.subset.indices();

        match options.mode {
            AlignMode::Affine3 => {
                let offset = size * (1.0 - scale) / 2.0;
                indices
                    .iter()
                    .map(|&i| {
                        let (x, y) = self.template.normalized()[i];
                        (
                            size * x as f64 * scale + offset,
                            size * y as f64 * scale + offset,
                        )
                    })
                    .collect()
            }
            AlignMode::SimilarityN => {
                let canvas = size * scale;
                indices
                    .iter()
                    .map(|&i| {
                        let (x, y) = self.template.raw()[i];
                        (x as f64 * canvas, y as f64 * canvas)
                    })
                    .collect()
            }
        }
    }

    fn source_points(
        landmarks: &[(f32, f32)],
        subset: LandmarkSubset,
    ) -> Result<Vec<Point>, AlignmentError> {
        let required = subset.required_landmarks();
        if landmarks.len() < required {
            return Err(AlignmentError::PreconditionViolation {
                required,
                actual: landmarks.len(),
            });
        }

        Ok(subset
            .indices()
            .iter()
            .map(|&i| (landmarks[i].0 as f64, landmarks[i].1 as f64))
            .collect())
    }
}

impl Default for AlignmentEngine<'static> {
    fn default() -> Self {
        Self::new(TemplateModel::shared())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::LANDMARK_COUNT;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn gradient(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 3 + y) % 256) as u8])
        })
    }

    /// Landmarks that sit exactly on the affine3 destinations for `size`
    fn canonical_affine_landmarks(size: u32) -> Vec<(f32, f32)> {
        TemplateModel::shared()
            .normalized()
            .iter()
            .map(|&(x, y)| (size as f32 * x, size as f32 * y))
            .collect()
    }

    fn canonical_similarity_landmarks(size: u32) -> Vec<(f32, f32)> {
        TemplateModel::shared()
            .raw()
            .iter()
            .map(|&(x, y)| (size as f32 * x, size as f32 * y))
            .collect()
    }

    /// Detected face: the canonical layout moved by a known pose
    fn posed_landmarks(pose: &AffineTransform) -> Vec<(f32, f32)> {
        canonical_affine_landmarks(256)
            .into_iter()
            .map(|(x, y)| {
                let (px, py) = pose.apply((x as f64, y as f64));
                (px as f32, py as f32)
            })
            .collect()
    }

    #[test]
    fn test_affine3_maps_sources_onto_destinations() {
        let engine = AlignmentEngine::default();
        let pose = AffineTransform::from_rows([[0.8, 0.25, 40.0], [-0.2, 0.9, 60.0]]);
        let landmarks = posed_landmarks(&pose);

        for subset in [LandmarkSubset::OuterEyesAndNose, LandmarkSubset::InnerEyesAndBottomLip] {
            let options = AlignOptions::affine3().with_subset(subset).with_scale(0.8);
            let transform = engine.estimate(&landmarks, &options).unwrap();
            let dst = engine.destination_points(&options);

            for (&i, &(u, v)) in subset.indices().iter().zip(&dst) {
                let (x, y) = transform.apply((landmarks[i].0 as f64, landmarks[i].1 as f64));
                assert!((x - u).abs() < 1e-4, "x {} vs {}", x, u);
                assert!((y - v).abs() < 1e-4, "y {} vs {}", y, v);
            }
        }
    }

    #[test]
    fn test_affine3_destination_for_outer_eye() {
        let engine = AlignmentEngine::default();
        let options = AlignOptions::affine3();
        let dst = engine.destination_points(&options);

        let raw = crate::template::RAW_TEMPLATE;
        let (min_x, max_x) = (raw[0].0, raw[16].0);
        let (min_y, max_y) = (raw[24].1, raw[8].1);
        let expected_x = 256.0 * ((raw[36].0 - min_x) / (max_x - min_x)) as f64;
        let expected_y = 256.0 * ((raw[36].1 - min_y) / (max_y - min_y)) as f64;

        // Index 36 leads the outer-eyes-and-nose subset
        assert_eq!(dst[0], (expected_x, expected_y));
    }

    #[test]
    fn test_affine3_scale_recenters() {
        let engine = AlignmentEngine::default();
        let full = engine.destination_points(&AlignOptions::affine3());
        let half = engine.destination_points(&AlignOptions::affine3().with_scale(0.5));

        for (&(fx, fy), &(hx, hy)) in full.iter().zip(&half) {
            assert!((hx - (fx * 0.5 + 64.0)).abs() < 1e-9);
            assert!((hy - (fy * 0.5 + 64.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_modes_use_different_destinations() {
        let engine = AlignmentEngine::default();
        let affine = engine.destination_points(&AlignOptions::affine3());
        let similarity = engine.destination_points(
            &AlignOptions::similarity().with_subset(LandmarkSubset::OuterEyesAndNose),
        );

        let raw = TemplateModel::shared().raw()[36];
        assert_eq!(similarity[0], (raw.0 as f64 * 256.0, raw.1 as f64 * 256.0));
        assert_ne!(affine[0], similarity[0]);
    }

    #[test]
    fn test_affine3_identity_alignment() {
        let engine = AlignmentEngine::default();
        let image = gradient(256);
        let landmarks = canonical_affine_landmarks(256);

        let aligned = engine
            .align_affine3(&image, &landmarks, LandmarkSubset::OuterEyesAndNose, 256, 1.0)
            .unwrap();
        assert_eq!(aligned, image);
    }

    #[test]
    fn test_similarity_identity_alignment() {
        let engine = AlignmentEngine::default();
        let image = gradient(128);
        let landmarks = canonical_similarity_landmarks(128);

        let aligned = engine
            .align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 128, 1.0)
            .unwrap();
        assert_eq!(aligned, image);
    }

    #[test]
    fn test_similarity_recovers_pose() {
        let engine = AlignmentEngine::default();
        let theta = 0.3_f64;
        let pose = AffineTransform::from_rows([
            [1.5 * theta.cos(), -1.5 * theta.sin(), 30.0],
            [1.5 * theta.sin(), 1.5 * theta.cos(), -12.0],
        ]);
        let landmarks: Vec<(f32, f32)> = canonical_similarity_landmarks(256)
            .into_iter()
            .map(|(x, y)| {
                let (px, py) = pose.apply((x as f64, y as f64));
                (px as f32, py as f32)
            })
            .collect();

        let options = AlignOptions::similarity();
        let transform = engine.estimate(&landmarks, &options).unwrap();
        let undo = pose.inverse().unwrap();

        for (fitted, expected) in transform.matrix().iter().zip(undo.matrix().iter()) {
            for (value, expected_value) in fitted.iter().zip(expected) {
                assert!((value - expected_value).abs() < 1e-3, "{} vs {}", value, expected_value);
            }
        }
    }

    #[test]
    fn test_output_dimensions() {
        let engine = AlignmentEngine::default();
        let image = GrayImage::from_pixel(640, 480, Luma([90]));
        let pose = AffineTransform::from_rows([[1.2, 0.1, 150.0], [-0.1, 1.2, 80.0]]);
        let landmarks = posed_landmarks(&pose);

        let affine = engine
            .align_affine3(&image, &landmarks, LandmarkSubset::InnerEyesAndBottomLip, 96, 0.5)
            .unwrap();
        assert_eq!(affine.dimensions(), (96, 96));

        let similarity = engine
            .align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 100, 1.5)
            .unwrap();
        assert_eq!(similarity.dimensions(), (150, 150));

        let similarity = engine
            .align_similarity_n(&image, &landmarks, LandmarkSubset::OuterEyesAndNose, 100, 0.333)
            .unwrap();
        assert_eq!(similarity.dimensions(), (33, 33));
    }

    #[test]
    fn test_affine3_rejects_large_subset() {
        let engine = AlignmentEngine::default();
        let image = gradient(32);
        let landmarks = canonical_affine_landmarks(32);

        let result = engine.align_affine3(&image, &landmarks, LandmarkSubset::AllPoints, 32, 1.0);
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));
    }

    #[test]
    fn test_affine3_rejects_collinear_landmarks() {
        let engine = AlignmentEngine::default();
        let image = gradient(32);
        let landmarks: Vec<(f32, f32)> = (0..LANDMARK_COUNT).map(|i| (i as f32, 2.0 * i as f32)).collect();

        let result = engine.align_affine3(&image, &landmarks, LandmarkSubset::OuterEyesAndNose, 32, 1.0);
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));
    }

    #[test]
    fn test_similarity_rejects_coincident_landmarks() {
        let engine = AlignmentEngine::default();
        let image = gradient(32);
        let landmarks = vec![(12.5f32, 7.25f32); LANDMARK_COUNT];

        let result = engine.align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 32, 1.0);
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));
    }

    #[test]
    fn test_short_landmark_set() {
        let engine = AlignmentEngine::default();
        let image = gradient(32);
        let landmarks = canonical_affine_landmarks(32);

        let result = engine.align_affine3(&image, &landmarks[..40], LandmarkSubset::OuterEyesAndNose, 32, 1.0);
        assert!(matches!(
            result,
            Err(AlignmentError::PreconditionViolation { required: 46, actual: 40 })
        ));

        let result = engine.align_similarity_n(&image, &landmarks[..67], LandmarkSubset::AllPoints, 32, 1.0);
        assert!(matches!(
            result,
            Err(AlignmentError::PreconditionViolation { required: 68, actual: 67 })
        ));
    }

    #[test]
    fn test_invalid_size_and_scale() {
        let engine = AlignmentEngine::default();
        let image = gradient(32);
        let landmarks = canonical_affine_landmarks(32);

        for (size, scale) in [(0, 1.0), (32, 0.0), (32, -1.0), (32, f64::NAN), (32, f64::INFINITY)] {
            let result = engine.align_affine3(&image, &landmarks, LandmarkSubset::OuterEyesAndNose, size, scale);
            assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));

            let result = engine.align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, size, scale);
            assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));
        }

        // Rounds to an empty canvas
        let result = engine.align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 1, 0.2);
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_canvas_rejected() {
        let engine = AlignmentEngine::default();
        let image = GrayImage::new(64, 64);
        let landmarks = canonical_affine_landmarks(64);

        let result = engine.align_affine3(&image, &landmarks, LandmarkSubset::OuterEyesAndNose, u32::MAX, 1.0);
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));

        let result = engine.align_affine3(
            &image,
            &landmarks,
            LandmarkSubset::OuterEyesAndNose,
            MAX_OUTPUT_EDGE + 1,
            1.0,
        );
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));

        // The scaled side is what counts for the similarity canvas
        let result = engine.align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, MAX_OUTPUT_EDGE, 2.0);
        assert!(matches!(result, Err(AlignmentError::InvalidArgument(_))));

        let options = AlignOptions::similarity().with_size(MAX_OUTPUT_EDGE * 2).with_scale(0.5);
        assert_eq!(options.output_dimensions().unwrap(), (MAX_OUTPUT_EDGE, MAX_OUTPUT_EDGE));
    }

    #[test]
    fn test_deterministic() {
        let engine = AlignmentEngine::default();
        let image = gradient(300);
        let pose = AffineTransform::from_rows([[0.9, 0.3, 20.0], [-0.3, 0.9, 70.0]]);
        let landmarks = posed_landmarks(&pose);

        let first = engine.align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 112, 1.0).unwrap();
        let second = engine.align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 112, 1.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mode_and_subset_names() {
        assert_eq!("affine3".parse::<AlignMode>().unwrap(), AlignMode::Affine3);
        assert_eq!("Similarity".parse::<AlignMode>().unwrap(), AlignMode::SimilarityN);
        assert!("perspective".parse::<AlignMode>().is_err());
        assert_eq!(AlignOptions::similarity().subset, LandmarkSubset::AllPoints);
        assert_eq!(AlignOptions::default().subset, LandmarkSubset::OuterEyesAndNose);
    }
}

pub mod align;
pub mod config;
pub mod landmarks;
pub mod reference;
pub mod template;
pub mod transform;
pub mod warp;

use image::{ImageBuffer, Pixel, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use thiserror::Error;

pub use align::{AlignMode, AlignOptions, AlignmentEngine, AlignmentError, MAX_OUTPUT_EDGE};
pub use template::{LandmarkSubset, TemplateModel, LANDMARK_COUNT, RAW_TEMPLATE};
pub use transform::{AffineTransform, SimilarityTransform};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Alignment error: {0}")]
    Alignment(#[from] align::AlignmentError),
    #[error("Landmark error: {0}")]
    Landmarks(#[from] landmarks::LandmarkError),
    #[error("{0}")]
    Other(String),
}

/// Align with the 3-point affine fit against the shared template.
///
/// Destinations are `size * normalized * scale + size * (1 - scale) / 2`;
/// the result is always `size x size`.
pub fn align_affine3<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    landmarks: &[(f32, f32)],
    subset: LandmarkSubset,
    size: u32,
    scale: f64,
) -> Result<ImageBuffer<P, Vec<u8>>, AlignmentError>
where
    P: Pixel<Subpixel = u8>,
{
    AlignmentEngine::default().align_affine3(image, landmarks, subset, size, scale)
}

/// Align with the N-point similarity fit against the shared template.
///
/// Destinations are `raw * (size * scale)`; the result is
/// `round(size * scale)` square.
pub fn align_similarity_n<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    landmarks: &[(f32, f32)],
    subset: LandmarkSubset,
    size: u32,
    scale: f64,
) -> Result<ImageBuffer<P, Vec<u8>>, AlignmentError>
where
    P: Pixel<Subpixel = u8>,
{
    AlignmentEngine::default().align_similarity_n(image, landmarks, subset, size, scale)
}

/// Landmark indices of a subset
pub fn subset_indices(subset: LandmarkSubset) -> &'static [usize] {
    TemplateModel::shared().subset_indices(subset)
}

/// Configured aligner: one mode, subset, size and scale applied to every call
pub struct FaceAligner {
    config: config::Config,
    engine: AlignmentEngine<'static>,
}

impl FaceAligner {
    /// Create a new aligner with the given configuration
    pub fn new(config: config::Config) -> Result<Self, Error> {
        config.validate()?;

        let options = config.alignment.options();
        log::debug!(
            "Aligner ready: mode={}, subset={}, size={}, scale={}",
            options.mode,
            options.subset,
            options.size,
            options.scale
        );

        Ok(Self {
            config,
            engine: AlignmentEngine::default(),
        })
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    pub fn options(&self) -> AlignOptions {
        self.config.alignment.options()
    }

    pub fn engine(&self) -> &AlignmentEngine<'static> {
        &self.engine
    }

    /// Fit the configured transform without resampling
    pub fn estimate(&self, landmarks: &[(f32, f32)]) -> Result<AffineTransform, Error> {
        Ok(self.engine.estimate(landmarks, &self.options())?)
    }

    /// Align a face to the canonical frame
    pub fn align<P>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
        landmarks: &[(f32, f32)],
    ) -> Result<ImageBuffer<P, Vec<u8>>, Error>
    where
        P: Pixel<Subpixel = u8>,
    {
        Ok(self.engine.align(image, landmarks, &self.options())?)
    }

    /// Align, then save a landmark overlay of the source frame.
    ///
    /// The overlay goes to `debug_path` when given, otherwise into the
    /// configured debug directory if `save_visualizations` is on. Returns the
    /// aligned image and the overlay path if one was written. A failed save
    /// is logged and does not fail the alignment.
    pub fn align_with_debug<P>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
        landmarks: &[(f32, f32)],
        debug_path: Option<&str>,
    ) -> Result<(ImageBuffer<P, Vec<u8>>, Option<PathBuf>), Error>
    where
        P: Pixel<Subpixel = u8>,
    {
        let aligned = self.align(image, landmarks)?;

        let should_save = self.config.debug.save_visualizations || debug_path.is_some();
        if !should_save {
            return Ok((aligned, None));
        }

        let save_path = match debug_path {
            Some(explicit_path) => PathBuf::from(explicit_path),
            None => match Self::ensure_debug_dir(&self.config.debug.output_dir) {
                Ok(debug_dir) => debug_dir.join(Self::generate_debug_filename("align")),
                Err(e) => {
                    log::warn!("Skipping debug visualization: {}", e);
                    return Ok((aligned, None));
                }
            },
        };

        let frame = RgbImage::from_fn(image.width(), image.height(), |x, y| {
            image.get_pixel(x, y).to_rgb()
        });
        match self.save_debug_visualization(&frame, landmarks, &save_path) {
            Ok(()) => Ok((aligned, Some(save_path))),
            Err(e) => {
                log::warn!("Failed to save debug visualization: {}", e);
                Ok((aligned, None))
            }
        }
    }

    /// Ensure debug output directory exists, creating it if necessary
    fn ensure_debug_dir(debug_dir: &Path) -> Result<PathBuf, Error> {
        let expanded_path = match debug_dir.strip_prefix("~") {
            Ok(rest) => match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(rest),
                None => debug_dir.to_path_buf(),
            },
            Err(_) => debug_dir.to_path_buf(),
        };

        std::fs::create_dir_all(&expanded_path)
            .map_err(|e| Error::Other(format!("Failed to create debug directory: {}", e)))?;

        Ok(expanded_path)
    }

    /// Generate a debug filename with timestamp
    fn generate_debug_filename(operation: &str) -> String {
        use chrono::Local;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        format!("{}_{}_{}.png", operation, timestamp, std::process::id())
    }

    /// Draw all landmarks in red, the fitted subset in green, and their bounding box
    fn save_debug_visualization(
        &self,
        frame: &RgbImage,
        landmarks: &[(f32, f32)],
        path: &Path,
    ) -> Result<(), Error> {
        let mut debug_img = frame.clone();

        let red = Rgb([255, 0, 0]);
        let green = Rgb([0, 255, 0]);

        for &(x, y) in landmarks {
            draw_cross_mut(&mut debug_img, red, x as i32, y as i32);
        }
        for &i in self.options().subset.indices() {
            if let Some(&(x, y)) = landmarks.get(i) {
                draw_cross_mut(&mut debug_img, green, x as i32, y as i32);
            }
        }

        if let Some(bounds) = landmark_bounds(landmarks) {
            draw_hollow_rect_mut(&mut debug_img, bounds, green);
        }

        debug_img
            .save(path)
            .map_err(|e| Error::Other(format!("Failed to save debug image: {}", e)))?;

        log::info!("Debug visualization saved to: {}", path.display());
        Ok(())
    }
}

/// Axis-aligned box around a landmark set, `None` if empty
fn landmark_bounds(landmarks: &[(f32, f32)]) -> Option<Rect> {
    let (first, rest) = landmarks.split_first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
    for &(x, y) in rest {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    let width = (max_x - min_x).ceil().max(1.0) as u32;
    let height = (max_y - min_y).ceil().max(1.0) as u32;
    Some(Rect::at(min_x.floor() as i32, min_y.floor() as i32).of_size(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_landmarks(size: f32) -> Vec<(f32, f32)> {
        TemplateModel::shared()
            .normalized()
            .iter()
            .map(|&(x, y)| (x * size, y * size))
            .collect()
    }

    #[test]
    fn test_free_functions_match_engine() {
        let image = RgbImage::from_fn(64, 64, |x, y| Rgb([x as u8, y as u8, 7]));
        let landmarks = canonical_landmarks(64.0);

        let aligned = align_affine3(&image, &landmarks, LandmarkSubset::OuterEyesAndNose, 64, 1.0).unwrap();
        assert_eq!(aligned, image);

        let aligned = align_similarity_n(&image, &landmarks, LandmarkSubset::AllPoints, 48, 1.0).unwrap();
        assert_eq!(aligned.dimensions(), (48, 48));

        assert_eq!(subset_indices(LandmarkSubset::InnerEyesAndBottomLip), &[39, 42, 57]);
    }

    #[test]
    fn test_aligner_uses_config() {
        let mut config = config::Config::default();
        config.alignment.size = 80;
        config.alignment.scale = 0.9;

        let aligner = FaceAligner::new(config).unwrap();
        let image = RgbImage::new(200, 200);
        let aligned = aligner.align(&image, &canonical_landmarks(150.0)).unwrap();
        assert_eq!(aligned.dimensions(), (80, 80));
    }

    #[test]
    fn test_aligner_rejects_invalid_config() {
        let mut config = config::Config::default();
        config.alignment.size = 0;
        assert!(matches!(FaceAligner::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_align_with_debug_writes_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = dir.path().join("overlay.png");

        let aligner = FaceAligner::new(config::Config::default()).unwrap();
        let image = image::GrayImage::new(120, 120);
        let landmarks = canonical_landmarks(100.0);

        let (aligned, written) = aligner
            .align_with_debug(&image, &landmarks, overlay.to_str())
            .unwrap();
        assert_eq!(aligned.dimensions(), (256, 256));
        assert_eq!(written.as_deref(), Some(overlay.as_path()));
        assert!(overlay.exists());
    }

    #[test]
    fn test_align_with_debug_writes_into_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config::Config::default();
        config.debug.save_visualizations = true;
        config.debug.output_dir = dir.path().join("debug");

        let aligner = FaceAligner::new(config).unwrap();
        let image = RgbImage::new(120, 120);
        let (_, written) = aligner
            .align_with_debug(&image, &canonical_landmarks(100.0), None)
            .unwrap();

        let written = written.unwrap();
        assert!(written.starts_with(dir.path().join("debug")));
        assert!(written.exists());
    }

    #[test]
    fn test_align_with_debug_survives_unusable_debug_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"plain file").unwrap();

        let mut config = config::Config::default();
        config.debug.save_visualizations = true;
        config.debug.output_dir = blocker.join("sub");

        let aligner = FaceAligner::new(config).unwrap();
        let image = RgbImage::new(120, 120);
        let (aligned, written) = aligner
            .align_with_debug(&image, &canonical_landmarks(100.0), None)
            .unwrap();
        assert_eq!(aligned.dimensions(), (256, 256));
        assert!(written.is_none());
    }

    #[test]
    fn test_align_with_debug_reports_failed_save() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = dir.path().join("missing").join("overlay.png");

        let aligner = FaceAligner::new(config::Config::default()).unwrap();
        let image = RgbImage::new(120, 120);
        let (_, written) = aligner
            .align_with_debug(&image, &canonical_landmarks(100.0), overlay.to_str())
            .unwrap();
        assert!(written.is_none());
        assert!(!overlay.exists());
    }

    #[test]
    fn test_align_with_debug_off_by_default() {
        let aligner = FaceAligner::new(config::Config::default()).unwrap();
        let image = RgbImage::new(120, 120);
        let (_, written) = aligner
            .align_with_debug(&image, &canonical_landmarks(100.0), None)
            .unwrap();
        assert!(written.is_none());
    }

    #[test]
    fn test_align_with_debug_propagates_alignment_error() {
        let aligner = FaceAligner::new(config::Config::default()).unwrap();
        let image = RgbImage::new(10, 10);

        let result = aligner.align_with_debug(&image, &[(1.0, 1.0); 10], None);
        assert!(matches!(
            result,
            Err(Error::Alignment(AlignmentError::PreconditionViolation { .. }))
        ));
    }

    #[test]
    fn test_landmark_bounds() {
        assert!(landmark_bounds(&[]).is_none());

        let bounds = landmark_bounds(&[(10.0, 20.0), (30.5, 5.0), (12.0, 40.0)]).unwrap();
        assert_eq!((bounds.left(), bounds.top()), (10, 5));
        assert_eq!((bounds.width(), bounds.height()), (21, 35));
    }
}

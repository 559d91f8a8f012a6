use crate::align::AlignmentError;
use crate::transform::AffineTransform;
use image::{ImageBuffer, Pixel};

/// Resample `image` through `transform` (source -> output) into an `out_width` x `out_height` grid.
///
/// Each output pixel is pulled back through the inverse transform and
/// bilinearly interpolated. Neighbours outside the source contribute black.
/// Works on any 8-bit pixel layout; channels are interpolated independently.
pub fn warp_affine<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    transform: &AffineTransform,
    out_width: u32,
    out_height: u32,
) -> Result<ImageBuffer<P, Vec<u8>>, AlignmentError>
where
    P: Pixel<Subpixel = u8>,
{
    // Backward mapping needs the inverse, resolve it before touching pixels
    let inverse = transform.inverse().ok_or_else(|| {
        AlignmentError::InvalidArgument("singular transform matrix".to_string())
    })?;

    let (width, height) = image.dimensions();
    let (width_f, height_f) = (width as f64, height as f64);
    let channels = P::CHANNEL_COUNT as usize;

    let sample = |x: i64, y: i64, c: usize| -> f64 {
        if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
            image.get_pixel(x as u32, y as u32).channels()[c] as f64
        } else {
            0.0
        }
    };

    let buffer_len = (out_width as usize)
        .checked_mul(out_height as usize)
        .and_then(|n| n.checked_mul(channels))
        .filter(|&n| n <= isize::MAX as usize)
        .ok_or_else(|| {
            AlignmentError::InvalidArgument(format!(
                "output of {}x{} pixels does not fit in memory",
                out_width, out_height
            ))
        })?;
    let mut output: ImageBuffer<P, Vec<u8>> =
        ImageBuffer::from_raw(out_width, out_height, vec![0; buffer_len]).ok_or_else(|| {
            AlignmentError::InvalidArgument("output buffer size mismatch".to_string())
        })?;

    for (x_out, y_out, pixel) in output.enumerate_pixels_mut() {
        let (x_in, y_in) = inverse.apply((x_out as f64, y_out as f64));

        // Entirely outside the source, leave the background
        if !(x_in > -1.0 && y_in > -1.0 && x_in < width_f && y_in < height_f) {
            continue;
        }

        let x_floor = x_in.floor();
        let y_floor = y_in.floor();
        let x_frac = x_in - x_floor;
        let y_frac = y_in - y_floor;

        let x0 = x_floor as i64;
        let y0 = y_floor as i64;
        let x1 = x0 + 1;
        let y1 = y0 + 1;

        let out_channels = pixel.channels_mut();
        for (c, value) in out_channels.iter_mut().enumerate().take(channels) {
            let v0 = sample(x0, y0, c) * (1.0 - x_frac) + sample(x1, y0, c) * x_frac;
            let v1 = sample(x0, y1, c) * (1.0 - x_frac) + sample(x1, y1, c) * x_frac;
            let v = v0 * (1.0 - y_frac) + v1 * y_frac;

            *value = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(output)
}

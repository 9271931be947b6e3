//! Image tensor primitives: decode, resize, cast, normalize, expand.
//!
//! Images are laid out `[height, width, channels]`.

use burn::tensor::backend::Backend;
use burn::tensor::{BasicOps, Element, Int, Numeric, Tensor, TensorData};

use crate::error::{Error, Result, ShapeError};

/// Default divisor mapping 8-bit pixels to `[0, 1]`.
pub const PIXEL_SCALE: f32 = 255.0;

/// Decode an encoded image (PNG, JPEG, ...) into an integer `[H, W, C]` tensor.
///
/// Four-channel images lose their alpha channel; grayscale stays single
/// channel.
pub fn decode<B: Backend>(bytes: &[u8], device: &B::Device) -> Result<Tensor<B, 3, Int>> {
    let image = image::load_from_memory(bytes)?;
    let height = image.height() as usize;
    let width = image.width() as usize;

    let (pixels, channels) = match image.color().channel_count() {
        1 => (image.into_luma8().into_raw(), 1),
        2 => (image.into_luma_alpha8().into_raw(), 2),
        3 => (image.into_rgb8().into_raw(), 3),
        _ => (image.into_rgba8().into_raw(), 4),
    };
    let values: Vec<i32> = pixels.into_iter().map(i32::from).collect();
    let tensor = Tensor::<B, 3, Int>::from_data(
        TensorData::new(values, [height, width, channels]),
        device,
    );

    if channels == 4 {
        Ok(tensor.slice([0..height, 0..width, 0..3]))
    } else {
        Ok(tensor)
    }
}

/// Nearest-neighbor resize of the two leading (spatial) dimensions to
/// `size x size`. Source index is `floor(dst * in / out)`.
pub fn resize_nearest<B, const D: usize, K>(
    tensor: Tensor<B, D, K>,
    size: usize,
) -> Result<Tensor<B, D, K>>
where
    B: Backend,
    K: Numeric<B>,
    K::Elem: Element,
{
    let dims = tensor.dims();
    if D < 2 {
        return Err(ShapeError::Rank {
            expected: 2,
            shape: dims.to_vec(),
        }
        .into());
    }
    if size == 0 {
        return Err(Error::config("resize target size must be > 0"));
    }
    let (height, width) = (dims[0], dims[1]);
    if height == 0 || width == 0 {
        return Err(ShapeError::Mismatch {
            what: "image spatial dimensions",
            expected: vec![size, size],
            got: dims.to_vec(),
        }
        .into());
    }

    let device = tensor.device();
    let rows = nearest_indices::<B>(height, size, &device);
    let cols = nearest_indices::<B>(width, size, &device);
    Ok(tensor.select(0, rows).select(1, cols))
}

fn nearest_indices<B: Backend>(input: usize, output: usize, device: &B::Device) -> Tensor<B, 1, Int> {
    let scale = input as f64 / output as f64;
    let indices: Vec<i64> = (0..output)
        .map(|i| ((i as f64 * scale).floor() as usize).min(input - 1) as i64)
        .collect();
    Tensor::from_data(TensorData::new(indices, [output]), device)
}

/// Cast integer pixels to floating point without rescaling.
pub fn to_float<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Tensor<B, D> {
    tensor.float()
}

/// Divide every element by `scalar` (typically 255).
pub fn normalize<B: Backend, const D: usize>(tensor: Tensor<B, D>, scalar: f32) -> Result<Tensor<B, D>> {
    if !scalar.is_finite() || scalar == 0.0 {
        return Err(Error::config(format!(
            "normalization factor must be finite and non-zero, got {scalar}"
        )));
    }
    Ok(tensor.div_scalar(scalar))
}

/// Insert a leading batch dimension: `[H, W, C]` -> `[1, H, W, C]`.
pub fn expand_dims<B: Backend, K: BasicOps<B>>(tensor: Tensor<B, 3, K>) -> Tensor<B, 4, K> {
    tensor.unsqueeze::<4>()
}

/// Whether spatial dimensions 0 and 1 both equal `size`.
pub fn is_image_shape<B: Backend, const D: usize, K: BasicOps<B>>(
    tensor: &Tensor<B, D, K>,
    size: usize,
) -> bool {
    let dims = tensor.dims();
    D >= 2 && dims[0] == size && dims[1] == size
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    type TestBackend = NdArray<f32>;

    /// Encode a `width x height` RGBA image whose red channel is the column index.
    pub(crate) fn png_rgba(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 7, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_drops_alpha() {
        let device = Default::default();
        let tensor = decode::<TestBackend>(&png_rgba(5, 4), &device).unwrap();
        assert_eq!(tensor.dims(), [4, 5, 3]);

        let values: Vec<i64> = tensor.into_data().convert::<i64>().to_vec().unwrap();
        // pixel (row 0, col 2): r = 2, g = 0, b = 7
        assert_eq!(&values[6..9], &[2, 0, 7]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let device = Default::default();
        let err = decode::<TestBackend>(b"definitely not an image", &device).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_resize_then_shape_check() {
        let device = Default::default();
        let image = decode::<TestBackend>(&png_rgba(7, 3), &device).unwrap();
        for size in [1, 2, 3, 8, 17] {
            let resized = resize_nearest(image.clone(), size).unwrap();
            assert!(is_image_shape(&resized, size));
            assert_eq!(resized.dims()[2], 3);
        }
    }

    #[test]
    fn test_resize_picks_nearest_source() {
        let device = Default::default();
        let data = TensorData::new((0..4).collect::<Vec<i64>>(), [1, 4, 1]);
        let row = Tensor::<TestBackend, 3, Int>::from_data(data, &device);
        let resized = resize_nearest(row, 2).unwrap();

        assert_eq!(resized.dims(), [2, 2, 1]);
        let values: Vec<i64> = resized.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(values, vec![0, 2, 0, 2]);
    }

    #[test]
    fn test_resize_rejects_low_rank() {
        let device = Default::default();
        let flat = Tensor::<TestBackend, 1>::zeros([6], &device);
        let err = resize_nearest(flat, 2).unwrap_err();
        assert!(matches!(err, Error::Shape(ShapeError::Rank { .. })));
    }

    #[test]
    fn test_normalize_maps_to_unit_range() {
        let device = Default::default();
        let pixels = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::new(vec![0i64, 51, 255], [1, 1, 3]),
            &device,
        );
        let normalized = normalize(to_float(pixels), PIXEL_SCALE).unwrap();
        let values: Vec<f32> = normalized.into_data().to_vec().unwrap();
        approx::assert_abs_diff_eq!(values[0], 0.0);
        approx::assert_abs_diff_eq!(values[1], 0.2, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(values[2], 1.0);

        let zeros = Tensor::<TestBackend, 1>::zeros([2], &device);
        assert!(normalize(zeros, 0.0).is_err());
    }

    #[test]
    fn test_expand_dims_adds_batch_axis() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 3>::zeros([4, 5, 3], &device);
        assert_eq!(expand_dims(image).dims(), [1, 4, 5, 3]);
    }
}

//! 2x averaging used to build overview levels.

/// Downsample a 2D grid by a factor of 2 with a NaN-aware block mean.
///
/// Output dimensions round up, so trailing odd rows/columns average over the
/// cells that exist instead of being dropped.
///
/// # Returns
/// Tuple of (downsampled_data, new_width, new_height)
pub fn downsample_2x_mean(data: &[f32], width: usize, height: usize) -> (Vec<f32>, usize, usize) {
    if width == 0 || height == 0 {
        return (vec![], 0, 0);
    }

    let new_width = width.div_ceil(2);
    let new_height = height.div_ceil(2);
    let mut output = vec![f32::NAN; new_width * new_height];

    for out_y in 0..new_height {
        for out_x in 0..new_width {
            let mut sum = 0.0f32;
            let mut count = 0u32;

            for in_y in (out_y * 2)..(out_y * 2 + 2).min(height) {
                for in_x in (out_x * 2)..(out_x * 2 + 2).min(width) {
                    let v = data[in_y * width + in_x];
                    if !v.is_nan() {
                        sum += v;
                        count += 1;
                    }
                }
            }

            if count > 0 {
                output[out_y * new_width + out_x] = sum / count as f32;
            }
        }
    }

    (output, new_width, new_height)
}

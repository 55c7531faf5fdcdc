//! Synthetic band generators with predictable values.

/// NDVI-like band in [0.1, 0.9], increasing left to right.
pub fn create_ndvi_grid(width: usize, height: usize) -> Vec<f32> {
    let span = (width.max(2) - 1) as f32;
    let mut data = Vec::with_capacity(width * height);
    for _row in 0..height {
        for col in 0..width {
            data.push(0.1 + 0.8 * col as f32 / span);
        }
    }
    data
}

pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndvi_grid_range() {
        let grid = create_ndvi_grid(11, 3);
        assert!((grid[0] - 0.1).abs() < 1e-6);
        assert!((grid[10] - 0.9).abs() < 1e-6);
        assert!(grid.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_constant_grid() {
        assert_eq!(create_constant_grid(2, 2, 2.25), vec![2.25; 4]);
    }
}

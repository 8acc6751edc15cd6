use crate::types::{GridGeometry, RangeError, RangeResult};
use ndarray::Array2;
use num_traits::Zero;

/// Places a raster onto a template grid so cross-raster arithmetic lines up.
pub struct ExtentNormalizer;

impl ExtentNormalizer {
    /// Re-frame `cells` onto the template grid.
    ///
    /// The result is template-shaped, with source cells at their matching
    /// pixel positions and zero everywhere else. Source cells equal to
    /// `no_data` also become zero, so addition treats them as neutral.
    /// Source and template must share cell size, snap, and projection.
    pub fn normalize<T>(
        cells: &Array2<T>,
        source: &GridGeometry,
        template: &GridGeometry,
        no_data: Option<T>,
    ) -> RangeResult<Array2<T>>
    where
        T: Copy + Zero + PartialEq,
    {
        if !template.aligned_with(source) {
            return Err(RangeError::GridMismatch(format!(
                "source grid at ({}, {}) does not share the template's cell size, snap, or projection",
                source.transform.top_left_x, source.transform.top_left_y
            )));
        }

        let (height, width) = cells.dim();
        if width != source.width || height != source.height {
            return Err(RangeError::GridMismatch(format!(
                "array is {}x{} but source grid says {}x{}",
                width, height, source.width, source.height
            )));
        }

        let (dx, dy) = template.offset_of(source);
        log::debug!(
            "Normalizing {}x{} raster onto {}x{} template at offset ({}, {})",
            source.width,
            source.height,
            template.width,
            template.height,
            dx,
            dy
        );

        let mut output = Array2::<T>::zeros((template.height, template.width));
        for row in 0..source.height {
            let target_row = row as i64 + dy;
            if target_row < 0 || target_row >= template.height as i64 {
                continue;
            }
            for col in 0..source.width {
                let target_col = col as i64 + dx;
                if target_col < 0 || target_col >= template.width as i64 {
                    continue;
                }
                let value = cells[[row, col]];
                if Some(value) == no_data {
                    continue;
                }
                output[[target_row as usize, target_col as usize]] = value;
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    fn grid(x: f64, y: f64, w: usize, h: usize) -> GridGeometry {
        GridGeometry {
            width: w,
            height: h,
            transform: GeoTransform {
                top_left_x: x,
                pixel_width: 10.0,
                rotation_x: 0.0,
                top_left_y: y,
                rotation_y: 0.0,
                pixel_height: -10.0,
            },
            projection: String::new(),
        }
    }

    #[test]
    fn test_normalize_matching_grid_is_identity() {
        let g = grid(0.0, 100.0, 2, 2);
        let cells = array![[1u32, 2], [3, 4]];
        let out = ExtentNormalizer::normalize(&cells, &g, &g, None).unwrap();
        assert_eq!(out, cells);
    }

    #[test]
    fn test_normalize_places_at_offset_and_zero_fills() {
        let template = grid(0.0, 100.0, 4, 4);
        let source = grid(20.0, 80.0, 2, 2); // two cells right, one down
        let cells = array![[5u32, 6], [7, 8]];

        let out = ExtentNormalizer::normalize(&cells, &source, &template, None).unwrap();
        assert_eq!(out.dim(), (4, 4));
        assert_eq!(out[[1, 2]], 5);
        assert_eq!(out[[1, 3]], 6);
        assert_eq!(out[[2, 2]], 7);
        assert_eq!(out[[2, 3]], 8);
        assert_eq!(out.sum(), 5 + 6 + 7 + 8);
        assert_eq!(out[[0, 0]], 0);
    }

    #[test]
    fn test_normalize_clips_source_outside_template() {
        let template = grid(0.0, 100.0, 2, 2);
        let source = grid(-10.0, 100.0, 2, 2); // first column hangs off the left edge
        let cells = array![[1u32, 2], [3, 4]];

        let out = ExtentNormalizer::normalize(&cells, &source, &template, None).unwrap();
        assert_eq!(out[[0, 0]], 2);
        assert_eq!(out[[1, 0]], 4);
        assert_eq!(out[[0, 1]], 0);
    }

    #[test]
    fn test_normalize_maps_no_data_to_zero() {
        let g = grid(0.0, 100.0, 2, 2);
        let cells = array![[255u32, 1], [0, 255]];
        let out = ExtentNormalizer::normalize(&cells, &g, &g, Some(255)).unwrap();
        assert_eq!(out, array![[0, 1], [0, 0]]);
    }

    #[test]
    fn test_normalize_rejects_off_snap_source() {
        let template = grid(0.0, 100.0, 4, 4);
        let mut source = grid(5.0, 100.0, 2, 2);
        source.width = 2;
        let cells = Array2::<u32>::zeros((2, 2));
        assert!(matches!(
            ExtentNormalizer::normalize(&cells, &source, &template, None),
            Err(RangeError::GridMismatch(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_different_cell_size() {
        let template = grid(0.0, 100.0, 4, 4);
        let mut source = grid(0.0, 100.0, 2, 2);
        source.transform.pixel_width = 5.0;
        let cells = Array2::<u32>::zeros((2, 2));
        assert!(matches!(
            ExtentNormalizer::normalize(&cells, &source, &template, None),
            Err(RangeError::GridMismatch(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_rotated_source() {
        let template = grid(0.0, 100.0, 4, 4);
        let mut source = grid(0.0, 100.0, 2, 2);
        source.transform.rotation_x = 5.0;
        let cells = Array2::<u32>::zeros((2, 2));
        assert!(matches!(
            ExtentNormalizer::normalize(&cells, &source, &template, None),
            Err(RangeError::GridMismatch(_))
        ));
    }

    #[test]
    fn test_normalize_rejects_shape_disagreement() {
        let g = grid(0.0, 100.0, 3, 3);
        let cells = Array2::<u32>::zeros((2, 2));
        assert!(matches!(
            ExtentNormalizer::normalize(&cells, &g, &g, None),
            Err(RangeError::GridMismatch(_))
        ));
    }
}

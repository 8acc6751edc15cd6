use crate::io::raster::read_band;
use crate::io::survey::survey_files;
use crate::types::{CountRaster, GridGeometry, RangeError, RangeResult, GRID_TOL};
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Geometry, LayerAccess};
use gdal::{DriverManager, LayerOptions};
use ndarray::Array2;
use std::path::Path;

/// Which cell values count as "covered" when building a footprint mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageRule {
    /// Cells equal to 0 or 1 are covered. This reproduces the behavior of
    /// the source workflow, which masks both background and foreground;
    /// whether that is intended is an open product question, so it stays
    /// the default rather than being corrected quietly.
    ZeroOrOne,
    /// Only cells equal to 1 are covered.
    OnesOnly,
}

impl Default for CoverageRule {
    fn default() -> Self {
        CoverageRule::ZeroOrOne
    }
}

/// Binary coverage mask of a raster under the given rule.
pub fn coverage_mask(cells: &Array2<f32>, rule: CoverageRule) -> Array2<bool> {
    cells.mapv(|v| match rule {
        CoverageRule::ZeroOrOne => v == 0.0 || v == 1.0,
        CoverageRule::OnesOnly => v == 1.0,
    })
}

/// Horizontal run of covered cells within one mask row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CoverageRun {
    row: usize,
    col_start: usize,
    /// One past the last covered column.
    col_end: usize,
}

fn coverage_runs(mask: &Array2<bool>) -> Vec<CoverageRun> {
    let (height, width) = mask.dim();
    let mut runs = Vec::new();

    for row in 0..height {
        let mut start = None;
        for col in 0..width {
            match (mask[[row, col]], start) {
                (true, None) => start = Some(col),
                (false, Some(s)) => {
                    runs.push(CoverageRun {
                        row,
                        col_start: s,
                        col_end: col,
                    });
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(CoverageRun {
                row,
                col_start: s,
                col_end: width,
            });
        }
    }

    runs
}

/// Exact pixel-boundary footprint polygons of a coverage mask.
///
/// One closed rectangular ring per row run, in world coordinates. No
/// simplification is applied; edges follow the pixel lattice exactly.
pub fn footprint_polygons(mask: &Array2<bool>, geometry: &GridGeometry) -> Vec<[(f64, f64); 5]> {
    coverage_runs(mask)
        .iter()
        .map(|run| {
            let (x0, y0) = geometry.pixel_to_world(run.col_start as f64, run.row as f64);
            let (x1, y1) = geometry.pixel_to_world(run.col_end as f64, run.row as f64 + 1.0);
            [(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]
        })
        .collect()
}

/// Write footprint polygons as an ESRI shapefile.
pub fn write_footprint_shapefile<P: AsRef<Path>>(
    mask: &Array2<bool>,
    geometry: &GridGeometry,
    output_path: P,
) -> RangeResult<()> {
    log::debug!("Writing footprint shapefile: {}", output_path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("ESRI Shapefile")?;
    let mut dataset = driver.create_vector_only(output_path.as_ref())?;

    let srs = if geometry.projection.is_empty() {
        None
    } else {
        Some(SpatialRef::from_wkt(&geometry.projection)?)
    };
    let mut layer = dataset.create_layer(LayerOptions {
        name: "footprint",
        srs: srs.as_ref(),
        ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
        ..Default::default()
    })?;

    for ring in footprint_polygons(mask, geometry) {
        let wkt = format!(
            "POLYGON(({} {}, {} {}, {} {}, {} {}, {} {}))",
            ring[0].0,
            ring[0].1,
            ring[1].0,
            ring[1].1,
            ring[2].0,
            ring[2].1,
            ring[3].0,
            ring[3].1,
            ring[4].0,
            ring[4].1,
        );
        layer.create_feature(Geometry::from_wkt(&wkt)?)?;
    }

    Ok(())
}

/// What happened during a directory burn.
#[derive(Debug, Default)]
pub struct BurnReport {
    /// Number of coverage rasters burned into the target.
    pub burned: usize,
    /// Inputs left out, with the reason.
    pub skipped: Vec<(String, RangeError)>,
}

/// Snap a fractional pixel coordinate sitting within tolerance of the
/// lattice onto it, so edges shared with the target grid do not bleed into
/// neighboring pixels through floating-point noise.
fn snap(f: f64) -> f64 {
    let r = f.round();
    if (f - r).abs() <= GRID_TOL {
        r
    } else {
        f
    }
}

fn touch_lo(f: f64) -> i64 {
    snap(f).floor() as i64
}

fn touch_hi(f: f64) -> i64 {
    snap(f).ceil() as i64 - 1
}

/// Rasterizes coverage footprints into a running visit-count raster.
///
/// Burning adds 1 to every target pixel whose area the footprint overlaps,
/// however slightly, not just pixels fully enclosed; each pixel gains at
/// most 1 per call. The target is a long-lived raster mutated across many
/// calls; callers serialize them.
#[derive(Debug, Default)]
pub struct FootprintBurner {
    rule: CoverageRule,
}

impl FootprintBurner {
    pub fn new(rule: CoverageRule) -> Self {
        Self { rule }
    }

    /// Burn one coverage raster's footprint into the target counts.
    pub fn burn(
        &self,
        cells: &Array2<f32>,
        geometry: &GridGeometry,
        target: &mut CountRaster,
    ) -> RangeResult<()> {
        if geometry.projection != target.geometry.projection {
            return Err(RangeError::GridMismatch(
                "coverage raster and target are in different spatial references".to_string(),
            ));
        }

        let mask = coverage_mask(cells, self.rule);
        let mut touched = Array2::<bool>::from_elem(target.cells.dim(), false);

        for run in coverage_runs(&mask) {
            let (x0, y_top) = geometry.pixel_to_world(run.col_start as f64, run.row as f64);
            let (x1, y_bottom) = geometry.pixel_to_world(run.col_end as f64, run.row as f64 + 1.0);

            let (fc0, fr0) = target.geometry.world_to_pixel(x0, y_top);
            let (fc1, fr1) = target.geometry.world_to_pixel(x1, y_bottom);
            let (fc_min, fc_max) = (fc0.min(fc1), fc0.max(fc1));
            let (fr_min, fr_max) = (fr0.min(fr1), fr0.max(fr1));

            let col_lo = touch_lo(fc_min).max(0);
            let col_hi = touch_hi(fc_max).min(target.geometry.width as i64 - 1);
            let row_lo = touch_lo(fr_min).max(0);
            let row_hi = touch_hi(fr_max).min(target.geometry.height as i64 - 1);

            for row in row_lo..=row_hi {
                for col in col_lo..=col_hi {
                    touched[[row as usize, col as usize]] = true;
                }
            }
        }

        let mut count = 0usize;
        ndarray::Zip::from(&mut target.cells)
            .and(&touched)
            .for_each(|cell, &hit| {
                if hit {
                    *cell += 1;
                    count += 1;
                }
            });
        log::debug!("Burned footprint into {} target cells", count);

        Ok(())
    }

    /// Burn the footprint of every raster of `extension` in a directory.
    ///
    /// Footprint shapefiles are materialized into `footprint_dir` when one
    /// is given, otherwise into a temporary directory that is removed when
    /// the call returns. Unreadable or mismatched inputs are skipped with a
    /// warning.
    pub fn burn_directory<P: AsRef<Path>>(
        &self,
        directory: P,
        extension: &str,
        target: &mut CountRaster,
        footprint_dir: Option<&Path>,
    ) -> RangeResult<BurnReport> {
        let files = survey_files(directory.as_ref(), extension)?;
        log::info!(
            "Burning {} coverage footprints from {}",
            files.len(),
            directory.as_ref().display()
        );

        let temp_dir = match footprint_dir {
            Some(_) => None,
            None => Some(tempfile::tempdir()?),
        };
        let shape_dir = footprint_dir.unwrap_or_else(|| {
            temp_dir
                .as_ref()
                .map(|d| d.path())
                .expect("temp dir exists when no footprint dir is given")
        });

        let mut report = BurnReport::default();
        for file in files {
            let label = file.display().to_string();
            let result = (|| -> RangeResult<()> {
                let (cells, geometry) = read_band::<f32, _>(&file, 1)?;

                let stem = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("footprint");
                let mask = coverage_mask(&cells, self.rule);
                write_footprint_shapefile(&mask, &geometry, shape_dir.join(format!("{}.shp", stem)))?;

                self.burn(&cells, &geometry, target)
            })();

            match result {
                Ok(()) => report.burned += 1,
                Err(e) => {
                    log::warn!("Skipping coverage raster {}: {}", label, e);
                    report.skipped.push((label, e));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    fn grid(x: f64, y: f64, w: usize, h: usize, cell: f64) -> GridGeometry {
        GridGeometry {
            width: w,
            height: h,
            transform: GeoTransform {
                top_left_x: x,
                pixel_width: cell,
                rotation_x: 0.0,
                top_left_y: y,
                rotation_y: 0.0,
                pixel_height: -cell,
            },
            projection: String::new(),
        }
    }

    #[test]
    fn test_coverage_rule_zero_or_one() {
        let cells = array![[0.0f32, 1.0, 2.0]];
        let mask = coverage_mask(&cells, CoverageRule::ZeroOrOne);
        assert_eq!(mask, array![[true, true, false]]);
    }

    #[test]
    fn test_coverage_rule_ones_only() {
        let cells = array![[0.0f32, 1.0, 2.0]];
        let mask = coverage_mask(&cells, CoverageRule::OnesOnly);
        assert_eq!(mask, array![[false, true, false]]);
    }

    #[test]
    fn test_runs_split_on_gaps() {
        let mask = array![[true, true, false, true]];
        let runs = coverage_runs(&mask);
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].col_start, runs[0].col_end), (0, 2));
        assert_eq!((runs[1].col_start, runs[1].col_end), (3, 4));
    }

    #[test]
    fn test_footprint_polygon_world_coordinates() {
        let g = grid(100.0, 200.0, 4, 4, 10.0);
        let mask = array![
            [false, false, false, false],
            [false, true, true, false],
            [false, false, false, false],
            [false, false, false, false]
        ];

        let polys = footprint_polygons(&mask, &g);
        assert_eq!(polys.len(), 1);
        let ring = polys[0];
        assert_eq!(ring[0], (110.0, 190.0)); // upper-left of cell (1,1)
        assert_eq!(ring[2], (130.0, 180.0)); // lower-right of cell (1,2)
        assert_eq!(ring[0], ring[4]);
    }

    #[test]
    fn test_burn_same_grid_increments_covered_cells() {
        let g = grid(0.0, 100.0, 3, 3, 10.0);
        let mut target = CountRaster::zeros(&g);
        // 2 is outside both rules: that cell stays untouched.
        let cells = array![[1.0f32, 2.0, 2.0], [1.0, 1.0, 2.0], [2.0, 2.0, 2.0]];

        let burner = FootprintBurner::new(CoverageRule::OnesOnly);
        burner.burn(&cells, &g, &mut target).unwrap();

        assert_eq!(target.cells[[0, 0]], 1);
        assert_eq!(target.cells[[1, 1]], 1);
        assert_eq!(target.cells[[0, 2]], 0);
        assert_eq!(target.cells.sum(), 3);
    }

    #[test]
    fn test_repeat_burns_accumulate() {
        let g = grid(0.0, 100.0, 2, 2, 10.0);
        let mut target = CountRaster::zeros(&g);
        let cells = array![[1.0f32, 1.0], [1.0, 1.0]];

        let burner = FootprintBurner::new(CoverageRule::OnesOnly);
        burner.burn(&cells, &g, &mut target).unwrap();
        burner.burn(&cells, &g, &mut target).unwrap();

        assert!(target.cells.iter().all(|&v| v == 2));
    }

    #[test]
    fn test_burn_on_shared_lattice_stays_within_footprint() {
        // Coverage cell edges coincide with the target lattice: only the
        // matching pixel is touched, never its neighbors.
        let target_grid = grid(0.0, 100.0, 4, 4, 10.0);
        let coverage_grid = grid(10.0, 90.0, 1, 1, 10.0);
        let mut target = CountRaster::zeros(&target_grid);

        let burner = FootprintBurner::new(CoverageRule::OnesOnly);
        burner.burn(&array![[1.0f32]], &coverage_grid, &mut target).unwrap();

        assert_eq!(target.cells[[1, 1]], 1);
        assert_eq!(target.cells.sum(), 1);
    }

    #[test]
    fn test_burn_partial_overlap_touches_both_pixels() {
        // A coverage cell straddling the boundary between two target
        // pixels touches both, even though neither encloses it.
        let target_grid = grid(0.0, 100.0, 2, 1, 10.0);
        let coverage_grid = grid(8.0, 96.0, 1, 1, 4.0);
        let mut target = CountRaster::zeros(&target_grid);

        let burner = FootprintBurner::new(CoverageRule::OnesOnly);
        burner.burn(&array![[1.0f32]], &coverage_grid, &mut target).unwrap();

        assert_eq!(target.cells[[0, 0]], 1);
        assert_eq!(target.cells[[0, 1]], 1);
    }

    #[test]
    fn test_burn_interior_of_coarse_target_touches_one_cell() {
        // A 2 m coverage cell strictly inside one 10 m target pixel.
        let target_grid = grid(0.0, 100.0, 2, 2, 10.0);
        let coverage_grid = grid(14.0, 96.0, 1, 1, 2.0);
        let mut target = CountRaster::zeros(&target_grid);

        let burner = FootprintBurner::new(CoverageRule::OnesOnly);
        burner.burn(&array![[1.0f32]], &coverage_grid, &mut target).unwrap();

        assert_eq!(target.cells[[0, 1]], 1);
        assert_eq!(target.cells.sum(), 1);
    }

    #[test]
    fn test_burn_adds_once_per_call_even_with_overlapping_runs() {
        // Two fine rows land in the same coarse target row.
        let target_grid = grid(0.0, 100.0, 1, 1, 10.0);
        let coverage_grid = grid(2.0, 98.0, 1, 2, 2.0);
        let mut target = CountRaster::zeros(&target_grid);

        let burner = FootprintBurner::new(CoverageRule::OnesOnly);
        burner
            .burn(&array![[1.0f32], [1.0]], &coverage_grid, &mut target)
            .unwrap();

        assert_eq!(target.cells[[0, 0]], 1);
    }

    #[test]
    fn test_burn_rejects_projection_mismatch() {
        let g = grid(0.0, 100.0, 2, 2, 10.0);
        let mut other = g.clone();
        other.projection = "PROJCS[\"other\"]".to_string();
        let mut target = CountRaster::zeros(&g);

        let burner = FootprintBurner::default();
        assert!(matches!(
            burner.burn(&Array2::zeros((2, 2)), &other, &mut target),
            Err(RangeError::GridMismatch(_))
        ));
    }
}

use crate::core::spatial::ExtentNormalizer;
use crate::io::raster::read_band;
use crate::io::survey::survey_files;
use crate::types::{CountRaster, GridGeometry, RangeError, RangeResult, OUTSIDE_DOMAIN};
use ndarray::Array2;
use std::path::Path;

/// What happened to each input during an accumulation pass.
#[derive(Debug, Default)]
pub struct AccumulateReport {
    /// Number of rasters added into the total.
    pub added: usize,
    /// Inputs left out of the total, with the reason.
    pub skipped: Vec<(String, RangeError)>,
}

/// Sums binary comparison rasters into a count raster over a template grid.
pub struct RasterAccumulator;

impl RasterAccumulator {
    /// Accumulate in-memory rasters against a template grid.
    ///
    /// Every input is normalized onto the template and added cell-wise; the
    /// [`OUTSIDE_DOMAIN`] sentinel counts as zero. Inputs that cannot be
    /// normalized are skipped with a warning and reported, never silently
    /// added. Addition is commutative, so input order does not matter, but
    /// the whole set is always processed.
    pub fn accumulate<I>(inputs: I, template: &GridGeometry) -> (CountRaster, AccumulateReport)
    where
        I: IntoIterator<Item = (String, Array2<u8>, GridGeometry)>,
    {
        let mut total = CountRaster::zeros(template);
        let mut report = AccumulateReport::default();

        for (label, cells, geometry) in inputs {
            let widened = cells.mapv(|v| if v == OUTSIDE_DOMAIN { 0u32 } else { v as u32 });
            match ExtentNormalizer::normalize(&widened, &geometry, template, None) {
                Ok(aligned) => {
                    total.cells += &aligned;
                    report.added += 1;
                }
                Err(e) => {
                    log::warn!("Skipping {} during accumulation: {}", label, e);
                    report.skipped.push((label, e));
                }
            }
        }

        log::info!(
            "Accumulated {} rasters ({} skipped)",
            report.added,
            report.skipped.len()
        );
        (total, report)
    }

    /// Accumulate every .tif in a directory against a template grid.
    ///
    /// Unreadable files are skipped and reported like misaligned ones.
    pub fn accumulate_dir<P: AsRef<Path>>(
        directory: P,
        template: &GridGeometry,
    ) -> RangeResult<(CountRaster, AccumulateReport)> {
        let files = survey_files(directory.as_ref(), "tif")?;
        log::info!(
            "Accumulating {} rasters from {}",
            files.len(),
            directory.as_ref().display()
        );

        let mut readable = Vec::new();
        let mut unreadable = Vec::new();
        for file in files {
            let label = file.display().to_string();
            match read_band::<u8, _>(&file, 1) {
                Ok((cells, geometry)) => readable.push((label, cells, geometry)),
                Err(e) => {
                    log::warn!("Skipping unreadable raster {}: {}", label, e);
                    unreadable.push((label, e));
                }
            }
        }

        let (total, mut report) = Self::accumulate(readable, template);
        report.skipped.extend(unreadable);
        Ok((total, report))
    }
}

/// Cell-wise `count / possible`, NaN where nothing was possible.
///
/// NaN doubles as the no-data value when the result is written out, so a
/// division by zero never masquerades as 0 %.
pub fn percentage(count: &CountRaster, possible: &CountRaster) -> RangeResult<Array2<f32>> {
    if !count.geometry.same_grid(&possible.geometry) {
        return Err(RangeError::GridMismatch(
            "count and possible-count rasters are not on the same grid".to_string(),
        ));
    }

    let mut output = Array2::<f32>::zeros(count.cells.dim());
    ndarray::Zip::from(&mut output)
        .and(&count.cells)
        .and(&possible.cells)
        .for_each(|out, &c, &p| {
            *out = if p == 0 { f32::NAN } else { c as f32 / p as f32 };
        });

    Ok(output)
}

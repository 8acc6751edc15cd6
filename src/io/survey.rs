use crate::io::raster::grid_geometry;
use crate::types::{DateKey, RangeError, RangeResult, SurveyStack, SURVEY_BANDS};
use gdal::Dataset;
use ndarray::{Array2, Array3, Axis};
use std::path::{Path, PathBuf};

/// Reader for five-band survey rasters
pub struct SurveyReader;

impl SurveyReader {
    /// Read a survey file into a [`SurveyStack`].
    ///
    /// The file must carry exactly five bands and a name matching the survey
    /// convention; anything else is an error, not a silent default.
    pub fn read<P: AsRef<Path>>(path: P) -> RangeResult<SurveyStack> {
        let path = path.as_ref();
        log::info!("Reading survey: {}", path.display());

        let key = DateKey::from_path(path)?;

        let dataset = Dataset::open(path)?;
        let geometry = grid_geometry(&dataset)?;

        let found = dataset.raster_count() as usize;
        if found != SURVEY_BANDS {
            return Err(RangeError::BandCount {
                path: path.display().to_string(),
                expected: SURVEY_BANDS,
                found,
            });
        }

        let mut bands = Array3::<f32>::zeros((SURVEY_BANDS, geometry.height, geometry.width));
        for b in 0..SURVEY_BANDS {
            let rasterband = dataset.rasterband((b + 1) as isize)?;
            let band_data = rasterband.read_as::<f32>(
                (0, 0),
                (geometry.width, geometry.height),
                (geometry.width, geometry.height),
                None,
            )?;
            let band_array =
                Array2::from_shape_vec((geometry.height, geometry.width), band_data.data)
                    .map_err(|e| {
                        RangeError::Processing(format!("Failed to reshape band data: {}", e))
                    })?;
            bands.index_axis_mut(Axis(0), b).assign(&band_array);
        }

        log::debug!(
            "Survey {} is {}x{} at key {}",
            path.display(),
            geometry.width,
            geometry.height,
            key
        );

        Ok(SurveyStack {
            bands,
            geometry,
            path: path.to_path_buf(),
            key,
        })
    }
}

/// All files in a directory with the given extension, sorted by name.
///
/// The extension is matched case-insensitively, without its leading dot.
pub fn survey_files<P: AsRef<Path>>(directory: P, extension: &str) -> RangeResult<Vec<PathBuf>> {
    let wanted = extension.trim_start_matches('.');
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(wanted))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    log::debug!(
        "Found {} .{} files in {}",
        files.len(),
        wanted,
        directory.as_ref().display()
    );
    Ok(files)
}

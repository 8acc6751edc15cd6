use crate::core::accumulate::{percentage, AccumulateReport, RasterAccumulator};
use crate::core::footprint::{coverage_mask, write_footprint_shapefile, CoverageRule};
use crate::core::range_compare::{RangeBand, RangeComparator};
use crate::core::spatial::ExtentNormalizer;
use crate::io::raster::{grid_geometry, read_band, write_raster};
use crate::io::survey::{survey_files, SurveyReader};
use crate::types::{CountRaster, DateKey, RangeError, RangeResult, SurveyStack, OUTSIDE_DOMAIN};
use gdal::Dataset;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Analysis sweep parameters
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    /// Extension of the survey files to analyze.
    pub extension: String,
    /// Which deviation band bounds the acceptance range.
    pub band: RangeBand,
    /// Also write a footprint shapefile next to each comparison raster.
    pub write_footprints: bool,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            extension: "bsq".to_string(),
            band: RangeBand::Sigma,
            write_footprints: false,
        }
    }
}

/// Cooperative cancellation flag, checked between pairwise comparisons.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one pairwise comparison.
#[derive(Debug)]
pub enum PairStatus {
    /// Comparison written to this path.
    Written(PathBuf),
    /// Comparison skipped; the run carried on.
    Skipped(RangeError),
    /// The sweep was cancelled before this pair ran.
    Cancelled,
}

#[derive(Debug)]
pub struct PairOutcome {
    pub first: DateKey,
    pub second: DateKey,
    pub status: PairStatus,
}

/// Everything a run produced, including what it left out and why.
#[derive(Debug)]
pub struct AnalysisReport {
    pub pairs: Vec<PairOutcome>,
    /// Survey files that could not be keyed or read at all.
    pub bad_surveys: Vec<(PathBuf, RangeError)>,
    pub accumulate: AccumulateReport,
    pub count_path: PathBuf,
    pub percent_path: PathBuf,
    pub skip_log_path: PathBuf,
    pub cancelled: bool,
}

impl AnalysisReport {
    pub fn written(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.status, PairStatus::Written(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.status, PairStatus::Skipped(_)))
            .count()
    }
}

/// Drives the pairwise range sweep and the count/percentage outputs.
pub struct SurveyAnalysis {
    params: AnalysisParams,
    cancel: CancelToken,
}

impl SurveyAnalysis {
    pub fn new(params: AnalysisParams) -> Self {
        Self {
            params,
            cancel: CancelToken::new(),
        }
    }

    /// A handle that cancels the sweep at the next pair boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the full analysis for one survey directory.
    ///
    /// Compares every unordered survey pair, accumulates the results over
    /// the template grid, and divides by the possible-count raster. Per-pair
    /// and per-input failures are skipped and logged; an unreadable template
    /// or unwritable output directory aborts the run.
    pub fn run<P: AsRef<Path>>(
        &self,
        image_dir: P,
        template_path: P,
        possible_count_path: P,
        out_dir: P,
    ) -> RangeResult<AnalysisReport> {
        let out_dir = out_dir.as_ref();
        let prefix = self.params.band.prefix();

        let template = {
            let dataset = Dataset::open(template_path.as_ref())?;
            grid_geometry(&dataset)?
        };
        log::info!(
            "Template grid is {}x{} from {}",
            template.width,
            template.height,
            template_path.as_ref().display()
        );

        let work_dir = out_dir.join(format!("{}_outs", prefix));
        std::fs::create_dir_all(&work_dir)?;

        // Load every survey once; files that fail to key or read are
        // recorded and the sweep runs on the rest.
        let mut surveys: Vec<SurveyStack> = Vec::new();
        let mut bad_surveys = Vec::new();
        for file in survey_files(image_dir.as_ref(), &self.params.extension)? {
            match SurveyReader::read(&file) {
                Ok(stack) => surveys.push(stack),
                Err(e) => {
                    log::warn!("Leaving {} out of the sweep: {}", file.display(), e);
                    bad_surveys.push((file, e));
                }
            }
        }
        log::info!(
            "Sweeping {} surveys ({} unusable)",
            surveys.len(),
            bad_surveys.len()
        );

        let pairs: Vec<(usize, usize)> = (0..surveys.len())
            .flat_map(|i| (i + 1..surveys.len()).map(move |j| (i, j)))
            .collect();

        let comparator = RangeComparator::new(self.params.band);
        let compare_pair = |&(i, j): &(usize, usize)| -> PairOutcome {
            let (a, b) = (&surveys[i], &surveys[j]);
            if self.cancel.is_cancelled() {
                return PairOutcome {
                    first: a.key.clone(),
                    second: b.key.clone(),
                    status: PairStatus::Cancelled,
                };
            }

            let status = match comparator.compare(a, b) {
                Ok(result) => {
                    let path = work_dir.join(format!("{}_TO_{}.tif", a.key, b.key));
                    let written = write_raster(
                        &result.cells,
                        &result.geometry,
                        &path,
                        Some(f64::from(OUTSIDE_DOMAIN)),
                    )
                    .and_then(|()| {
                        if self.params.write_footprints {
                            // The compared domain is exactly the 0/1 cells;
                            // the 255 no-data frame stays outside the footprint.
                            let mask = coverage_mask(
                                &result.cells.mapv(f32::from),
                                CoverageRule::ZeroOrOne,
                            );
                            write_footprint_shapefile(
                                &mask,
                                &result.geometry,
                                path.with_extension("shp"),
                            )?;
                        }
                        Ok(())
                    });
                    match written {
                        Ok(()) => PairStatus::Written(path),
                        Err(e) => {
                            log::warn!("Failed to write pair {} TO {}: {}", a.key, b.key, e);
                            PairStatus::Skipped(e)
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Skipping pair {} TO {}: {}", a.key, b.key, e);
                    PairStatus::Skipped(e)
                }
            };
            PairOutcome {
                first: a.key.clone(),
                second: b.key.clone(),
                status,
            }
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<PairOutcome> = pairs.par_iter().map(compare_pair).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<PairOutcome> = pairs.iter().map(compare_pair).collect();

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            log::warn!("Sweep cancelled; accumulating whatever was written");
        }

        // The working directory now holds every successful comparison.
        let (count, accumulate) = RasterAccumulator::accumulate_dir(&work_dir, &template)?;
        let count_path = out_dir.join(format!("{}_true_count.tif", prefix));
        write_raster(&count.cells, &count.geometry, &count_path, None)?;

        let (possible_cells, possible_geometry) =
            read_band::<u32, _>(possible_count_path.as_ref(), 1)?;
        let possible = CountRaster {
            cells: ExtentNormalizer::normalize(&possible_cells, &possible_geometry, &template, None)?,
            geometry: template.clone(),
        };
        let percent = percentage(&count, &possible)?;
        let percent_path = out_dir.join(format!("{}_percent.tif", prefix));
        write_raster(&percent, &template, &percent_path, Some(f64::NAN))?;

        let skip_log_path = out_dir.join("skipped_pairs.log");
        let report = AnalysisReport {
            pairs: outcomes,
            bad_surveys,
            accumulate,
            count_path,
            percent_path,
            skip_log_path: skip_log_path.clone(),
            cancelled,
        };
        write_skip_log(&report, &skip_log_path)?;

        log::info!(
            "Sweep finished: {} comparisons written, {} skipped",
            report.written(),
            report.skipped()
        );
        Ok(report)
    }
}

fn write_skip_log(report: &AnalysisReport, path: &Path) -> RangeResult<()> {
    let mut file = std::fs::File::create(path)?;
    let stamp = chrono::Utc::now().to_rfc3339();

    for (survey, error) in &report.bad_surveys {
        writeln!(file, "{} SURVEY {}: {}", stamp, survey.display(), error)?;
    }
    for pair in &report.pairs {
        match &pair.status {
            PairStatus::Skipped(e) => {
                writeln!(file, "{} PAIR {} TO {}: {}", stamp, pair.first, pair.second, e)?;
            }
            PairStatus::Cancelled => {
                writeln!(file, "{} PAIR {} TO {}: cancelled", stamp, pair.first, pair.second)?;
            }
            PairStatus::Written(_) => {}
        }
    }
    for (input, error) in &report.accumulate.skipped {
        writeln!(file, "{} ACCUMULATE {}: {}", stamp, input, error)?;
    }

    Ok(())
}

//! bandrange: agreement analysis for repeated multi-band survey rasters
//!
//! Compares repeated surveys of the same terrain pairwise with a per-pixel
//! band-range test, accumulates the binary results into count and percentage
//! rasters over a template grid, and burns image coverage footprints into
//! visit-count rasters.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    ComparisonRaster, CountRaster, DateKey, GeoTransform, GridGeometry, RangeError, RangeResult,
    StatBand, SurveyStack, OUTSIDE_DOMAIN,
};

pub use io::{survey_files, SurveyReader};

pub use core::{
    percentage, AnalysisParams, AnalysisReport, CancelToken, CoverageRule, ExtentNormalizer,
    FootprintBurner, RangeBand, RangeComparator, RasterAccumulator, SurveyAnalysis,
};

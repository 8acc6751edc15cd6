//! Core analysis modules

pub mod accumulate;
pub mod footprint;
pub mod pipeline;
pub mod range_compare;
pub mod spatial;

// Re-export main types
pub use accumulate::{percentage, AccumulateReport, RasterAccumulator};
pub use footprint::{
    coverage_mask, footprint_polygons, write_footprint_shapefile, BurnReport, CoverageRule,
    FootprintBurner,
};
pub use pipeline::{
    AnalysisParams, AnalysisReport, CancelToken, PairOutcome, PairStatus, SurveyAnalysis,
};
pub use range_compare::{RangeBand, RangeComparator};
pub use spatial::ExtentNormalizer;

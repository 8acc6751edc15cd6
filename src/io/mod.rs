//! Raster and survey file I/O

pub mod raster;
pub mod survey;

pub use raster::{grid_geometry, read_band, write_raster, write_zero_template};
pub use survey::{survey_files, SurveyReader};

use chrono::NaiveDate;
use ndarray::{Array2, Array3, ArrayView2};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Sentinel value marking cells outside the comparison domain.
///
/// Distinguishes "never compared here" from "compared and disagreed" (0).
pub const OUTSIDE_DOMAIN: u8 = 255;

/// Relative tolerance used when checking grid alignment.
pub const GRID_TOL: f64 = 1e-6;

/// The five statistical bands of a survey raster, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatBand {
    /// Mean + 1.96 standard deviations (band 1 in the file)
    Plus196,
    /// Mean + 1 standard deviation
    PlusStdev,
    /// Per-pixel mean of the survey
    Mean,
    /// Mean - 1 standard deviation
    MinusStdev,
    /// Mean - 1.96 standard deviations
    Minus196,
}

impl StatBand {
    /// Zero-based band index within the survey file.
    pub fn index(self) -> usize {
        match self {
            StatBand::Plus196 => 0,
            StatBand::PlusStdev => 1,
            StatBand::Mean => 2,
            StatBand::MinusStdev => 3,
            StatBand::Minus196 => 4,
        }
    }
}

/// Number of bands every survey raster carries.
pub const SURVEY_BANDS: usize = 5;

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// True when both rotation terms are zero (a north-up grid).
    ///
    /// All pixel/world math in this crate assumes north-up transforms;
    /// rotated rasters are rejected when their grid is read.
    pub fn is_north_up(&self) -> bool {
        let tol = self.pixel_width.abs().max(self.pixel_height.abs()) * GRID_TOL;
        self.rotation_x.abs() <= tol && self.rotation_y.abs() <= tol
    }
}

/// Pixel grid of a raster: shape, affine transform, and spatial reference.
///
/// Carried explicitly through every operation instead of living in ambient
/// process state, so each transform sees exactly the frame it was given.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    /// Projection as WKT; empty when the source carries none.
    pub projection: String,
}

/// Overlapping pixel window between two aligned grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    /// Window origin within the first grid (col, row).
    pub a_off: (usize, usize),
    /// Window origin within the second grid (col, row).
    pub b_off: (usize, usize),
    pub cols: usize,
    pub rows: usize,
}

impl GridGeometry {
    pub fn cell_size(&self) -> (f64, f64) {
        (self.transform.pixel_width, self.transform.pixel_height)
    }

    /// World coordinates of the upper-left corner of pixel (col, row).
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.transform.top_left_x + col * self.transform.pixel_width,
            self.transform.top_left_y + row * self.transform.pixel_height,
        )
    }

    /// Fractional pixel coordinates of a world point.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.transform.top_left_x) / self.transform.pixel_width,
            (y - self.transform.top_left_y) / self.transform.pixel_height,
        )
    }

    /// True when both grids share shape, transform, and projection.
    /// Rotated transforms never count as the same grid.
    pub fn same_grid(&self, other: &GridGeometry) -> bool {
        let tol = self.transform.pixel_width.abs() * GRID_TOL;
        self.transform.is_north_up()
            && other.transform.is_north_up()
            && self.width == other.width
            && self.height == other.height
            && self.projection == other.projection
            && (self.transform.top_left_x - other.transform.top_left_x).abs() <= tol
            && (self.transform.top_left_y - other.transform.top_left_y).abs() <= tol
            && (self.transform.pixel_width - other.transform.pixel_width).abs() <= tol
            && (self.transform.pixel_height - other.transform.pixel_height).abs() <= tol
    }

    /// True when both grids share cell size and projection and their origins
    /// differ by a whole number of cells (same snap).
    pub fn aligned_with(&self, other: &GridGeometry) -> bool {
        if self.projection != other.projection {
            return false;
        }
        // A rotated grid cannot snap onto a north-up lattice, and the
        // origin-offset arithmetic below would silently ignore the rotation.
        if !self.transform.is_north_up() || !other.transform.is_north_up() {
            return false;
        }
        let (pw, ph) = self.cell_size();
        let (ow, oh) = other.cell_size();
        if (pw - ow).abs() > pw.abs() * GRID_TOL || (ph - oh).abs() > ph.abs() * GRID_TOL {
            return false;
        }
        let dx = (other.transform.top_left_x - self.transform.top_left_x) / pw;
        let dy = (other.transform.top_left_y - self.transform.top_left_y) / ph;
        (dx - dx.round()).abs() <= GRID_TOL && (dy - dy.round()).abs() <= GRID_TOL
    }

    /// Integer pixel offset of `other`'s origin within this grid.
    ///
    /// Only meaningful when `aligned_with(other)` holds.
    pub fn offset_of(&self, other: &GridGeometry) -> (i64, i64) {
        let (pw, ph) = self.cell_size();
        let dx = (other.transform.top_left_x - self.transform.top_left_x) / pw;
        let dy = (other.transform.top_left_y - self.transform.top_left_y) / ph;
        (dx.round() as i64, dy.round() as i64)
    }

    /// Overlapping pixel window of two aligned grids, or None when the
    /// extents do not intersect.
    pub fn intersection(&self, other: &GridGeometry) -> Option<Overlap> {
        let (dx, dy) = self.offset_of(other);

        let col_start = dx.max(0);
        let col_end = (dx + other.width as i64).min(self.width as i64);
        let row_start = dy.max(0);
        let row_end = (dy + other.height as i64).min(self.height as i64);

        if col_end <= col_start || row_end <= row_start {
            return None;
        }

        Some(Overlap {
            a_off: (col_start as usize, row_start as usize),
            b_off: ((col_start - dx) as usize, (row_start - dy) as usize),
            cols: (col_end - col_start) as usize,
            rows: (row_end - row_start) as usize,
        })
    }

    /// Geometry of a sub-window of this grid.
    pub fn window(&self, col_off: usize, row_off: usize, cols: usize, rows: usize) -> GridGeometry {
        let (x, y) = self.pixel_to_world(col_off as f64, row_off as f64);
        GridGeometry {
            width: cols,
            height: rows,
            transform: GeoTransform {
                top_left_x: x,
                top_left_y: y,
                ..self.transform
            },
            projection: self.projection.clone(),
        }
    }
}

/// Survey identity parsed from a raster file name.
///
/// The naming convention is `<1 char><MMDDYY><7 chars><2-char sub-index>...`;
/// names that do not match fail with [`RangeError::BadSurveyName`] instead of
/// yielding a garbage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey {
    /// Survey date, validated as a real calendar date.
    pub date: NaiveDate,
    /// Two-character sub-index distinguishing same-day flight lines.
    pub sub_index: String,
    /// The six date characters exactly as they appear in the file name.
    raw_date: String,
}

fn survey_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^.(\d{6}).{7}([0-9A-Za-z]{2})").expect("survey name pattern is valid")
    })
}

impl DateKey {
    /// Parse a survey key from a file path's base name.
    pub fn from_path<P: AsRef<Path>>(path: P) -> RangeResult<DateKey> {
        let name = path
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let caps = survey_name_pattern()
            .captures(name)
            .ok_or_else(|| RangeError::BadSurveyName(name.to_string()))?;

        let raw_date = caps[1].to_string();
        let date = NaiveDate::parse_from_str(&raw_date, "%m%d%y")
            .map_err(|_| RangeError::BadSurveyName(name.to_string()))?;

        Ok(DateKey {
            date,
            sub_index: caps[2].to_string(),
            raw_date,
        })
    }
}

impl std::fmt::Display for DateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.raw_date, self.sub_index)
    }
}

/// One survey: five co-registered statistical bands over a common grid.
#[derive(Debug, Clone)]
pub struct SurveyStack {
    /// Band data indexed (band, row, col), bands in [`StatBand`] file order.
    pub bands: Array3<f32>,
    pub geometry: GridGeometry,
    pub path: PathBuf,
    pub key: DateKey,
}

impl SurveyStack {
    pub fn band(&self, band: StatBand) -> ArrayView2<'_, f32> {
        self.bands.index_axis(ndarray::Axis(0), band.index())
    }

    /// A cell holds real data unless every band reads 0 there.
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        (0..SURVEY_BANDS).any(|b| self.bands[[b, row, col]] != 0.0)
    }
}

/// Binary agreement raster over the intersection window of a survey pair.
///
/// Cells are 1 (mean in range), 0 (mean out of range), or
/// [`OUTSIDE_DOMAIN`] where either survey lacked data.
#[derive(Debug, Clone)]
pub struct ComparisonRaster {
    pub cells: Array2<u8>,
    pub geometry: GridGeometry,
}

/// Accumulated agreement or visit counts over a template grid.
///
/// u32 cells leave ample headroom over any plausible number of survey pairs.
#[derive(Debug, Clone)]
pub struct CountRaster {
    pub cells: Array2<u32>,
    pub geometry: GridGeometry,
}

impl CountRaster {
    /// Zero-filled count raster over a template grid.
    pub fn zeros(template: &GridGeometry) -> CountRaster {
        CountRaster {
            cells: Array2::zeros((template.height, template.width)),
            geometry: template.clone(),
        }
    }
}

/// Error types for range analysis
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("survey name '{0}' does not match <char><MMDDYY><7 chars><2-char index>")]
    BadSurveyName(String),

    #[error("expected {expected} bands in {path}, found {found}")]
    BandCount {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("no overlapping data between the two surveys")]
    EmptyIntersection,

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for range analysis operations
pub type RangeResult<T> = Result<T, RangeError>;

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_date_key_parse() {
        let key = DateKey::from_path("f060513_refl_5band_img.bsq").unwrap();
        assert_eq!(key.date, NaiveDate::from_ymd_opt(2013, 6, 5).unwrap());
        assert_eq!(key.sub_index, "ba");
        assert_eq!(key.to_string(), "060513_ba");
    }

    #[test]
    fn test_date_key_rejects_short_name() {
        assert!(matches!(
            DateKey::from_path("short.bsq"),
            Err(RangeError::BadSurveyName(_))
        ));
    }

    #[test]
    fn test_date_key_rejects_impossible_date() {
        // Month 13 slices fine positionally but is not a date.
        assert!(matches!(
            DateKey::from_path("f130513_refl_5band_img.bsq"),
            Err(RangeError::BadSurveyName(_))
        ));
    }

    #[test]
    fn test_date_key_ordering() {
        let a = DateKey::from_path("f060513_refl_5band_img.bsq").unwrap();
        let b = DateKey::from_path("f071513_refl_5band_img.bsq").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_intersection_overlapping() {
        let a = grid(0.0, 100.0, 10, 10);
        let b = grid(50.0, 80.0, 10, 10);
        assert!(a.aligned_with(&b));

        let overlap = a.intersection(&b).unwrap();
        assert_eq!(overlap.a_off, (5, 2));
        assert_eq!(overlap.b_off, (0, 0));
        assert_eq!(overlap.cols, 5);
        assert_eq!(overlap.rows, 8);
    }

    #[test]
    fn test_intersection_disjoint() {
        let a = grid(0.0, 100.0, 10, 10);
        let b = grid(500.0, 100.0, 10, 10);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_misaligned_grids() {
        let a = grid(0.0, 100.0, 10, 10);
        let b = grid(3.0, 100.0, 10, 10); // origin off the 10 m lattice
        assert!(!a.aligned_with(&b));
    }

    #[test]
    fn test_rotated_grid_is_never_aligned() {
        let a = grid(0.0, 100.0, 10, 10);
        let mut b = grid(0.0, 100.0, 10, 10);
        b.transform.rotation_x = 5.0;

        assert!(!a.aligned_with(&b));
        assert!(!b.aligned_with(&a));
        assert!(!a.same_grid(&b));
        assert!(a.aligned_with(&a));
    }

    #[test]
    fn test_window_geometry() {
        let a = grid(0.0, 100.0, 10, 10);
        let w = a.window(5, 2, 5, 8);
        assert_eq!(w.transform.top_left_x, 50.0);
        assert_eq!(w.transform.top_left_y, 80.0);
        assert_eq!((w.width, w.height), (5, 8));
    }

    #[test]
    fn test_stat_band_indices() {
        assert_eq!(StatBand::Mean.index(), 2);
        assert_eq!(StatBand::PlusStdev.index(), 1);
        assert_eq!(StatBand::MinusStdev.index(), 3);
    }
}

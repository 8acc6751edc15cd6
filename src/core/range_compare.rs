use crate::types::{
    ComparisonRaster, RangeError, RangeResult, StatBand, SurveyStack, OUTSIDE_DOMAIN,
};
use ndarray::Array2;

/// Which pair of bands bounds the acceptance range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBand {
    /// One standard deviation around the mean
    Sigma,
    /// 1.96 standard deviations around the mean (the wide variant)
    Sigma196,
}

impl RangeBand {
    /// (lower, upper) bound bands of the acceptance range.
    pub fn bounds(self) -> (StatBand, StatBand) {
        match self {
            RangeBand::Sigma => (StatBand::MinusStdev, StatBand::PlusStdev),
            RangeBand::Sigma196 => (StatBand::Minus196, StatBand::Plus196),
        }
    }

    /// Short name used in output file and directory names.
    pub fn prefix(self) -> &'static str {
        match self {
            RangeBand::Sigma => "stdev",
            RangeBand::Sigma196 => "196stdev",
        }
    }
}

/// Pairwise band-range comparator.
///
/// Tests, per pixel, whether the first survey's mean falls inside the second
/// survey's deviation range. The test is asymmetric: swapping the inputs
/// swaps which survey supplies the mean and which the range.
pub struct RangeComparator {
    band: RangeBand,
}

impl RangeComparator {
    pub fn new(band: RangeBand) -> Self {
        Self { band }
    }

    /// Compare two surveys over the intersection of their valid data.
    ///
    /// Output cells are 1 where `a`'s mean lies within `b`'s range, 0 where
    /// it does not, and [`OUTSIDE_DOMAIN`] where either survey has no data.
    /// Surveys whose extents or valid-data footprints do not overlap yield
    /// [`RangeError::EmptyIntersection`]; grids that cannot be co-registered
    /// yield [`RangeError::GridMismatch`].
    pub fn compare(&self, a: &SurveyStack, b: &SurveyStack) -> RangeResult<ComparisonRaster> {
        log::info!("Comparing {} against {}", a.key, b.key);

        if !a.geometry.aligned_with(&b.geometry) {
            return Err(RangeError::GridMismatch(format!(
                "surveys {} and {} are not on the same pixel lattice",
                a.key, b.key
            )));
        }

        let overlap = a
            .geometry
            .intersection(&b.geometry)
            .ok_or(RangeError::EmptyIntersection)?;

        let (lower, upper) = self.band.bounds();
        let mean = a.band(StatBand::Mean);
        let lower_bound = b.band(lower);
        let upper_bound = b.band(upper);

        let (a_col, a_row) = overlap.a_off;
        let (b_col, b_row) = overlap.b_off;

        let mut cells = Array2::from_elem((overlap.rows, overlap.cols), OUTSIDE_DOMAIN);
        let mut any_valid = false;

        for row in 0..overlap.rows {
            for col in 0..overlap.cols {
                let (ar, ac) = (a_row + row, a_col + col);
                let (br, bc) = (b_row + row, b_col + col);

                if !a.is_valid(ar, ac) || !b.is_valid(br, bc) {
                    continue;
                }
                any_valid = true;

                let m = mean[[ar, ac]];
                let in_range = m >= lower_bound[[br, bc]] && m <= upper_bound[[br, bc]];
                cells[[row, col]] = in_range as u8;
            }
        }

        // Extents overlap but the data does not; same outcome as disjoint
        // footprints.
        if !any_valid {
            return Err(RangeError::EmptyIntersection);
        }

        let geometry = a.geometry.window(a_col, a_row, overlap.cols, overlap.rows);
        log::debug!(
            "Comparison window {}x{} at ({}, {})",
            overlap.cols,
            overlap.rows,
            a_col,
            a_row
        );

        Ok(ComparisonRaster { cells, geometry })
    }
}

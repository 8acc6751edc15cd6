use crate::types::{GeoTransform, GridGeometry, RangeError, RangeResult};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Read the pixel grid of an open dataset.
///
/// Only north-up grids are supported; a geotransform with rotation terms
/// is a [`RangeError::GridMismatch`], not a silently mis-placed raster.
pub fn grid_geometry(dataset: &Dataset) -> RangeResult<GridGeometry> {
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    if !transform.is_north_up() {
        return Err(RangeError::GridMismatch(format!(
            "rotated geotransform (rotation terms {}, {}); only north-up grids are supported",
            transform.rotation_x, transform.rotation_y
        )));
    }
    let projection = dataset.projection();

    Ok(GridGeometry {
        width,
        height,
        transform,
        projection,
    })
}

/// Read one band of a raster file into an array, along with its grid.
///
/// `band` is 1-based, as GDAL counts them.
pub fn read_band<T, P>(path: P, band: usize) -> RangeResult<(Array2<T>, GridGeometry)>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    log::debug!("Reading band {} of {}", band, path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let geometry = grid_geometry(&dataset)?;

    let rasterband = dataset.rasterband(band as isize)?;
    let band_data = rasterband.read_as::<T>(
        (0, 0),
        (geometry.width, geometry.height),
        (geometry.width, geometry.height),
        None,
    )?;

    let cells = Array2::from_shape_vec((geometry.height, geometry.width), band_data.data)
        .map_err(|e| RangeError::Processing(format!("Failed to reshape band data: {}", e)))?;

    Ok((cells, geometry))
}

/// Create a zero-filled single-band template raster on the grid of an
/// existing raster, and return that grid.
///
/// Count and visit rasters start from such a template so every run covers
/// the same fixed extent.
pub fn write_zero_template<P: AsRef<Path>>(base_path: P, output_path: P) -> RangeResult<GridGeometry> {
    let base = Dataset::open(base_path.as_ref())?;
    let geometry = grid_geometry(&base)?;

    let zeros = Array2::<u32>::zeros((geometry.height, geometry.width));
    write_raster(&zeros, &geometry, output_path, None)?;
    Ok(geometry)
}

/// Write a single-band GeoTIFF at the given grid.
pub fn write_raster<T, P>(
    cells: &Array2<T>,
    geometry: &GridGeometry,
    output_path: P,
    no_data: Option<f64>,
) -> RangeResult<()>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    log::debug!("Writing raster: {}", output_path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = cells.dim();

    if width != geometry.width || height != geometry.height {
        return Err(RangeError::GridMismatch(format!(
            "array is {}x{} but grid says {}x{}",
            width, height, geometry.width, geometry.height
        )));
    }

    let mut dataset =
        driver.create_with_band_type::<T, _>(output_path.as_ref(), width as isize, height as isize, 1)?;

    dataset.set_geo_transform(&geometry.transform.to_gdal())?;
    if !geometry.projection.is_empty() {
        dataset.set_projection(&geometry.projection)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<T> = cells.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    if no_data.is_some() {
        rasterband.set_no_data_value(no_data)?;
    }

    Ok(())
}

use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pixel values of every band, raw digital numbers included
pub type PixelValue = f64;

/// 2D band data array (rows x cols)
pub type BandData = Array2<PixelValue>;

/// 2D per-pixel validity (true = usable)
pub type ValidityMask = Array2<bool>;

/// Affine georeferencing parameters, GDAL ordering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels of `resolution` map units
    pub fn north_up(top_left_x: f64, top_left_y: f64, resolution: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: resolution,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -resolution,
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::north_up(0.0, 0.0, 1.0)
    }
}

/// Spatial grid shared by every band of an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub geo_transform: GeoTransform,
    pub epsg: Option<u32>,
}

impl GridSpec {
    /// Grid of the given size with a unit north-up transform and no CRS
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            geo_transform: GeoTransform::default(),
            epsg: None,
        }
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = geo_transform;
        self
    }

    pub fn with_epsg(mut self, epsg: u32) -> Self {
        self.epsg = Some(epsg);
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Fail with `ShapeMismatch` unless `shape` equals this grid's shape
    pub fn ensure_shape(&self, shape: (usize, usize), what: &str) -> RasterResult<()> {
        if shape != self.shape() {
            return Err(RasterError::ShapeMismatch(format!(
                "{} is {}x{}, grid is {}x{}",
                what, shape.0, shape.1, self.rows, self.cols
            )));
        }
        Ok(())
    }

    /// Fail with `ShapeMismatch` unless both grids are identical
    pub fn ensure_same(&self, other: &GridSpec, what: &str) -> RasterResult<()> {
        self.ensure_shape(other.shape(), what)?;
        if self.geo_transform != other.geo_transform || self.epsg != other.epsg {
            return Err(RasterError::ShapeMismatch(format!(
                "{} is georeferenced differently ({:?}, EPSG {:?} vs {:?}, EPSG {:?})",
                what, other.geo_transform, other.epsg, self.geo_transform, self.epsg
            )));
        }
        Ok(())
    }
}

/// Scalar image metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Text(String),
    Time(DateTime<Utc>),
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            PropertyValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(s) => write!(f, "{}", s),
            PropertyValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        PropertyValue::Time(v)
    }
}

/// One named layer of a raster image with its own validity mask
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    name: String,
    data: BandData,
    mask: ValidityMask,
}

impl Band {
    /// Create a band; every finite value is valid
    pub fn new(name: impl Into<String>, data: BandData) -> Self {
        let mask = data.mapv(|v| v.is_finite());
        Self {
            name: name.into(),
            data,
            mask,
        }
    }

    /// Create a band with an explicit mask of the same shape
    pub fn with_mask(
        name: impl Into<String>,
        data: BandData,
        mask: ValidityMask,
    ) -> RasterResult<Self> {
        let name = name.into();
        if data.dim() != mask.dim() {
            return Err(RasterError::ShapeMismatch(format!(
                "mask of band '{}' is {:?}, data is {:?}",
                name,
                mask.dim(),
                data.dim()
            )));
        }
        Ok(Self { name, data, mask })
    }

    /// Create a band from an integer array (QA bitfields, raw DN)
    pub fn from_integers<T>(name: impl Into<String>, data: &Array2<T>) -> Self
    where
        T: Copy + Into<f64>,
    {
        Self::new(name, data.mapv(|v| v.into()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &BandData {
        &self.data
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Value at (row, col), `None` when masked or out of range
    pub fn value(&self, row: usize, col: usize) -> Option<PixelValue> {
        match self.mask.get((row, col)) {
            Some(true) => self.data.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Same name and mask, values transformed by `f`
    pub fn map_values<F>(&self, f: F) -> Band
    where
        F: Fn(PixelValue) -> PixelValue,
    {
        Band {
            name: self.name.clone(),
            data: self.data.mapv(f),
            mask: self.mask.clone(),
        }
    }

    /// Same data and mask under another name
    pub fn renamed(mut self, name: impl Into<String>) -> Band {
        self.name = name.into();
        self
    }

    pub(crate) fn narrow_mask(&mut self, mask: &ValidityMask) {
        Zip::from(&mut self.mask).and(mask).for_each(|m, &keep| *m = *m && keep);
    }
}

/// In-memory multi-band raster tile
///
/// Bands keep their insertion order and share the image grid. Processing
/// stages never mutate their input; they clone and return a new image.
#[derive(Debug, Clone)]
pub struct RasterImage {
    id: String,
    time_start: DateTime<Utc>,
    grid: GridSpec,
    bands: Vec<Band>,
    properties: BTreeMap<String, PropertyValue>,
}

impl RasterImage {
    /// Create an image with no bands
    pub fn new(id: impl Into<String>, time_start: DateTime<Utc>, grid: GridSpec) -> Self {
        Self {
            id: id.into(),
            time_start,
            grid,
            bands: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder form of [`RasterImage::set_band`]
    pub fn with_band(mut self, band: Band) -> RasterResult<Self> {
        self.set_band(band)?;
        Ok(self)
    }

    /// Builder form of [`RasterImage::set_property`]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn time_start(&self) -> DateTime<Utc> {
        self.time_start
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn shape(&self) -> (usize, usize) {
        self.grid.shape()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name()).collect()
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.band(name).is_some()
    }

    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.name == name)
    }

    /// Band lookup that fails with `MissingBand`
    pub fn require_band(&self, name: &str) -> RasterResult<&Band> {
        self.band(name).ok_or_else(|| {
            RasterError::MissingBand(format!("'{}' not found in image '{}'", name, self.id))
        })
    }

    /// Add a band, or overwrite the band of the same name in place
    pub fn set_band(&mut self, band: Band) -> RasterResult<()> {
        self.grid
            .ensure_shape(band.dim(), &format!("band '{}'", band.name))?;

        match self.bands.iter_mut().find(|b| b.name == band.name) {
            Some(existing) => *existing = band,
            None => self.bands.push(band),
        }
        Ok(())
    }

    pub fn remove_band(&mut self, name: &str) -> Option<Band> {
        let position = self.bands.iter().position(|b| b.name == name)?;
        Some(self.bands.remove(position))
    }

    /// Copy restricted to `names`, in the order given
    pub fn select(&self, names: &[&str]) -> RasterResult<RasterImage> {
        let mut selected = RasterImage {
            id: self.id.clone(),
            time_start: self.time_start,
            grid: self.grid.clone(),
            bands: Vec::with_capacity(names.len()),
            properties: self.properties.clone(),
        };
        for name in names {
            selected.bands.push(self.require_band(name)?.clone());
        }
        Ok(selected)
    }

    /// Narrow the mask of every band; pixels already invalid stay invalid
    pub fn update_mask(&mut self, mask: &ValidityMask) -> RasterResult<()> {
        self.grid.ensure_shape(mask.dim(), "mask")?;
        for band in &mut self.bands {
            band.narrow_mask(mask);
        }
        Ok(())
    }

    /// Image-wide validity: a pixel is valid only if valid in every band
    pub fn valid_mask(&self) -> ValidityMask {
        let mut mask = ValidityMask::from_elem(self.shape(), true);
        for band in &self.bands {
            Zip::from(&mut mask)
                .and(band.mask())
                .for_each(|m, &valid| *m = *m && valid);
        }
        mask
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }
}

/// Error types for raster processing
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing band: {0}")]
    MissingBand(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid bucket configuration: {0}")]
    InvalidBucketConfig(String),

    #[error("Unknown quality flag: {0}")]
    UnknownFlag(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty image sequence: {0}")]
    EmptySequence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

impl RasterError {
    /// Short kind name used in failure records and logs
    pub fn kind(&self) -> &'static str {
        match self {
            RasterError::Io(_) => "Io",
            RasterError::MissingBand(_) => "MissingBand",
            RasterError::ShapeMismatch(_) => "ShapeMismatch",
            RasterError::InvalidBucketConfig(_) => "InvalidBucketConfig",
            RasterError::UnknownFlag(_) => "UnknownFlag",
            RasterError::InvalidParameter(_) => "InvalidParameter",
            RasterError::EmptySequence(_) => "EmptySequence",
            RasterError::Config(_) => "Config",
            RasterError::XmlParsing(_) => "XmlParsing",
        }
    }
}

/// Result type for raster operations
pub type RasterResult<T> = Result<T, RasterError>;

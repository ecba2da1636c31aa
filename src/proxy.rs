//! Façades forwarding every call to a lazily acquired resource.
//!
//! A [`DatasetSource`] / [`BandSource`] knows how to borrow the underlying
//! object for the duration of one call. [`ProxyDataset`] and [`ProxyBand`]
//! implement the full raster interfaces on top of that capability: acquire,
//! forward, release. When the resource cannot be acquired, each call
//! returns the failure value of its return type (`Err`, `None`, zero or an
//! empty list); the cause has already been reported through
//! [`crate::diag`].

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, Weak};

use crate::constants::MaskFlags;
use crate::diag;
use crate::error::{Error, Result};
use crate::pool::{PoolGuard, PoolKey, PoolRef};
use crate::raster::{Dataset, InternalHandle, RasterBand};
use crate::types::{Access, ColorInterp, DataType, Gcp, GeoTransform, MetadataList, Window};

/// A borrowed dataset, released when dropped
pub enum DatasetLease {
    Pooled(PoolGuard),
    Direct(Arc<dyn Dataset>),
}

impl DatasetLease {
    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        match self {
            DatasetLease::Pooled(guard) => guard.dataset(),
            DatasetLease::Direct(ds) => ds,
        }
    }
}

impl Deref for DatasetLease {
    type Target = dyn Dataset;

    fn deref(&self) -> &Self::Target {
        &**self.dataset()
    }
}

/// Capability to borrow an underlying dataset
pub trait DatasetSource: Send + Sync {
    fn acquire(&self) -> Result<DatasetLease>;

    fn release(&self, lease: DatasetLease) {
        drop(lease);
    }

    /// Identifier of the underlying resource
    fn describe(&self) -> &str;

    /// Whether borrowed handles may be closed between calls
    fn is_pooled(&self) -> bool {
        false
    }
}

/// Dataset borrowed from a [`crate::pool::ResourcePool`]
#[derive(Debug, Clone)]
pub struct PooledSource {
    pool: PoolRef,
    key: PoolKey,
    shared: bool,
}

impl PooledSource {
    pub fn new(pool: PoolRef, key: PoolKey, shared: bool) -> Self {
        PooledSource { pool, key, shared }
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn pool(&self) -> &PoolRef {
        &self.pool
    }
}

impl DatasetSource for PooledSource {
    fn acquire(&self) -> Result<DatasetLease> {
        let pool = self.pool.get().ok_or_else(|| diag::fail(Error::PoolDestroyed))?;
        pool.acquire(&self.key, self.shared).map(DatasetLease::Pooled)
    }

    fn describe(&self) -> &str {
        &self.key.path
    }

    fn is_pooled(&self) -> bool {
        true
    }
}

/// Dataset wrapped directly, never closed by the façade
pub struct DirectSource {
    dataset: Arc<dyn Dataset>,
    description: String,
}

impl DirectSource {
    pub fn new(dataset: Arc<dyn Dataset>) -> Self {
        let description = dataset.description();
        DirectSource {
            dataset,
            description,
        }
    }
}

impl DatasetSource for DirectSource {
    fn acquire(&self) -> Result<DatasetLease> {
        Ok(DatasetLease::Direct(self.dataset.clone()))
    }

    fn describe(&self) -> &str {
        &self.description
    }
}

/// A borrowed band; keeps its dataset lease alive until dropped
pub struct BandLease {
    band: Arc<dyn RasterBand>,
    _dataset: Option<DatasetLease>,
}

impl BandLease {
    pub fn new(band: Arc<dyn RasterBand>, dataset: Option<DatasetLease>) -> Self {
        BandLease {
            band,
            _dataset: dataset,
        }
    }

    pub fn band(&self) -> &Arc<dyn RasterBand> {
        &self.band
    }

    /// Re-borrow `band` under the same dataset lease
    pub fn map(self, band: Arc<dyn RasterBand>) -> Self {
        BandLease {
            band,
            _dataset: self._dataset,
        }
    }
}

impl Deref for BandLease {
    type Target = dyn RasterBand;

    fn deref(&self) -> &Self::Target {
        &*self.band
    }
}

/// Capability to borrow an underlying band
pub trait BandSource: Send + Sync {
    fn acquire_band(&self) -> Result<BandLease>;

    fn describe(&self) -> String;

    fn is_pooled(&self) -> bool {
        false
    }
}

/// Band `index` of a dataset source
pub struct DatasetBandSource {
    dataset: Arc<dyn DatasetSource>,
    index: usize,
}

impl DatasetBandSource {
    pub fn new(dataset: Arc<dyn DatasetSource>, index: usize) -> Self {
        DatasetBandSource { dataset, index }
    }
}

impl BandSource for DatasetBandSource {
    fn acquire_band(&self) -> Result<BandLease> {
        let lease = self.dataset.acquire()?;
        let band = lease.band(self.index).ok_or_else(|| {
            diag::fail(Error::BandOutOfRange {
                index: self.index,
                count: lease.band_count(),
            })
        })?;
        Ok(BandLease::new(band, Some(lease)))
    }

    fn describe(&self) -> String {
        format!("{}, band {}", self.dataset.describe(), self.index)
    }

    fn is_pooled(&self) -> bool {
        self.dataset.is_pooled()
    }
}

/// Overview `index` of a parent band, resolved again on every call
pub struct OverviewSource {
    parent: Arc<dyn BandSource>,
    index: usize,
}

impl OverviewSource {
    pub fn new(parent: Arc<dyn BandSource>, index: usize) -> Self {
        OverviewSource { parent, index }
    }
}

impl BandSource for OverviewSource {
    fn acquire_band(&self) -> Result<BandLease> {
        let lease = self.parent.acquire_band()?;
        let overview = lease
            .overview(self.index)
            .ok_or_else(|| diag::fail(Error::NotFound(format!("overview {}", self.index))))?;
        Ok(lease.map(overview))
    }

    fn describe(&self) -> String {
        format!("{}, overview {}", self.parent.describe(), self.index)
    }

    fn is_pooled(&self) -> bool {
        self.parent.is_pooled()
    }
}

/// Mask of a parent band, resolved again on every call
pub struct MaskSource {
    parent: Arc<dyn BandSource>,
}

impl MaskSource {
    pub fn new(parent: Arc<dyn BandSource>) -> Self {
        MaskSource { parent }
    }
}

impl BandSource for MaskSource {
    fn acquire_band(&self) -> Result<BandLease> {
        let lease = self.parent.acquire_band()?;
        let mask = lease
            .mask_band()
            .ok_or_else(|| diag::fail(Error::NotFound("mask band".to_string())))?;
        Ok(lease.map(mask))
    }

    fn describe(&self) -> String {
        format!("{}, mask", self.parent.describe())
    }

    fn is_pooled(&self) -> bool {
        self.parent.is_pooled()
    }
}

/// Band wrapped directly
pub struct DirectBandSource(pub Arc<dyn RasterBand>);

impl BandSource for DirectBandSource {
    fn acquire_band(&self) -> Result<BandLease> {
        Ok(BandLease::new(self.0.clone(), None))
    }

    fn describe(&self) -> String {
        format!("band {}", self.0.band_number())
    }
}

/// Dataset façade forwarding to a [`DatasetSource`]
pub struct ProxyDataset {
    source: Arc<dyn DatasetSource>,
    /// Band façades created so far
    bands: Mutex<HashMap<usize, Arc<ProxyBand>>>,
    /// Façade handed to bands as their dataset
    this: Weak<ProxyDataset>,
}

impl fmt::Debug for ProxyDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProxyDataset")
            .field("source", &self.source.describe())
            .finish()
    }
}

impl ProxyDataset {
    pub fn new(source: Arc<dyn DatasetSource>) -> Arc<Self> {
        Arc::new_cyclic(|this| ProxyDataset {
            source,
            bands: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Façade over an already opened dataset
    pub fn wrap(dataset: Arc<dyn Dataset>) -> Arc<Self> {
        Self::new(Arc::new(DirectSource::new(dataset)))
    }

    pub fn source(&self) -> &Arc<dyn DatasetSource> {
        &self.source
    }

    /// Borrow the underlying dataset, `None` when it cannot be resolved
    pub fn lease(&self) -> Option<DatasetLease> {
        self.source.acquire().ok()
    }

    /// Run `f` on the borrowed dataset
    pub fn with<T>(&self, f: impl FnOnce(&dyn Dataset) -> Result<T>) -> Result<T> {
        let lease = self.source.acquire()?;
        let out = f(&*lease);
        self.source.release(lease);
        out
    }

    fn with_or<T>(&self, failure: T, f: impl FnOnce(&dyn Dataset) -> T) -> T {
        match self.source.acquire() {
            Ok(lease) => {
                let out = f(&*lease);
                self.source.release(lease);
                out
            }
            Err(_) => failure,
        }
    }
}

impl Dataset for ProxyDataset {
    fn description(&self) -> String {
        self.source.describe().to_string()
    }

    fn raster_size(&self) -> (usize, usize) {
        self.with_or((0, 0), |ds| ds.raster_size())
    }

    fn access(&self) -> Access {
        self.with_or(Access::ReadOnly, |ds| ds.access())
    }

    fn band_count(&self) -> usize {
        self.with_or(0, |ds| ds.band_count())
    }

    fn band(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        if index == 0 || index > self.band_count() {
            return None;
        }
        let mut bands = self.bands.lock().unwrap_or_else(|e| e.into_inner());
        let band = bands.entry(index).or_insert_with(|| {
            let source = DatasetBandSource::new(self.source.clone(), index);
            let owner: Weak<dyn Dataset> = self.this.clone();
            Arc::new(ProxyBand::new(Arc::new(source), index).with_owner(owner))
        });
        Some(band.clone() as Arc<dyn RasterBand>)
    }

    fn read_raster(
        &self,
        window: Window,
        bands: &[usize],
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.with(|ds| ds.read_raster(window, bands, buf, buf_size, data_type))
    }

    fn write_raster(
        &self,
        window: Window,
        bands: &[usize],
        buf: &[u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.with(|ds| ds.write_raster(window, bands, buf, buf_size, data_type))
    }

    fn projection(&self) -> Option<Arc<str>> {
        self.with_or(None, |ds| ds.projection())
    }

    fn set_projection(&self, wkt: &str) -> Result<()> {
        self.with(|ds| ds.set_projection(wkt))
    }

    fn geo_transform(&self) -> Result<GeoTransform> {
        self.with(|ds| ds.geo_transform())
    }

    fn set_geo_transform(&self, gt: &GeoTransform) -> Result<()> {
        self.with(|ds| ds.set_geo_transform(gt))
    }

    fn gcps(&self) -> Arc<[Gcp]> {
        self.with_or(Arc::from(Vec::new()), |ds| ds.gcps())
    }

    fn gcp_projection(&self) -> Option<Arc<str>> {
        self.with_or(None, |ds| ds.gcp_projection())
    }

    fn set_gcps(&self, gcps: &[Gcp], projection: Option<&str>) -> Result<()> {
        self.with(|ds| ds.set_gcps(gcps, projection))
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        self.with_or(None, |ds| ds.metadata(domain))
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        self.with_or(None, |ds| ds.metadata_item(name, domain))
    }

    fn set_metadata(&self, metadata: &MetadataList, domain: &str) -> Result<()> {
        self.with(|ds| ds.set_metadata(metadata, domain))
    }

    fn set_metadata_item(&self, name: &str, value: &str, domain: &str) -> Result<()> {
        self.with(|ds| ds.set_metadata_item(name, value, domain))
    }

    fn file_list(&self) -> Vec<String> {
        self.with_or(Vec::new(), |ds| ds.file_list())
    }

    fn internal_handle(&self, name: &str) -> Option<InternalHandle> {
        self.with_or(None, |ds| ds.internal_handle(name))
    }

    fn flush_cache(&self) -> Result<()> {
        self.with(|ds| ds.flush_cache())
    }
}

/// Band façade forwarding to a [`BandSource`]
pub struct ProxyBand {
    source: Arc<dyn BandSource>,
    number: usize,
    owner: Option<Weak<dyn Dataset>>,
}

impl fmt::Debug for ProxyBand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProxyBand")
            .field("source", &self.source.describe())
            .field("number", &self.number)
            .finish()
    }
}

impl ProxyBand {
    pub fn new(source: Arc<dyn BandSource>, number: usize) -> Self {
        ProxyBand {
            source,
            number,
            owner: None,
        }
    }

    /// Façade over an already opened band
    pub fn wrap(band: Arc<dyn RasterBand>) -> Self {
        let number = band.band_number();
        ProxyBand::new(Arc::new(DirectBandSource(band)), number)
    }

    /// Report `owner` as the band's dataset
    pub fn with_owner(mut self, owner: Weak<dyn Dataset>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn source(&self) -> &Arc<dyn BandSource> {
        &self.source
    }

    /// Borrow the underlying band, `None` when it cannot be resolved
    pub fn lease(&self) -> Option<BandLease> {
        self.source.acquire_band().ok()
    }

    /// Run `f` on the borrowed band
    pub fn with<T>(&self, f: impl FnOnce(&dyn RasterBand) -> Result<T>) -> Result<T> {
        let lease = self.source.acquire_band()?;
        f(&*lease)
    }

    pub(crate) fn with_or<T>(&self, failure: T, f: impl FnOnce(&dyn RasterBand) -> T) -> T {
        match self.source.acquire_band() {
            Ok(lease) => f(&*lease),
            Err(_) => failure,
        }
    }
}

impl RasterBand for ProxyBand {
    fn band_number(&self) -> usize {
        self.number
    }

    fn size(&self) -> (usize, usize) {
        self.with_or((0, 0), |b| b.size())
    }

    fn data_type(&self) -> DataType {
        self.with_or(DataType::Unknown, |b| b.data_type())
    }

    fn block_size(&self) -> (usize, usize) {
        self.with_or((0, 0), |b| b.block_size())
    }

    fn dataset(&self) -> Option<Arc<dyn Dataset>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    fn read_block(&self, bx: usize, by: usize, buf: &mut [u8]) -> Result<()> {
        self.with(|b| b.read_block(bx, by, buf))
    }

    fn write_block(&self, bx: usize, by: usize, buf: &[u8]) -> Result<()> {
        self.with(|b| b.write_block(bx, by, buf))
    }

    fn read(
        &self,
        window: Window,
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.with(|b| b.read(window, buf, buf_size, data_type))
    }

    fn write(
        &self,
        window: Window,
        buf: &[u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.with(|b| b.write(window, buf, buf_size, data_type))
    }

    fn no_data_value(&self) -> Option<f64> {
        self.with_or(None, |b| b.no_data_value())
    }

    fn set_no_data_value(&self, value: Option<f64>) -> Result<()> {
        self.with(|b| b.set_no_data_value(value))
    }

    fn offset(&self) -> f64 {
        self.with_or(0.0, |b| b.offset())
    }

    fn scale(&self) -> f64 {
        self.with_or(1.0, |b| b.scale())
    }

    fn unit_type(&self) -> Arc<str> {
        self.with_or(Arc::from(""), |b| b.unit_type())
    }

    fn category_names(&self) -> Option<Arc<[String]>> {
        self.with_or(None, |b| b.category_names())
    }

    fn color_interpretation(&self) -> ColorInterp {
        self.with_or(ColorInterp::Undefined, |b| b.color_interpretation())
    }

    fn description(&self) -> String {
        self.with_or(String::new(), |b| b.description())
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        self.with_or(None, |b| b.metadata(domain))
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        self.with_or(None, |b| b.metadata_item(name, domain))
    }

    fn set_metadata_item(&self, name: &str, value: &str, domain: &str) -> Result<()> {
        self.with(|b| b.set_metadata_item(name, value, domain))
    }

    fn overview_count(&self) -> usize {
        self.with_or(0, |b| b.overview_count())
    }

    fn overview(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        if index >= self.overview_count() {
            return None;
        }
        let source = OverviewSource::new(self.source.clone(), index);
        Some(Arc::new(ProxyBand::new(Arc::new(source), 0)))
    }

    fn mask_band(&self) -> Option<Arc<dyn RasterBand>> {
        let source = MaskSource::new(self.source.clone());
        Some(Arc::new(ProxyBand::new(Arc::new(source), 0)))
    }

    fn mask_flags(&self) -> MaskFlags {
        self.with_or(MaskFlags::ALL_VALID, |b| b.mask_flags())
    }

    fn flush_cache(&self) -> Result<()> {
        self.with(|b| b.flush_cache())
    }
}

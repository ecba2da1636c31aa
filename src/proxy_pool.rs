//! Pooled dataset and band façades.
//!
//! A [`ProxyPoolDataset`] never keeps its resource open: every call borrows
//! it from a [`ResourcePool`] and gives it back. Dimensions, band layout
//! and optionally projection and geotransform are declared up front and
//! answered without touching the pool.
//!
//! Attribute queries whose results callers tend to keep around (metadata
//! lists and items, GCPs, unit type, category names) return a fresh `Arc`
//! copy of what the resource answered. The copy owns its data, so it stays
//! valid however often the pooled resource is evicted afterwards, and it
//! does not see later changes to the resource.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::thread::ThreadId;

use log::debug;

use crate::constants::MaskFlags;
use crate::diag::{self, Severity};
use crate::error::{Error, Result};
use crate::pool::{PoolKey, PoolRef, ResourcePool};
use crate::proxy::{
    BandSource, DatasetBandSource, DatasetSource, MaskSource, OverviewSource, PooledSource,
    ProxyBand, ProxyDataset,
};
use crate::raster::{Dataset, InternalHandle, RasterBand};
use crate::types::{Access, ColorInterp, DataType, Gcp, GeoTransform, MetadataList, Window};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Declared pixel layout of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandDecl {
    pub data_type: DataType,
    pub block_size: (usize, usize),
}

/// Declarations of a [`ProxyPoolDataset`]
pub struct ProxyPoolBuilder {
    pool: PoolRef,
    path: String,
    size: (usize, usize),
    access: Access,
    shared: bool,
    owner: Option<String>,
    options: Vec<(String, String)>,
    projection: Option<Arc<str>>,
    geo_transform: Option<GeoTransform>,
    /// Declared bands by 0-based slot; `None` leaves a gap
    bands: Vec<Option<BandDecl>>,
}

impl ProxyPoolBuilder {
    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Tag isolating the pool entries of one composite resource
    pub fn owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }

    /// Open options forwarded to the engine
    pub fn options(mut self, options: Vec<(String, String)>) -> Self {
        self.options = options;
        self
    }

    /// Projection answered without opening the resource
    pub fn projection(mut self, wkt: &str) -> Self {
        self.projection = Some(Arc::from(wkt));
        self
    }

    /// Geotransform answered without opening the resource
    pub fn geo_transform(mut self, gt: GeoTransform) -> Self {
        self.geo_transform = Some(gt);
        self
    }

    /// Declare the next band
    pub fn add_band(mut self, data_type: DataType, block_size: (usize, usize)) -> Self {
        self.bands.push(Some(BandDecl {
            data_type,
            block_size,
        }));
        self
    }

    /// Declare band `index` (1-based) of the resource
    ///
    /// Bands below `index` that were never declared stay undeclared: the
    /// façade counts them but has no band object for them. Declaring an
    /// index twice keeps the last declaration.
    pub fn add_band_at(
        mut self,
        index: usize,
        data_type: DataType,
        block_size: (usize, usize),
    ) -> Self {
        let slot = match index.checked_sub(1) {
            Some(slot) => slot,
            None => {
                let err = Error::BandOutOfRange {
                    index,
                    count: self.bands.len(),
                };
                diag::report(Severity::Warning, &err);
                return self;
            }
        };
        if self.bands.len() <= slot {
            self.bands.resize(slot + 1, None);
        }
        self.bands[slot] = Some(BandDecl {
            data_type,
            block_size,
        });
        self
    }

    fn key(&self) -> PoolKey {
        PoolKey::new(&self.path)
            .with_access(self.access)
            .with_options(self.options.clone())
            .with_owner(self.owner.as_deref())
    }

    /// Open the resource once under the declared key to fill in its size,
    /// every band, and whatever georeferencing was not declared, then
    /// build the façade
    ///
    /// The resource stays in the pool afterwards, unreferenced.
    pub fn open(mut self) -> Result<Arc<ProxyPoolDataset>> {
        let pool = self.pool.get().ok_or_else(|| diag::fail(Error::PoolDestroyed))?;
        let guard = pool.acquire(&self.key(), self.shared)?;

        self.size = guard.raster_size();
        if self.geo_transform.is_none() {
            self.geo_transform = guard.geo_transform().ok();
        }
        if self.projection.is_none() {
            self.projection = guard.projection();
        }
        for index in 1..=guard.band_count() {
            if let Some(band) = guard.band(index) {
                self = self.add_band_at(index, band.data_type(), band.block_size());
            }
        }
        drop(guard);
        debug!("opened {} to declare it ({}x{})", self.path, self.size.0, self.size.1);
        Ok(self.build())
    }

    /// Build the façade; nothing is opened
    ///
    /// The pool key is attributed to the calling thread.
    pub fn build(self) -> Arc<ProxyPoolDataset> {
        let key = self.key();
        let thread = key.thread;
        let source = Arc::new(PooledSource::new(self.pool, key, self.shared));
        let size = self.size;
        let decls = self.bands;

        Arc::new_cyclic(|this: &Weak<ProxyPoolDataset>| {
            let owner: Weak<dyn Dataset> = this.clone();
            let dataset_source: Arc<dyn DatasetSource> = source.clone();
            let bands = decls
                .into_iter()
                .enumerate()
                .map(|(i, decl)| {
                    let decl = decl?;
                    let band_source = DatasetBandSource::new(dataset_source.clone(), i + 1);
                    Some(Arc::new(ProxyPoolBand::new(
                        Arc::new(band_source),
                        i + 1,
                        size,
                        decl,
                        owner.clone(),
                    )))
                })
                .collect();
            ProxyPoolDataset {
                proxy: ProxyDataset::new(dataset_source),
                source,
                size,
                access: self.access,
                shared: self.shared,
                thread,
                projection: RwLock::new(self.projection),
                geo_transform: RwLock::new(self.geo_transform),
                bands,
            }
        })
    }
}

/// Dataset façade resolving its resource through a pool on every call
pub struct ProxyPoolDataset {
    proxy: Arc<ProxyDataset>,
    source: Arc<PooledSource>,
    size: (usize, usize),
    access: Access,
    shared: bool,
    /// Thread that created the façade
    thread: ThreadId,
    /// Declared projection, authoritative when set
    projection: RwLock<Option<Arc<str>>>,
    /// Declared geotransform, authoritative when set
    geo_transform: RwLock<Option<GeoTransform>>,
    bands: Vec<Option<Arc<ProxyPoolBand>>>,
}

impl fmt::Debug for ProxyPoolDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProxyPoolDataset")
            .field("key", self.source.key())
            .field("size", &self.size)
            .field("bands", &self.bands.len())
            .finish()
    }
}

impl ProxyPoolDataset {
    /// Start declaring a façade over `path` of `width` x `height` pixels
    pub fn builder(
        pool: impl Into<PoolRef>,
        path: &str,
        width: usize,
        height: usize,
    ) -> ProxyPoolBuilder {
        ProxyPoolBuilder {
            pool: pool.into(),
            path: path.to_string(),
            size: (width, height),
            access: Access::ReadOnly,
            shared: false,
            owner: None,
            options: Vec::new(),
            projection: None,
            geo_transform: None,
            bands: Vec::new(),
        }
    }

    /// Open `path` once to learn its size, georeferencing and band
    /// layout, then build a fully declared read-only façade
    ///
    /// Use [`ProxyPoolBuilder::open`] to set the owner tag, sharing or
    /// access mode.
    pub fn open(
        pool: impl Into<PoolRef>,
        path: &str,
        options: Vec<(String, String)>,
    ) -> Result<Arc<Self>> {
        ProxyPoolDataset::builder(pool, path, 0, 0).options(options).open()
    }

    pub fn key(&self) -> &PoolKey {
        self.source.key()
    }

    pub fn pool(&self) -> Option<Arc<ResourcePool>> {
        self.source.pool().get()
    }

    /// Whether the façade keeps its pool alive
    pub fn holds_pool(&self) -> bool {
        self.source.pool().is_strong()
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn creating_thread(&self) -> ThreadId {
        self.thread
    }

    /// Band façade by 1-based index, `None` for undeclared bands
    pub fn pool_band(&self, index: usize) -> Option<&Arc<ProxyPoolBand>> {
        self.bands.get(index.checked_sub(1)?)?.as_ref()
    }
}

impl Dataset for ProxyPoolDataset {
    fn description(&self) -> String {
        self.source.key().path.clone()
    }

    fn raster_size(&self) -> (usize, usize) {
        self.size
    }

    fn access(&self) -> Access {
        self.access
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        self.pool_band(index).map(|b| b.clone() as Arc<dyn RasterBand>)
    }

    fn read_raster(
        &self,
        window: Window,
        bands: &[usize],
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.proxy.read_raster(window, bands, buf, buf_size, data_type)
    }

    fn write_raster(
        &self,
        window: Window,
        bands: &[usize],
        buf: &[u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.proxy.write_raster(window, bands, buf, buf_size, data_type)
    }

    fn projection(&self) -> Option<Arc<str>> {
        if let Some(wkt) = self.projection.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Some(wkt);
        }
        let wkt = self.proxy.projection()?;
        Some(Arc::from(&*wkt))
    }

    fn set_projection(&self, wkt: &str) -> Result<()> {
        self.proxy.set_projection(wkt)?;
        let mut declared = self.projection.write().unwrap_or_else(|e| e.into_inner());
        if declared.is_some() {
            *declared = Some(Arc::from(wkt));
        }
        Ok(())
    }

    fn geo_transform(&self) -> Result<GeoTransform> {
        if let Some(gt) = *self.geo_transform.read().unwrap_or_else(|e| e.into_inner()) {
            return Ok(gt);
        }
        self.proxy.geo_transform()
    }

    fn set_geo_transform(&self, gt: &GeoTransform) -> Result<()> {
        self.proxy.set_geo_transform(gt)?;
        let mut declared = self.geo_transform.write().unwrap_or_else(|e| e.into_inner());
        if declared.is_some() {
            *declared = Some(*gt);
        }
        Ok(())
    }

    fn gcps(&self) -> Arc<[Gcp]> {
        Arc::from(self.proxy.gcps().to_vec())
    }

    fn gcp_projection(&self) -> Option<Arc<str>> {
        self.proxy.gcp_projection().map(|wkt| Arc::from(&*wkt))
    }

    fn set_gcps(&self, gcps: &[Gcp], projection: Option<&str>) -> Result<()> {
        self.proxy.set_gcps(gcps, projection)
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        let md = self.proxy.metadata(domain)?;
        Some(Arc::new((*md).clone()))
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        let value = self.proxy.metadata_item(name, domain)?;
        Some(Arc::from(&*value))
    }

    fn set_metadata(&self, metadata: &MetadataList, domain: &str) -> Result<()> {
        self.proxy.set_metadata(metadata, domain)
    }

    fn set_metadata_item(&self, name: &str, value: &str, domain: &str) -> Result<()> {
        self.proxy.set_metadata_item(name, value, domain)
    }

    fn file_list(&self) -> Vec<String> {
        self.proxy.file_list()
    }

    fn internal_handle(&self, name: &str) -> Option<InternalHandle> {
        let err = Error::PooledInternalHandle {
            path: self.source.key().path.clone(),
        };
        diag::report(Severity::Warning, &err);
        self.proxy.internal_handle(name)
    }

    fn flush_cache(&self) -> Result<()> {
        self.proxy.flush_cache()
    }
}

/// Band façade of a [`ProxyPoolDataset`], also used for its overview and
/// mask sub-façades
pub struct ProxyPoolBand {
    proxy: ProxyBand,
    size: (usize, usize),
    decl: BandDecl,
    owner: Weak<dyn Dataset>,
    /// Overview sub-façades by index, created on first access
    overviews: Mutex<Vec<Option<Arc<ProxyPoolBand>>>>,
    mask: Mutex<Option<Arc<ProxyPoolBand>>>,
}

impl fmt::Debug for ProxyPoolBand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProxyPoolBand")
            .field("source", &self.proxy.source().describe())
            .field("size", &self.size)
            .field("decl", &self.decl)
            .finish()
    }
}

impl ProxyPoolBand {
    fn new(
        source: Arc<dyn BandSource>,
        number: usize,
        size: (usize, usize),
        decl: BandDecl,
        owner: Weak<dyn Dataset>,
    ) -> Self {
        ProxyPoolBand {
            proxy: ProxyBand::new(source, number).with_owner(owner.clone()),
            size,
            decl,
            owner,
            overviews: Mutex::new(Vec::new()),
            mask: Mutex::new(None),
        }
    }

    // Sub-façade resolving through `source`, reporting the same dataset
    fn sub_facade(
        &self,
        source: Arc<dyn BandSource>,
        size: (usize, usize),
        decl: BandDecl,
    ) -> Arc<Self> {
        Arc::new(ProxyPoolBand::new(source, 0, size, decl, self.owner.clone()))
    }

    /// Declare the mask sub-façade without opening the resource
    pub fn add_mask_description(&self, data_type: DataType, block_size: (usize, usize)) {
        let source = Arc::new(MaskSource::new(self.proxy.source().clone()));
        let mask = self.sub_facade(
            source,
            self.size,
            BandDecl {
                data_type,
                block_size,
            },
        );
        *lock(&self.mask) = Some(mask);
    }

    /// Declare the mask sub-façade from the resource's own mask band
    pub fn add_mask_description_from_underlying(&self) -> Result<()> {
        let lease = self.proxy.source().acquire_band()?;
        let mask = lease
            .mask_band()
            .ok_or_else(|| diag::fail(Error::NotFound("mask band".to_string())))?;
        let (data_type, block_size) = (mask.data_type(), mask.block_size());
        drop(mask);
        drop(lease);
        self.add_mask_description(data_type, block_size);
        Ok(())
    }

    /// Whether a mask sub-façade has been declared or discovered
    pub fn has_mask_description(&self) -> bool {
        lock(&self.mask).is_some()
    }
}

impl RasterBand for ProxyPoolBand {
    fn band_number(&self) -> usize {
        self.proxy.band_number()
    }

    fn size(&self) -> (usize, usize) {
        self.size
    }

    fn data_type(&self) -> DataType {
        self.decl.data_type
    }

    fn block_size(&self) -> (usize, usize) {
        self.decl.block_size
    }

    fn dataset(&self) -> Option<Arc<dyn Dataset>> {
        self.owner.upgrade()
    }

    fn read_block(&self, bx: usize, by: usize, buf: &mut [u8]) -> Result<()> {
        self.proxy.read_block(bx, by, buf)
    }

    fn write_block(&self, bx: usize, by: usize, buf: &[u8]) -> Result<()> {
        self.proxy.write_block(bx, by, buf)
    }

    fn read(
        &self,
        window: Window,
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.proxy.read(window, buf, buf_size, data_type)
    }

    fn write(
        &self,
        window: Window,
        buf: &[u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.proxy.write(window, buf, buf_size, data_type)
    }

    fn no_data_value(&self) -> Option<f64> {
        self.proxy.no_data_value()
    }

    fn set_no_data_value(&self, value: Option<f64>) -> Result<()> {
        self.proxy.set_no_data_value(value)
    }

    fn offset(&self) -> f64 {
        self.proxy.offset()
    }

    fn scale(&self) -> f64 {
        self.proxy.scale()
    }

    fn unit_type(&self) -> Arc<str> {
        Arc::from(&*self.proxy.unit_type())
    }

    fn category_names(&self) -> Option<Arc<[String]>> {
        self.proxy
            .category_names()
            .map(|names| Arc::from(names.to_vec()))
    }

    fn color_interpretation(&self) -> ColorInterp {
        self.proxy.color_interpretation()
    }

    fn description(&self) -> String {
        self.proxy.description()
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        let md = self.proxy.metadata(domain)?;
        Some(Arc::new((*md).clone()))
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        let value = self.proxy.metadata_item(name, domain)?;
        Some(Arc::from(&*value))
    }

    fn set_metadata_item(&self, name: &str, value: &str, domain: &str) -> Result<()> {
        self.proxy.set_metadata_item(name, value, domain)
    }

    fn overview_count(&self) -> usize {
        self.proxy.overview_count()
    }

    fn overview(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        let cached = lock(&self.overviews).get(index).cloned().flatten();
        if let Some(overview) = cached {
            return Some(overview as Arc<dyn RasterBand>);
        }

        let (size, decl) = {
            let lease = self.proxy.lease()?;
            let overview = lease.overview(index)?;
            let decl = BandDecl {
                data_type: overview.data_type(),
                block_size: overview.block_size(),
            };
            (overview.size(), decl)
        };
        let source = Arc::new(OverviewSource::new(self.proxy.source().clone(), index));
        let created = self.sub_facade(source, size, decl);

        let mut overviews = lock(&self.overviews);
        if overviews.len() <= index {
            overviews.resize(index + 1, None);
        }
        let slot = overviews[index].get_or_insert(created).clone();
        Some(slot as Arc<dyn RasterBand>)
    }

    fn mask_band(&self) -> Option<Arc<dyn RasterBand>> {
        let declared = lock(&self.mask).clone();
        if let Some(mask) = declared {
            return Some(mask as Arc<dyn RasterBand>);
        }
        self.add_mask_description_from_underlying().ok()?;
        lock(&self.mask).clone().map(|mask| mask as Arc<dyn RasterBand>)
    }

    fn mask_flags(&self) -> MaskFlags {
        self.proxy.mask_flags()
    }

    fn flush_cache(&self) -> Result<()> {
        self.proxy.flush_cache()
    }
}

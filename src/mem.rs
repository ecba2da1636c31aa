//! In-memory raster engine.
//!
//! Paths resolve to [`MemTemplate`]s registered on a [`MemEngine`]; every
//! open instantiates a fresh [`MemDataset`] from the template, so a pooled
//! handle that gets evicted and reopened observes template changes made in
//! between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::ThreadId;

use log::debug;

use crate::constants::MaskFlags;
use crate::error::{Error, Result};
use crate::pool::responsible_thread;
use crate::raster::{buffer_len, Dataset, InternalHandle, OpenRequest, RasterBand, RasterEngine};
use crate::types::{Access, ColorInterp, DataType, Gcp, GeoTransform, MetadataList, Window};

/// Callback run while a path is being opened
pub type OpenHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Description of one band of a template
#[derive(Debug, Clone)]
pub struct MemBandTemplate {
    pub data_type: DataType,
    pub block_size: (usize, usize),
    /// Row-major pixel values
    pub data: Vec<f64>,
    pub no_data: Option<f64>,
    pub unit_type: String,
    pub category_names: Option<Vec<String>>,
    pub color_interp: ColorInterp,
    pub metadata: HashMap<String, MetadataList>,
}

/// Description of a dataset, instantiated on every open
#[derive(Debug, Clone)]
pub struct MemTemplate {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<MemBandTemplate>,
    pub projection: Option<String>,
    pub geo_transform: Option<GeoTransform>,
    pub gcps: Vec<Gcp>,
    pub gcp_projection: Option<String>,
    pub metadata: HashMap<String, MetadataList>,
    /// Decimation factors of the overview levels
    pub overview_factors: Vec<usize>,
    /// Whether overview bands belong to their own per-level dataset
    pub overview_datasets: bool,
    pub file_list: Vec<String>,
}

impl MemTemplate {
    pub fn new(width: usize, height: usize) -> Self {
        MemTemplate {
            width,
            height,
            bands: Vec::new(),
            projection: None,
            geo_transform: None,
            gcps: Vec::new(),
            gcp_projection: None,
            metadata: HashMap::new(),
            overview_factors: Vec::new(),
            overview_datasets: true,
            file_list: Vec::new(),
        }
    }

    /// Add a band whose pixel (x, y) holds `x + y * width + seed`
    pub fn with_band(mut self, data_type: DataType, block_size: (usize, usize), seed: f64) -> Self {
        let data = (0..self.width * self.height)
            .map(|i| i as f64 + seed)
            .collect();
        self.bands.push(MemBandTemplate {
            data_type,
            block_size,
            data,
            no_data: None,
            unit_type: String::new(),
            category_names: None,
            color_interp: ColorInterp::Undefined,
            metadata: HashMap::new(),
        });
        self
    }

    pub fn with_projection(mut self, wkt: &str) -> Self {
        self.projection = Some(wkt.to_string());
        self
    }

    pub fn with_geo_transform(mut self, gt: GeoTransform) -> Self {
        self.geo_transform = Some(gt);
        self
    }

    pub fn with_gcps(mut self, gcps: Vec<Gcp>, projection: &str) -> Self {
        self.gcps = gcps;
        self.gcp_projection = Some(projection.to_string());
        self
    }

    pub fn with_metadata_item(mut self, domain: &str, name: &str, value: &str) -> Self {
        self.metadata
            .entry(domain.to_string())
            .or_default()
            .set(name, value);
        self
    }

    pub fn with_overviews(mut self, factors: &[usize]) -> Self {
        self.overview_factors = factors.to_vec();
        self
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.file_list.push(path.to_string());
        self
    }

    /// Mutable access to band `index` (1-based)
    pub fn band_mut(&mut self, index: usize) -> Option<&mut MemBandTemplate> {
        index.checked_sub(1).and_then(|i| self.bands.get_mut(i))
    }

    // Template of overview level with decimation `factor`
    fn decimated(&self, factor: usize) -> MemTemplate {
        let factor = factor.max(1);
        let width = self.width.div_ceil(factor).max(1);
        let height = self.height.div_ceil(factor).max(1);
        let bands = self
            .bands
            .iter()
            .map(|band| {
                let mut data = Vec::with_capacity(width * height);
                for y in 0..height {
                    let sy = (y * factor).min(self.height.saturating_sub(1));
                    for x in 0..width {
                        let sx = (x * factor).min(self.width.saturating_sub(1));
                        data.push(band.data.get(sy * self.width + sx).copied().unwrap_or(0.0));
                    }
                }
                MemBandTemplate {
                    data,
                    metadata: HashMap::new(),
                    ..band.clone()
                }
            })
            .collect();
        MemTemplate {
            width,
            height,
            bands,
            overview_factors: Vec::new(),
            ..self.clone()
        }
    }
}

/// In-memory engine resolving paths to templates
#[derive(Default)]
pub struct MemEngine {
    templates: RwLock<HashMap<String, MemTemplate>>,
    hooks: RwLock<HashMap<String, OpenHook>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    /// (path, responsible thread) of every successful open
    open_log: Mutex<Vec<(String, ThreadId)>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the template behind `path`
    pub fn register(&self, path: &str, template: MemTemplate) {
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), template);
    }

    /// Change the template behind `path`; affects later opens only
    pub fn update<F: FnOnce(&mut MemTemplate)>(&self, path: &str, f: F) -> Result<()> {
        let mut templates = self.templates.write().unwrap_or_else(|e| e.into_inner());
        let template = templates
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        f(template);
        Ok(())
    }

    pub fn remove(&self, path: &str) {
        self.templates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    /// Run `hook` inside every open of `path`
    pub fn set_open_hook(&self, path: &str, hook: OpenHook) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), hook);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of successful opens of `path`
    pub fn opens_of(&self, path: &str) -> usize {
        self.open_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    /// Responsible thread recorded by the latest open of `path`
    pub fn last_open_thread(&self, path: &str) -> Option<ThreadId> {
        self.open_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, t)| *t)
    }
}

impl RasterEngine for MemEngine {
    fn open(&self, request: &OpenRequest<'_>) -> Result<Arc<dyn Dataset>> {
        let template = self
            .templates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(request.path)
            .cloned()
            .ok_or_else(|| Error::resolution(request.path, "no such file"))?;

        let hook = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(request.path)
            .cloned();
        if let Some(hook) = hook {
            hook(request.path);
        }

        let dataset = MemDataset::instantiate(request.path, &template, request.access);
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((request.path.to_string(), responsible_thread()));
        debug!("mem: opened {} ({:?})", request.path, request.access);
        Ok(dataset)
    }

    fn close(&self, dataset: Arc<dyn Dataset>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        debug!("mem: closed {}", dataset.description());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DatasetState {
    projection: Option<Arc<str>>,
    geo_transform: Option<GeoTransform>,
    gcps: Option<Arc<[Gcp]>>,
    gcp_projection: Option<Arc<str>>,
    metadata: HashMap<String, Arc<MetadataList>>,
}

/// In-memory dataset
#[derive(Debug)]
pub struct MemDataset {
    description: String,
    access: Access,
    width: usize,
    height: usize,
    bands: Vec<Arc<MemBand>>,
    /// Per-level overview datasets, kept alive by the main dataset
    overview_datasets: Vec<Arc<MemDataset>>,
    file_list: Vec<String>,
    state: RwLock<DatasetState>,
}

impl MemDataset {
    /// Build a dataset from `template`
    pub fn instantiate(
        description: &str,
        template: &MemTemplate,
        access: Access,
    ) -> Arc<MemDataset> {
        let levels: Vec<Arc<MemDataset>> = template
            .overview_factors
            .iter()
            .map(|&f| MemDataset::instantiate(description, &template.decimated(f), access))
            .collect();

        Arc::new_cyclic(|weak: &Weak<MemDataset>| {
            let owner = if template.overview_datasets {
                weak.clone()
            } else {
                Weak::new()
            };
            let bands = template
                .bands
                .iter()
                .enumerate()
                .map(|(i, band)| {
                    let overviews = levels
                        .iter()
                        .filter_map(|level| level.bands.get(i).cloned())
                        .collect();
                    Arc::new(MemBand::new(
                        i + 1,
                        (template.width, template.height),
                        band,
                        overviews,
                        owner.clone(),
                        access,
                    ))
                })
                .collect();
            let state = DatasetState {
                projection: template.projection.as_deref().map(Arc::from),
                geo_transform: template.geo_transform,
                gcps: Some(template.gcps.clone().into()),
                gcp_projection: template.gcp_projection.as_deref().map(Arc::from),
                metadata: template
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), Arc::new(v.clone())))
                    .collect(),
            };
            MemDataset {
                description: description.to_string(),
                access,
                width: template.width,
                height: template.height,
                bands,
                overview_datasets: if template.overview_datasets { levels } else { Vec::new() },
                file_list: if template.file_list.is_empty() {
                    vec![description.to_string()]
                } else {
                    template.file_list.clone()
                },
                state: RwLock::new(state),
            }
        })
    }

    fn state(&self) -> std::sync::RwLockReadGuard<'_, DatasetState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&self) -> std::sync::RwLockWriteGuard<'_, DatasetState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<()> {
        match self.access {
            Access::Update => Ok(()),
            Access::ReadOnly => Err(Error::ReadOnly),
        }
    }

    /// Number of overview datasets kept by this dataset
    pub fn overview_dataset_count(&self) -> usize {
        self.overview_datasets.len()
    }
}

impl Dataset for MemDataset {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn raster_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn access(&self) -> Access {
        self.access
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        let band = self.bands.get(index.checked_sub(1)?)?;
        Some(band.clone() as Arc<dyn RasterBand>)
    }

    fn write_raster(
        &self,
        window: Window,
        bands: &[usize],
        buf: &[u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        self.check_writable()?;
        let band_len = buffer_len(buf_size, 1, data_type);
        for (i, &index) in bands.iter().enumerate() {
            let band = self.band(index).ok_or(Error::BandOutOfRange {
                index,
                count: self.bands.len(),
            })?;
            let chunk = buf
                .get(i * band_len..(i + 1) * band_len)
                .ok_or(Error::BufferTooSmall {
                    needed: band_len * bands.len(),
                    got: buf.len(),
                })?;
            band.write(window, chunk, buf_size, data_type)?;
        }
        Ok(())
    }

    fn projection(&self) -> Option<Arc<str>> {
        self.state().projection.clone()
    }

    fn set_projection(&self, wkt: &str) -> Result<()> {
        self.check_writable()?;
        self.state_mut().projection = Some(Arc::from(wkt));
        Ok(())
    }

    fn geo_transform(&self) -> Result<GeoTransform> {
        self.state()
            .geo_transform
            .ok_or_else(|| Error::NotFound(format!("{}: geotransform", self.description)))
    }

    fn set_geo_transform(&self, gt: &GeoTransform) -> Result<()> {
        self.check_writable()?;
        self.state_mut().geo_transform = Some(*gt);
        Ok(())
    }

    fn gcps(&self) -> Arc<[Gcp]> {
        self.state().gcps.clone().unwrap_or_else(|| Arc::from(Vec::new()))
    }

    fn gcp_projection(&self) -> Option<Arc<str>> {
        self.state().gcp_projection.clone()
    }

    fn set_gcps(&self, gcps: &[Gcp], projection: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state_mut();
        state.gcps = Some(Arc::from(gcps.to_vec()));
        state.gcp_projection = projection.map(Arc::from);
        Ok(())
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        self.state().metadata.get(domain).cloned()
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        self.state()
            .metadata
            .get(domain)
            .and_then(|md| md.get(name).map(Arc::from))
    }

    fn set_metadata(&self, metadata: &MetadataList, domain: &str) -> Result<()> {
        self.state_mut()
            .metadata
            .insert(domain.to_string(), Arc::new(metadata.clone()));
        Ok(())
    }

    fn set_metadata_item(&self, name: &str, value: &str, domain: &str) -> Result<()> {
        let mut state = self.state_mut();
        let entry = state.metadata.entry(domain.to_string()).or_default();
        Arc::make_mut(entry).set(name, value);
        Ok(())
    }

    fn file_list(&self) -> Vec<String> {
        self.file_list.clone()
    }

    fn internal_handle(&self, name: &str) -> Option<InternalHandle> {
        match name {
            "DESCRIPTION" => Some(Arc::new(self.description.clone())),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct BandState {
    data: Vec<f64>,
    no_data: Option<f64>,
    metadata: HashMap<String, Arc<MetadataList>>,
}

/// In-memory raster band
#[derive(Debug)]
pub struct MemBand {
    number: usize,
    width: usize,
    height: usize,
    data_type: DataType,
    block_size: (usize, usize),
    access: Access,
    unit_type: Arc<str>,
    category_names: Option<Arc<[String]>>,
    color_interp: ColorInterp,
    overviews: Vec<Arc<MemBand>>,
    dataset: Weak<MemDataset>,
    state: RwLock<BandState>,
}

impl MemBand {
    fn new(
        number: usize,
        size: (usize, usize),
        template: &MemBandTemplate,
        overviews: Vec<Arc<MemBand>>,
        dataset: Weak<MemDataset>,
        access: Access,
    ) -> Self {
        let mut data = template.data.clone();
        data.resize(size.0 * size.1, 0.0);
        MemBand {
            number,
            width: size.0,
            height: size.1,
            data_type: template.data_type,
            block_size: (
                template.block_size.0.clamp(1, size.0.max(1)),
                template.block_size.1.clamp(1, size.1.max(1)),
            ),
            access,
            unit_type: Arc::from(template.unit_type.as_str()),
            category_names: template.category_names.clone().map(Arc::from),
            color_interp: template.color_interp,
            overviews,
            dataset,
            state: RwLock::new(BandState {
                data,
                no_data: template.no_data,
                metadata: template
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), Arc::new(v.clone())))
                    .collect(),
            }),
        }
    }

    fn state(&self) -> std::sync::RwLockReadGuard<'_, BandState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Pixel value at (x, y)
    pub fn value(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.state().data.get(y * self.width + x).copied()
    }

    fn mask_values(&self) -> Vec<f64> {
        let state = self.state();
        match state.no_data {
            Some(nd) => state
                .data
                .iter()
                .map(|&v| if v == nd { 0.0 } else { 255.0 })
                .collect(),
            None => vec![255.0; self.width * self.height],
        }
    }
}

impl RasterBand for MemBand {
    fn band_number(&self) -> usize {
        self.number
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn block_size(&self) -> (usize, usize) {
        self.block_size
    }

    fn dataset(&self) -> Option<Arc<dyn Dataset>> {
        self.dataset.upgrade().map(|ds| ds as Arc<dyn Dataset>)
    }

    fn read_block(&self, bx: usize, by: usize, buf: &mut [u8]) -> Result<()> {
        let (bw, bh) = self.block_size;
        let needed = bw * bh * self.data_type.size();
        if buf.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                got: buf.len(),
            });
        }
        let x0 = bx * bw;
        let y0 = by * bh;
        if x0 >= self.width || y0 >= self.height {
            return Err(Error::NotFound(format!("block ({}, {})", bx, by)));
        }
        let state = self.state();
        let size = self.data_type.size();
        for j in 0..bh {
            for i in 0..bw {
                let (x, y) = (x0 + i, y0 + j);
                let value = if x < self.width && y < self.height {
                    state.data[y * self.width + x]
                } else {
                    0.0
                };
                let at = (j * bw + i) * size;
                encode_pixel(value, self.data_type, &mut buf[at..at + size]);
            }
        }
        Ok(())
    }

    fn read(
        &self,
        window: Window,
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        if data_type == DataType::Unknown {
            return Err(Error::NotSupported("unknown data type"));
        }
        if !window.fits(self.width, self.height) {
            return Err(Error::NotFound(format!("window {:?} outside raster", window)));
        }
        let needed = buffer_len(buf_size, 1, data_type);
        if buf.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                got: buf.len(),
            });
        }
        let (bw, bh) = buf_size;
        if bw == 0 || bh == 0 {
            return Ok(());
        }
        let state = self.state();
        let size = data_type.size();
        for j in 0..bh {
            let y = window.y_off + ((2 * j + 1) * window.y_size) / (2 * bh);
            for i in 0..bw {
                let x = window.x_off + ((2 * i + 1) * window.x_size) / (2 * bw);
                let value = state.data.get(y * self.width + x).copied().unwrap_or(0.0);
                let at = (j * bw + i) * size;
                encode_pixel(value, data_type, &mut buf[at..at + size]);
            }
        }
        Ok(())
    }

    fn write(
        &self,
        window: Window,
        buf: &[u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        if self.access != Access::Update {
            return Err(Error::ReadOnly);
        }
        if buf_size != (window.x_size, window.y_size) {
            return Err(Error::NotSupported("resampled write"));
        }
        if data_type == DataType::Unknown {
            return Err(Error::NotSupported("unknown data type"));
        }
        if !window.fits(self.width, self.height) {
            return Err(Error::NotFound(format!("window {:?} outside raster", window)));
        }
        let needed = buffer_len(buf_size, 1, data_type);
        if buf.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                got: buf.len(),
            });
        }
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let size = data_type.size();
        for j in 0..window.y_size {
            for i in 0..window.x_size {
                let at = (j * window.x_size + i) * size;
                let value = decode_pixel(data_type, &buf[at..at + size]);
                state.data[(window.y_off + j) * self.width + window.x_off + i] = value;
            }
        }
        Ok(())
    }

    fn no_data_value(&self) -> Option<f64> {
        self.state().no_data
    }

    fn set_no_data_value(&self, value: Option<f64>) -> Result<()> {
        self.state.write().unwrap_or_else(|e| e.into_inner()).no_data = value;
        Ok(())
    }

    fn unit_type(&self) -> Arc<str> {
        self.unit_type.clone()
    }

    fn category_names(&self) -> Option<Arc<[String]>> {
        self.category_names.clone()
    }

    fn color_interpretation(&self) -> ColorInterp {
        self.color_interp
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        self.state().metadata.get(domain).cloned()
    }

    fn set_metadata_item(&self, name: &str, value: &str, domain: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let entry = state.metadata.entry(domain.to_string()).or_default();
        Arc::make_mut(entry).set(name, value);
        Ok(())
    }

    fn overview_count(&self) -> usize {
        self.overviews.len()
    }

    fn overview(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        self.overviews
            .get(index)
            .map(|band| band.clone() as Arc<dyn RasterBand>)
    }

    fn mask_band(&self) -> Option<Arc<dyn RasterBand>> {
        let template = MemBandTemplate {
            data_type: DataType::Byte,
            block_size: self.block_size,
            data: self.mask_values(),
            no_data: None,
            unit_type: String::new(),
            category_names: None,
            color_interp: ColorInterp::Undefined,
            metadata: HashMap::new(),
        };
        Some(Arc::new(MemBand::new(
            0,
            (self.width, self.height),
            &template,
            Vec::new(),
            Weak::new(),
            Access::ReadOnly,
        )))
    }

    fn mask_flags(&self) -> MaskFlags {
        if self.state().no_data.is_some() {
            MaskFlags::NODATA
        } else {
            MaskFlags::ALL_VALID
        }
    }
}

/// Write `value` as one native-endian pixel of `data_type`
pub fn encode_pixel(value: f64, data_type: DataType, out: &mut [u8]) {
    match data_type {
        DataType::Byte => out[0] = value as u8,
        DataType::UInt16 => out.copy_from_slice(&(value as u16).to_ne_bytes()),
        DataType::Int16 => out.copy_from_slice(&(value as i16).to_ne_bytes()),
        DataType::UInt32 => out.copy_from_slice(&(value as u32).to_ne_bytes()),
        DataType::Int32 => out.copy_from_slice(&(value as i32).to_ne_bytes()),
        DataType::Float32 => out.copy_from_slice(&(value as f32).to_ne_bytes()),
        DataType::Float64 => out.copy_from_slice(&value.to_ne_bytes()),
        DataType::Unknown => {}
    }
}

/// Read one native-endian pixel of `data_type`
pub fn decode_pixel(data_type: DataType, bytes: &[u8]) -> f64 {
    fn arr<const N: usize>(bytes: &[u8]) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes[..N]);
        out
    }
    match data_type {
        DataType::Byte => bytes[0] as f64,
        DataType::UInt16 => u16::from_ne_bytes(arr(bytes)) as f64,
        DataType::Int16 => i16::from_ne_bytes(arr(bytes)) as f64,
        DataType::UInt32 => u32::from_ne_bytes(arr(bytes)) as f64,
        DataType::Int32 => i32::from_ne_bytes(arr(bytes)) as f64,
        DataType::Float32 => f32::from_ne_bytes(arr(bytes)) as f64,
        DataType::Float64 => f64::from_ne_bytes(arr(bytes)),
        DataType::Unknown => 0.0,
    }
}

/// Decode a whole buffer of `data_type` pixels
pub fn decode_buffer(data_type: DataType, bytes: &[u8]) -> Vec<f64> {
    if data_type == DataType::Unknown {
        return Vec::new();
    }
    bytes
        .chunks_exact(data_type.size())
        .map(|px| decode_pixel(data_type, px))
        .collect()
}

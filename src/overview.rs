//! Overview level of a dataset presented as a dataset of its own.
//!
//! An [`OverlayDataset`] has the size of one overview level of its main
//! dataset. Pixel reads go to the level's own dataset when the engine has
//! one, band by band otherwise. Georeferencing is taken from the main
//! dataset and rescaled by the main-to-overview size ratio; RPC and
//! geolocation metadata are rescaled once and cached.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use log::debug;
use once_cell::sync::OnceCell;

use crate::constants::{MaskFlags, GEOLOCATION_DOMAIN, RPC_DOMAIN};
use crate::diag;
use crate::error::{Error, Result};
use crate::proxy::{BandLease, BandSource, ProxyBand};
use crate::raster::{read_bands_sequential, Dataset, RasterBand};
use crate::types::{Access, ColorInterp, DataType, Gcp, GeoTransform, MetadataList, Window};

/// How an overlay holds its main dataset
enum MainRef {
    /// Dropped together with the overlay
    Owned(Arc<dyn Dataset>),
    /// Kept alive by the caller
    Observed(Weak<dyn Dataset>),
}

fn same_dataset(a: &Arc<dyn Dataset>, b: &Arc<dyn Dataset>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

// (key, default, transform) of rescaled metadata items
type Rescale = (&'static str, f64, fn(f64, f64) -> f64);

fn divide(v: f64, r: f64) -> f64 {
    v / r
}

fn shift_divide(v: f64, r: f64) -> f64 {
    (v + 0.5) / r - 0.5
}

const RPC_ITEMS: [(Rescale, Axis); 4] = [
    (("LINE_OFF", 0.0, shift_divide), Axis::Y),
    (("LINE_SCALE", 1.0, divide), Axis::Y),
    (("SAMP_OFF", 0.0, shift_divide), Axis::X),
    (("SAMP_SCALE", 1.0, divide), Axis::X),
];

const GEOLOCATION_ITEMS: [(Rescale, Axis); 4] = [
    (("PIXEL_OFFSET", 0.0, divide), Axis::X),
    (("LINE_OFFSET", 0.0, divide), Axis::Y),
    (("PIXEL_STEP", 1.0, divide), Axis::X),
    (("LINE_STEP", 1.0, divide), Axis::Y),
];

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Main-to-overview size ratio per axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratio {
    pub x: f64,
    pub y: f64,
}

impl Ratio {
    fn along(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    /// Whether both axes are scaled alike
    pub fn is_uniform(&self) -> bool {
        (self.x - self.y).abs() <= f64::EPSILON * self.x.abs().max(1.0)
    }
}

fn rescale_metadata(md: &MetadataList, items: &[(Rescale, Axis)], ratio: Ratio) -> MetadataList {
    let mut out = md.clone();
    for &((key, default, transform), axis) in items {
        let value = md
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(default);
        out.set(key, &transform(value, ratio.along(axis)).to_string());
    }
    out
}

/// Dataset exposing one overview level of a main dataset
pub struct OverlayDataset {
    main: RwLock<Option<MainRef>>,
    level: usize,
    this_level_only: bool,
    size: (usize, usize),
    ratio: Ratio,
    bands: Vec<Arc<OverlayBand>>,
    gcps: OnceCell<Arc<[Gcp]>>,
    rpc: OnceCell<Option<Arc<MetadataList>>>,
    geolocation: OnceCell<Option<Arc<MetadataList>>>,
}

impl fmt::Debug for OverlayDataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OverlayDataset")
            .field("level", &self.level)
            .field("this_level_only", &self.this_level_only)
            .field("size", &self.size)
            .field("ratio", &self.ratio)
            .finish()
    }
}

impl OverlayDataset {
    /// Overlay of overview `level` of `main`, owning it
    pub fn owning(
        main: Arc<dyn Dataset>,
        level: usize,
        this_level_only: bool,
    ) -> Result<Arc<Self>> {
        Self::new(main, level, this_level_only, true)
    }

    /// Overlay of overview `level` of `main`, which the caller keeps alive
    pub fn observing(
        main: &Arc<dyn Dataset>,
        level: usize,
        this_level_only: bool,
    ) -> Result<Arc<Self>> {
        Self::new(main.clone(), level, this_level_only, false)
    }

    fn new(
        main: Arc<dyn Dataset>,
        level: usize,
        this_level_only: bool,
        owned: bool,
    ) -> Result<Arc<Self>> {
        let invalid = |reason: String| diag::fail(Error::InvalidOverview(reason));

        let count = main.band_count();
        if count == 0 {
            return Err(invalid(format!("{} has no bands", main.description())));
        }
        let mut size = None;
        for index in 1..=count {
            let band = main
                .band(index)
                .ok_or_else(|| invalid(format!("band {} missing", index)))?;
            let overview = band
                .overview(level)
                .ok_or_else(|| invalid(format!("band {} has no overview {}", index, level)))?;
            match size {
                None => size = Some(overview.size()),
                Some(s) if s != overview.size() => {
                    return Err(invalid(format!(
                        "overview {} of band {} is {:?}, expected {:?}",
                        level,
                        index,
                        overview.size(),
                        s
                    )));
                }
                Some(_) => {}
            }
        }
        let size = size.unwrap_or((0, 0));
        if size.0 == 0 || size.1 == 0 {
            return Err(invalid(format!("overview {} is empty", level)));
        }

        let (main_w, main_h) = main.raster_size();
        let ratio = Ratio {
            x: main_w as f64 / size.0 as f64,
            y: main_h as f64 / size.1 as f64,
        };
        debug!(
            "overlay of {} level {} ({}x{}, ratio {}x{})",
            main.description(),
            level,
            size.0,
            size.1,
            ratio.x,
            ratio.y
        );

        let main = if owned {
            MainRef::Owned(main)
        } else {
            MainRef::Observed(Arc::downgrade(&main))
        };

        Ok(Arc::new_cyclic(|this: &Weak<OverlayDataset>| {
            let owner: Weak<dyn Dataset> = this.clone();
            let bands = (1..=count)
                .map(|number| {
                    let source = OverlaySource {
                        overlay: this.clone(),
                        band: number,
                        level,
                    };
                    Arc::new(OverlayBand::new(source, this_level_only, owner.clone()))
                })
                .collect();
            OverlayDataset {
                main: RwLock::new(Some(main)),
                level,
                this_level_only,
                size,
                ratio,
                bands,
                gcps: OnceCell::new(),
                rpc: OnceCell::new(),
                geolocation: OnceCell::new(),
            }
        }))
    }

    /// The main dataset, `None` once detached or dropped by its owner
    pub fn main(&self) -> Option<Arc<dyn Dataset>> {
        match self.main.read().unwrap_or_else(|e| e.into_inner()).as_ref()? {
            MainRef::Owned(main) => Some(main.clone()),
            MainRef::Observed(main) => main.upgrade(),
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn this_level_only(&self) -> bool {
        self.this_level_only
    }

    pub fn ratio(&self) -> Ratio {
        self.ratio
    }

    pub fn owns_main(&self) -> bool {
        matches!(
            self.main.read().unwrap_or_else(|e| e.into_inner()).as_ref(),
            Some(MainRef::Owned(_))
        )
    }

    /// Drop the reference to the main dataset
    ///
    /// Bands resolve their main band through the overlay, so later calls
    /// on the overlay and its bands fail as if the resource could not be
    /// resolved. Returns whether a reference was still held.
    pub fn detach_main(&self) -> bool {
        let main = self.main.write().unwrap_or_else(|e| e.into_inner()).take();
        main.is_some()
    }

    fn main_or_fail(&self) -> Result<Arc<dyn Dataset>> {
        self.main()
            .ok_or_else(|| diag::fail(Error::InvalidOverview("main dataset detached".to_string())))
    }

    // Distinct dataset backing the overview bands of `bands`, if shared
    fn level_dataset(&self, main: &Arc<dyn Dataset>, bands: &[usize]) -> Option<Arc<dyn Dataset>> {
        let mut found: Option<Arc<dyn Dataset>> = None;
        for &index in bands {
            let overview = self.bands.get(index.checked_sub(1)?)?.source.overview()?;
            let dataset = overview.dataset()?;
            if same_dataset(&dataset, main) || dataset.raster_size() != self.size {
                return None;
            }
            match &found {
                Some(prev) if !same_dataset(prev, &dataset) => return None,
                Some(_) => {}
                None => found = Some(dataset),
            }
        }
        found
    }

    fn rescaled(&self, domain: &str) -> Option<Arc<MetadataList>> {
        let (cell, items) = match domain {
            RPC_DOMAIN => (&self.rpc, &RPC_ITEMS),
            GEOLOCATION_DOMAIN => (&self.geolocation, &GEOLOCATION_ITEMS),
            _ => return None,
        };
        if let Some(md) = cell.get() {
            return md.clone();
        }
        let main = self.main()?;
        cell.get_or_init(|| {
            main.metadata(domain)
                .map(|md| Arc::new(rescale_metadata(&md, items, self.ratio)))
        })
        .clone()
    }
}

impl Drop for OverlayDataset {
    fn drop(&mut self) {
        self.detach_main();
    }
}

impl Dataset for OverlayDataset {
    fn description(&self) -> String {
        self.main().map(|m| m.description()).unwrap_or_default()
    }

    fn raster_size(&self) -> (usize, usize) {
        self.size
    }

    fn access(&self) -> Access {
        self.main().map_or(Access::ReadOnly, |m| m.access())
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        let band = self.bands.get(index.checked_sub(1)?)?;
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
        let main = self.main_or_fail()?;
        match self.level_dataset(&main, bands) {
            Some(level) => level.read_raster(window, bands, buf, buf_size, data_type),
            None => read_bands_sequential(self, window, bands, buf, buf_size, data_type),
        }
    }

    fn projection(&self) -> Option<Arc<str>> {
        self.main()?.projection()
    }

    fn geo_transform(&self) -> Result<GeoTransform> {
        let gt = self.main_or_fail()?.geo_transform()?;
        Ok(gt.scaled(self.ratio.x, self.ratio.y))
    }

    fn gcps(&self) -> Arc<[Gcp]> {
        if let Some(gcps) = self.gcps.get() {
            return gcps.clone();
        }
        let Some(main) = self.main() else {
            return Arc::from(Vec::new());
        };
        self.gcps
            .get_or_init(|| {
                main.gcps()
                    .iter()
                    .map(|gcp| Gcp {
                        pixel: gcp.pixel / self.ratio.x,
                        line: gcp.line / self.ratio.y,
                        ..gcp.clone()
                    })
                    .collect::<Vec<_>>()
                    .into()
            })
            .clone()
    }

    fn gcp_projection(&self) -> Option<Arc<str>> {
        self.main()?.gcp_projection()
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        if domain == RPC_DOMAIN || domain == GEOLOCATION_DOMAIN {
            return self.rescaled(domain);
        }
        let main = self.main()?;
        let all: Vec<usize> = (1..=self.bands.len()).collect();
        if let Some(md) = self.level_dataset(&main, &all).and_then(|level| level.metadata(domain)) {
            return Some(md);
        }
        main.metadata(domain)
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        self.metadata(domain)
            .and_then(|md| md.get(name).map(Arc::from))
    }

    fn file_list(&self) -> Vec<String> {
        self.main().map(|m| m.file_list()).unwrap_or_default()
    }
}

// Resolves band `band` of the main dataset, then its overview, on every
// call. Holds no strong reference to anything of the main dataset.
struct OverlaySource {
    overlay: Weak<OverlayDataset>,
    band: usize,
    level: usize,
}

impl OverlaySource {
    fn main_band(&self) -> Option<Arc<dyn RasterBand>> {
        self.overlay.upgrade()?.main()?.band(self.band)
    }

    fn overview(&self) -> Option<Arc<dyn RasterBand>> {
        self.main_band()?.overview(self.level)
    }
}

impl BandSource for OverlaySource {
    fn acquire_band(&self) -> Result<BandLease> {
        let main = self.main_band().ok_or_else(|| {
            diag::fail(Error::InvalidOverview("main dataset detached".to_string()))
        })?;
        let overview = main.overview(self.level).ok_or_else(|| {
            diag::fail(Error::InvalidOverview(format!("overview {} vanished", self.level)))
        })?;
        Ok(BandLease::new(overview, None))
    }

    fn describe(&self) -> String {
        format!("overview {}", self.level)
    }
}

/// Band of an [`OverlayDataset`]
pub struct OverlayBand {
    source: Arc<OverlaySource>,
    proxy: ProxyBand,
    this_level_only: bool,
}

impl fmt::Debug for OverlayBand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OverlayBand")
            .field("number", &self.proxy.band_number())
            .field("level", &self.source.level)
            .finish()
    }
}

impl OverlayBand {
    fn new(source: OverlaySource, this_level_only: bool, owner: Weak<dyn Dataset>) -> Self {
        let number = source.band;
        let source = Arc::new(source);
        OverlayBand {
            proxy: ProxyBand::new(source.clone(), number).with_owner(owner),
            source,
            this_level_only,
        }
    }

    /// Whether the band still refers to its main band
    pub fn is_attached(&self) -> bool {
        self.source.main_band().is_some()
    }
}

impl RasterBand for OverlayBand {
    fn band_number(&self) -> usize {
        self.proxy.band_number()
    }

    fn size(&self) -> (usize, usize) {
        self.proxy.size()
    }

    fn data_type(&self) -> DataType {
        self.proxy.data_type()
    }

    fn block_size(&self) -> (usize, usize) {
        self.proxy.block_size()
    }

    fn dataset(&self) -> Option<Arc<dyn Dataset>> {
        self.proxy.dataset()
    }

    fn read_block(&self, bx: usize, by: usize, buf: &mut [u8]) -> Result<()> {
        self.proxy.read_block(bx, by, buf)
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

    fn no_data_value(&self) -> Option<f64> {
        self.proxy.no_data_value()
    }

    fn offset(&self) -> f64 {
        self.proxy.offset()
    }

    fn scale(&self) -> f64 {
        self.proxy.scale()
    }

    fn unit_type(&self) -> Arc<str> {
        self.proxy.unit_type()
    }

    fn category_names(&self) -> Option<Arc<[String]>> {
        self.proxy.category_names()
    }

    fn color_interpretation(&self) -> ColorInterp {
        self.proxy.color_interpretation()
    }

    fn description(&self) -> String {
        self.proxy.description()
    }

    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>> {
        self.proxy.metadata(domain)
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        self.proxy.metadata_item(name, domain)
    }

    fn overview_count(&self) -> usize {
        if self.this_level_only {
            return 0;
        }
        self.source
            .main_band()
            .map_or(0, |b| b.overview_count().saturating_sub(self.source.level + 1))
    }

    fn overview(&self, index: usize) -> Option<Arc<dyn RasterBand>> {
        if index >= self.overview_count() {
            return None;
        }
        self.source.main_band()?.overview(self.source.level + 1 + index)
    }

    fn mask_band(&self) -> Option<Arc<dyn RasterBand>> {
        self.proxy.lease()?.mask_band()
    }

    fn mask_flags(&self) -> MaskFlags {
        self.proxy.mask_flags()
    }
}

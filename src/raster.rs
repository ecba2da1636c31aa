//! Boundary of the underlying raster engine.
//!
//! The pool only calls [`RasterEngine::open`] / [`RasterEngine::close`];
//! the façades forward everything else. All methods take `&self`: a handle
//! borrowed from the pool may be shared by several threads, so
//! implementations keep mutable state behind their own locks.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::constants::{MaskFlags, OpenFlags};
use crate::error::{Error, Result};
use crate::types::{Access, ColorInterp, DataType, Gcp, GeoTransform, MetadataList, Window};

/// Parameters of an engine open call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest<'a> {
    pub path: &'a str,
    pub access: Access,
    pub flags: OpenFlags,
    pub options: &'a [(String, String)],
}

/// The external raster engine
pub trait RasterEngine: Send + Sync {
    fn open(&self, request: &OpenRequest<'_>) -> Result<Arc<dyn Dataset>>;

    /// Close a handle the pool no longer tracks
    fn close(&self, dataset: Arc<dyn Dataset>) -> Result<()> {
        dataset.flush_cache()?;
        drop(dataset);
        Ok(())
    }
}

/// Opaque engine-specific handle returned by `internal_handle`
pub type InternalHandle = Arc<dyn Any + Send + Sync>;

/// A raster dataset
pub trait Dataset: Send + Sync {
    /// Identifier the dataset was opened from
    fn description(&self) -> String;
    fn raster_size(&self) -> (usize, usize);
    fn access(&self) -> Access {
        Access::ReadOnly
    }

    fn band_count(&self) -> usize;
    /// Band by 1-based index
    fn band(&self, index: usize) -> Option<Arc<dyn RasterBand>>;

    /// Read `window` of `bands` into `buf`, band-sequential, resampled to
    /// `buf_size` pixels of `data_type`
    fn read_raster(
        &self,
        window: Window,
        bands: &[usize],
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()> {
        read_bands_sequential(self, window, bands, buf, buf_size, data_type)
    }

    fn write_raster(
        &self,
        _window: Window,
        _bands: &[usize],
        _buf: &[u8],
        _buf_size: (usize, usize),
        _data_type: DataType,
    ) -> Result<()> {
        Err(Error::ReadOnly)
    }

    fn projection(&self) -> Option<Arc<str>>;
    fn set_projection(&self, _wkt: &str) -> Result<()> {
        Err(Error::NotSupported("set_projection"))
    }
    fn geo_transform(&self) -> Result<GeoTransform>;
    fn set_geo_transform(&self, _gt: &GeoTransform) -> Result<()> {
        Err(Error::NotSupported("set_geo_transform"))
    }

    fn gcps(&self) -> Arc<[Gcp]>;
    fn gcp_projection(&self) -> Option<Arc<str>>;
    fn set_gcps(&self, _gcps: &[Gcp], _projection: Option<&str>) -> Result<()> {
        Err(Error::NotSupported("set_gcps"))
    }

    /// Metadata list of `domain` (`""` is the default domain)
    fn metadata(&self, domain: &str) -> Option<Arc<MetadataList>>;
    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>>;
    fn set_metadata(&self, _metadata: &MetadataList, _domain: &str) -> Result<()> {
        Err(Error::NotSupported("set_metadata"))
    }
    fn set_metadata_item(&self, _name: &str, _value: &str, _domain: &str) -> Result<()> {
        Err(Error::NotSupported("set_metadata_item"))
    }

    /// Files making up the dataset
    fn file_list(&self) -> Vec<String>;

    /// Engine-specific low-level handle
    fn internal_handle(&self, _name: &str) -> Option<InternalHandle> {
        None
    }

    fn flush_cache(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (w, h) = self.raster_size();
        write!(f, "Dataset({}, {}x{})", self.description(), w, h)
    }
}

/// A raster band
pub trait RasterBand: Send + Sync {
    /// 1-based index within the owning dataset, 0 for overviews and masks
    fn band_number(&self) -> usize;
    fn size(&self) -> (usize, usize);
    fn data_type(&self) -> DataType;
    fn block_size(&self) -> (usize, usize);

    /// Dataset the band belongs to, if any
    fn dataset(&self) -> Option<Arc<dyn Dataset>> {
        None
    }

    /// Read block (`bx`, `by`) into `buf`; partial edge blocks are padded
    fn read_block(&self, bx: usize, by: usize, buf: &mut [u8]) -> Result<()>;
    fn write_block(&self, _bx: usize, _by: usize, _buf: &[u8]) -> Result<()> {
        Err(Error::ReadOnly)
    }

    /// Read `window` into `buf`, nearest-neighbour resampled to `buf_size`
    fn read(
        &self,
        window: Window,
        buf: &mut [u8],
        buf_size: (usize, usize),
        data_type: DataType,
    ) -> Result<()>;
    fn write(
        &self,
        _window: Window,
        _buf: &[u8],
        _buf_size: (usize, usize),
        _data_type: DataType,
    ) -> Result<()> {
        Err(Error::ReadOnly)
    }

    fn no_data_value(&self) -> Option<f64> {
        None
    }
    fn set_no_data_value(&self, _value: Option<f64>) -> Result<()> {
        Err(Error::NotSupported("set_no_data_value"))
    }
    fn offset(&self) -> f64 {
        0.0
    }
    fn scale(&self) -> f64 {
        1.0
    }
    fn unit_type(&self) -> Arc<str> {
        Arc::from("")
    }
    fn category_names(&self) -> Option<Arc<[String]>> {
        None
    }
    fn color_interpretation(&self) -> ColorInterp {
        ColorInterp::Undefined
    }
    fn description(&self) -> String {
        String::new()
    }

    fn metadata(&self, _domain: &str) -> Option<Arc<MetadataList>> {
        None
    }
    fn metadata_item(&self, name: &str, domain: &str) -> Option<Arc<str>> {
        self.metadata(domain)
            .and_then(|md| md.get(name).map(Arc::from))
    }
    fn set_metadata_item(&self, _name: &str, _value: &str, _domain: &str) -> Result<()> {
        Err(Error::NotSupported("set_metadata_item"))
    }

    fn overview_count(&self) -> usize {
        0
    }
    fn overview(&self, _index: usize) -> Option<Arc<dyn RasterBand>> {
        None
    }
    fn mask_band(&self) -> Option<Arc<dyn RasterBand>> {
        None
    }
    fn mask_flags(&self) -> MaskFlags {
        MaskFlags::ALL_VALID
    }

    fn flush_cache(&self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for dyn RasterBand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (w, h) = self.size();
        write!(f, "RasterBand(#{}, {}x{}, {:?})", self.band_number(), w, h, self.data_type())
    }
}

/// Byte length of a band-sequential buffer
pub fn buffer_len(buf_size: (usize, usize), band_count: usize, data_type: DataType) -> usize {
    buf_size.0 * buf_size.1 * band_count * data_type.size()
}

/// Default dataset read: one band after the other
pub fn read_bands_sequential<D: Dataset + ?Sized>(
    dataset: &D,
    window: Window,
    bands: &[usize],
    buf: &mut [u8],
    buf_size: (usize, usize),
    data_type: DataType,
) -> Result<()> {
    let needed = buffer_len(buf_size, bands.len(), data_type);
    if buf.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            got: buf.len(),
        });
    }
    let band_len = buffer_len(buf_size, 1, data_type);
    for (i, &index) in bands.iter().enumerate() {
        let band = dataset.band(index).ok_or(Error::BandOutOfRange {
            index,
            count: dataset.band_count(),
        })?;
        band.read(
            window,
            &mut buf[i * band_len..(i + 1) * band_len],
            buf_size,
            data_type,
        )?;
    }
    Ok(())
}

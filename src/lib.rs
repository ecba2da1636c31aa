// src/lib.rs
//! Pooled proxy datasets over lazily opened raster resources, and a
//! logical stream view over page-structured containers.

pub mod config;
pub mod constants;
pub mod diag;
pub mod error;
pub mod handle;
pub mod mem;
pub mod overview;
pub mod paged;
pub mod pool;
pub mod proxy;
pub mod proxy_pool;
pub mod raster;
pub mod translate;
pub mod types;

pub use constants::{MaskFlags, OpenFlags};
pub use error::{Error, ErrorKind, Result};
pub use handle::{FileHandle, MmapHandle, VirtualHandle, Whence};
pub use overview::{OverlayBand, OverlayDataset};
pub use paged::PagedStreamHandle;
pub use pool::{PoolGuard, PoolKey, PoolRef, PoolStats, ResourcePool};
pub use proxy::{BandSource, DatasetSource, ProxyBand, ProxyDataset};
pub use proxy_pool::{ProxyPoolBand, ProxyPoolDataset};
pub use raster::{Dataset, RasterBand, RasterEngine};
pub use translate::{logical_to_physical, PageLayout};
pub use types::{Access, DataType, Gcp, GeoTransform, MetadataList, Window};

use bitflags::bitflags;

// Flags passed to the engine open call
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const RASTER = 0x01;
        const UPDATE = 0x02;
        const SHARED = 0x04;
        /// Do not register the opened handle in any process-wide open list
        const INTERNAL = 0x08;
        const VERBOSE_ERROR = 0x10;
        /// Disable multi-threaded block decoding, which may re-enter the pool
        const NO_THREADED_DECODE = 0x20;
    }
}

// Mask band flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MaskFlags: u32 {
        const ALL_VALID = 0x01;
        const PER_DATASET = 0x02;
        const ALPHA = 0x04;
        const NODATA = 0x08;
    }
}

/// Flags the pool always adds when opening an underlying resource.
pub const POOL_OPEN_FLAGS: OpenFlags = OpenFlags::RASTER
    .union(OpenFlags::INTERNAL)
    .union(OpenFlags::VERBOSE_ERROR)
    .union(OpenFlags::NO_THREADED_DECODE);

/// Configuration key for the maximum number of pooled resources
pub const MAX_POOL_SIZE_KEY: &str = "MAX_DATASET_POOL_SIZE";
/// Default pool capacity
pub const DEFAULT_POOL_SIZE: usize = 100;
/// Smallest accepted pool capacity
pub const MIN_POOL_SIZE: usize = 2;
/// Largest accepted pool capacity
pub const MAX_POOL_SIZE: usize = 1000;

/// Largest physical page size a paged container may declare
pub const MAX_PAGE_SIZE: u64 = 16 * 1024 * 1024;

/// Metadata domain holding rational polynomial coefficients
pub const RPC_DOMAIN: &str = "RPC";
/// Metadata domain describing geolocation arrays
pub const GEOLOCATION_DOMAIN: &str = "GEOLOCATION";

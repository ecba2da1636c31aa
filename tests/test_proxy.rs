use std::sync::Arc;

use proxypool::config::PoolConfig;
use proxypool::constants::MaskFlags;
use proxypool::diag;
use proxypool::error::ErrorKind;
use proxypool::mem::{decode_buffer, MemDataset, MemEngine, MemTemplate};
use proxypool::pool::{PoolKey, ResourcePool};
use proxypool::{
    Access, DataType, Dataset, Gcp, GeoTransform, ProxyDataset, ProxyPoolDataset, RasterBand,
    Window,
};

const WKT: &str = "LOCAL_CS[\"template\"]";
const OVERRIDE_WKT: &str = "LOCAL_CS[\"declared\"]";

fn template() -> MemTemplate {
    MemTemplate::new(8, 8)
        .with_band(DataType::Byte, (4, 4), 0.0)
        .with_band(DataType::UInt16, (8, 2), 100.0)
        .with_projection(WKT)
        .with_geo_transform(GeoTransform([10.0, 1.0, 0.0, 20.0, 0.0, -1.0]))
        .with_metadata_item("", "FOO", "1")
        .with_overviews(&[2])
        .with_gcps(
            vec![Gcp {
                id: "1".to_string(),
                pixel: 4.0,
                line: 2.0,
                x: 14.0,
                y: 18.0,
                ..Gcp::default()
            }],
            WKT,
        )
}

// Common test setup
fn setup_test_pool(capacity: usize) -> (Arc<MemEngine>, Arc<ResourcePool>) {
    let engine = Arc::new(MemEngine::new());
    for path in ["a.tif", "b.tif", "c.tif"] {
        engine.register(path, template());
    }
    let pool = ResourcePool::new(PoolConfig::with_max_size(capacity), engine.clone());
    (engine, pool)
}

fn declared(pool: &Arc<ResourcePool>, path: &str) -> Arc<ProxyPoolDataset> {
    ProxyPoolDataset::builder(pool.clone(), path, 8, 8)
        .add_band(DataType::Byte, (4, 4))
        .add_band(DataType::UInt16, (8, 2))
        .build()
}

fn read_band(band: &dyn RasterBand, data_type: DataType) -> Vec<f64> {
    let (w, h) = band.size();
    let mut buf = vec![0u8; w * h * data_type.size()];
    band.read(Window::new(0, 0, w, h), &mut buf, (w, h), data_type).unwrap();
    decode_buffer(data_type, &buf)
}

#[test]
fn test_declared_attributes_need_no_open() {
    let (engine, pool) = setup_test_pool(4);
    let ds = ProxyPoolDataset::builder(pool.clone(), "a.tif", 8, 8)
        .projection(OVERRIDE_WKT)
        .geo_transform(GeoTransform([0.0, 5.0, 0.0, 0.0, 0.0, -5.0]))
        .add_band(DataType::Byte, (4, 4))
        .build();

    assert_eq!(ds.raster_size(), (8, 8));
    assert_eq!(ds.band_count(), 1);
    assert_eq!(&*ds.projection().unwrap(), OVERRIDE_WKT);
    assert_eq!(ds.geo_transform().unwrap().0[1], 5.0);
    let band = ds.band(1).unwrap();
    assert_eq!(band.data_type(), DataType::Byte);
    assert_eq!(band.block_size(), (4, 4));
    assert_eq!(band.size(), (8, 8));
    assert_eq!(engine.open_count(), 0);
    assert_eq!(pool.size(), 0);

    // Overrides win over the opened resource
    read_band(&*band, DataType::Byte);
    assert_eq!(engine.open_count(), 1);
    assert_eq!(&*ds.projection().unwrap(), OVERRIDE_WKT);
    assert_eq!(ds.geo_transform().unwrap().0[1], 5.0);
}

#[test]
fn test_undeclared_attributes_come_from_resource() {
    let (engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "a.tif");

    assert_eq!(&*ds.projection().unwrap(), WKT);
    assert_eq!(ds.geo_transform().unwrap(), GeoTransform([10.0, 1.0, 0.0, 20.0, 0.0, -1.0]));
    assert_eq!(ds.file_list(), vec!["a.tif".to_string()]);
    assert_eq!(engine.open_count(), 1);

    // Nothing stays borrowed between calls
    assert_eq!(pool.refcount_of(ds.key()), Some(0));
}

#[test]
fn test_pixel_reads_are_forwarded() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "a.tif");

    let first = read_band(&*ds.band(1).unwrap(), DataType::Byte);
    assert_eq!(first.len(), 64);
    assert_eq!(first[9], 9.0);
    let second = read_band(&*ds.band(2).unwrap(), DataType::UInt16);
    assert_eq!(second[0], 100.0);
    assert_eq!(second[63], 163.0);

    let mut buf = vec![0u8; 2 * 16];
    ds.read_raster(Window::new(0, 0, 4, 4), &[1, 2], &mut buf, (4, 4), DataType::Byte)
        .unwrap();
    assert_eq!(buf[1], 1);
    assert_eq!(buf[16 + 1], 101);

    let band = ds.band(1).unwrap();
    let mut block = vec![0u8; 16];
    band.read_block(1, 1, &mut block).unwrap();
    assert_eq!(block[0], 36);
}

#[test]
fn test_metadata_cache_refreshes_after_reopen() {
    let (engine, pool) = setup_test_pool(2);
    let ds = declared(&pool, "a.tif");

    let first = ds.metadata("").unwrap();
    assert_eq!(first.get("FOO"), Some("1"));
    let first_item = ds.metadata_item("FOO", "").unwrap();

    // Push "a.tif" out of the pool, then change what it holds
    drop(pool.acquire(&PoolKey::new("b.tif"), false).unwrap());
    drop(pool.acquire(&PoolKey::new("c.tif"), false).unwrap());
    assert!(!pool.contains(ds.key()));
    engine
        .update("a.tif", |t| {
            t.metadata.entry(String::new()).or_default().set("FOO", "2");
        })
        .unwrap();

    let second = ds.metadata("").unwrap();
    assert_eq!(second.get("FOO"), Some("2"));
    assert_eq!(&*ds.metadata_item("FOO", "").unwrap(), "2");
    assert_eq!(engine.opens_of("a.tif"), 2);

    // Snapshots from before the reopen stay readable
    assert_eq!(first.get("FOO"), Some("1"));
    assert_eq!(&*first_item, "1");
}

#[test]
fn test_gcps_are_deep_copies() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "a.tif");

    let first = ds.gcps();
    let second = ds.gcps();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].pixel, 4.0);
    assert_eq!(&*first, &*second);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(&*ds.gcp_projection().unwrap(), WKT);
}

#[test]
fn test_band_attribute_caches() {
    let (engine, pool) = setup_test_pool(4);
    engine
        .update("a.tif", |t| {
            let band = t.band_mut(1).unwrap();
            band.unit_type = "metre".to_string();
            band.category_names = Some(vec!["water".to_string(), "land".to_string()]);
            band.metadata.entry(String::new()).or_default().set("STATS", "ok");
        })
        .unwrap();
    let ds = declared(&pool, "a.tif");
    let band = ds.band(1).unwrap();

    assert_eq!(&*band.unit_type(), "metre");
    assert_eq!(band.category_names().unwrap().len(), 2);
    assert_eq!(band.metadata("").unwrap().get("STATS"), Some("ok"));
    assert_eq!(&*band.metadata_item("STATS", "").unwrap(), "ok");
    assert!(band.metadata_item("MISSING", "").is_none());
}

#[test]
fn test_unresolvable_resource_returns_sentinels() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "missing.tif");
    diag::clear_last_error();

    // Declared values still answer
    assert_eq!(ds.raster_size(), (8, 8));
    assert_eq!(ds.band_count(), 2);

    assert!(ds.metadata("").is_none());
    assert!(ds.projection().is_none());
    assert!(ds.gcps().is_empty());
    assert!(ds.file_list().is_empty());
    assert!(ds.geo_transform().is_err());
    assert_eq!(diag::last_error().unwrap().kind, ErrorKind::ResolutionFailed);

    let band = ds.band(1).unwrap();
    let mut buf = vec![0u8; 64];
    let err = band
        .read(Window::new(0, 0, 8, 8), &mut buf, (8, 8), DataType::Byte)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResolutionFailed);
    assert_eq!(band.overview_count(), 0);
    assert!(band.overview(0).is_none());
    assert!(band.mask_band().is_none());
    assert_eq!(band.no_data_value(), None);
    assert_eq!(pool.size(), 0);
}

#[test]
fn test_exhausted_pool_fails_calls() {
    let (_engine, pool) = setup_test_pool(2);
    let a = pool.acquire(&PoolKey::new("a.tif"), false).unwrap();
    let b = pool.acquire(&PoolKey::new("b.tif"), false).unwrap();
    let ds = declared(&pool, "c.tif");

    assert!(ds.metadata("").is_none());
    assert_eq!(diag::last_error().unwrap().kind, ErrorKind::PoolExhausted);

    drop(a);
    assert_eq!(ds.metadata("").unwrap().get("FOO"), Some("1"));
    drop(b);
}

#[test]
fn test_overview_sub_facades() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "a.tif");
    let band = ds.band(1).unwrap();

    assert_eq!(band.overview_count(), 1);
    let overview = band.overview(0).unwrap();
    assert_eq!(overview.size(), (4, 4));
    assert_eq!(overview.data_type(), DataType::Byte);
    assert_eq!(overview.band_number(), 0);

    // Cached per index
    let again = band.overview(0).unwrap();
    assert!(Arc::ptr_eq(&overview, &again));
    assert!(band.overview(1).is_none());

    // Decimated by two: (x, y) of the overview is (2x, 2y) of the band
    let values = read_band(&*overview, DataType::Byte);
    assert_eq!(values[0], 0.0);
    assert_eq!(values[1], 2.0);
    assert_eq!(values[4], 16.0);

    // Resolved through the dataset's entry, released after every call
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.refcount_of(ds.key()), Some(0));
    assert!(overview.dataset().is_some());
}

#[test]
fn test_mask_sub_facades() {
    let (engine, pool) = setup_test_pool(4);
    engine
        .update("a.tif", |t| t.band_mut(1).unwrap().no_data = Some(9.0))
        .unwrap();
    let ds = declared(&pool, "a.tif");
    let pooled = ds.pool_band(1).unwrap();

    assert!(!pooled.has_mask_description());
    pooled.add_mask_description(DataType::Byte, (8, 1));
    let mask = pooled.mask_band().unwrap();
    assert_eq!(mask.block_size(), (8, 1));
    assert_eq!(mask.size(), (8, 8));

    let values = read_band(&*mask, DataType::Byte);
    assert_eq!(values[9], 0.0);
    assert_eq!(values[8], 255.0);
    assert_eq!(pooled.mask_flags(), MaskFlags::NODATA);

    // Band 2 discovers its mask from the resource
    let other = ds.pool_band(2).unwrap();
    other.add_mask_description_from_underlying().unwrap();
    assert!(other.has_mask_description());
    let mask = other.mask_band().unwrap();
    assert_eq!(mask.data_type(), DataType::Byte);
    assert_eq!(mask.block_size(), (8, 2));
    assert_eq!(other.mask_flags(), MaskFlags::ALL_VALID);
    assert_eq!(pool.refcount_of(ds.key()), Some(0));
}

#[test]
fn test_open_declares_from_resource() {
    let (engine, pool) = setup_test_pool(4);
    let ds = ProxyPoolDataset::open(pool.clone(), "a.tif", Vec::new()).unwrap();

    assert_eq!(ds.raster_size(), (8, 8));
    assert_eq!(ds.band_count(), 2);
    assert_eq!(ds.band(2).unwrap().data_type(), DataType::UInt16);
    assert_eq!(ds.band(2).unwrap().block_size(), (8, 2));
    assert_eq!(&*ds.projection().unwrap(), WKT);
    assert_eq!(engine.opens_of("a.tif"), 1);
    assert_eq!(pool.refcount_of(ds.key()), Some(0));

    let err = ProxyPoolDataset::open(pool.clone(), "missing.tif", Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResolutionFailed);
}

#[test]
fn test_builder_open_uses_declared_key() {
    let (engine, pool) = setup_test_pool(4);
    let plain = ProxyPoolDataset::open(pool.clone(), "a.tif", Vec::new()).unwrap();
    let tagged = ProxyPoolDataset::builder(pool.clone(), "a.tif", 0, 0)
        .owner("mosaic")
        .shared(true)
        .projection(OVERRIDE_WKT)
        .open()
        .unwrap();

    assert_eq!(tagged.raster_size(), (8, 8));
    assert_eq!(tagged.band_count(), 2);
    assert!(tagged.is_shared());
    assert_eq!(tagged.key().owner.as_deref(), Some("mosaic"));
    // Declared values are kept, the rest comes from the resource
    assert_eq!(&*tagged.projection().unwrap(), OVERRIDE_WKT);
    assert_eq!(tagged.geo_transform().unwrap().0[0], 10.0);

    // The declaring open went through the tagged entry
    assert_eq!(pool.size(), 2);
    assert_eq!(engine.opens_of("a.tif"), 2);
    assert_eq!(pool.refcount_of(tagged.key()), Some(0));
    assert_eq!(pool.refcount_of(plain.key()), Some(0));

    read_band(&*tagged.band(1).unwrap(), DataType::Byte);
    assert_eq!(engine.opens_of("a.tif"), 2);
}

#[test]
fn test_sparse_band_declarations() {
    let (engine, pool) = setup_test_pool(4);
    engine.register(
        "three.tif",
        MemTemplate::new(8, 8)
            .with_band(DataType::Byte, (4, 4), 0.0)
            .with_band(DataType::Byte, (4, 4), 100.0)
            .with_band(DataType::Byte, (4, 4), 150.0),
    );
    let ds = ProxyPoolDataset::builder(pool.clone(), "three.tif", 8, 8)
        .add_band_at(3, DataType::Byte, (4, 4))
        .build();

    assert_eq!(ds.band_count(), 3);
    assert!(ds.band(1).is_none());
    assert!(ds.band(2).is_none());
    assert!(ds.pool_band(2).is_none());
    assert_eq!(engine.opens_of("three.tif"), 0);

    let band = ds.band(3).unwrap();
    assert_eq!(band.band_number(), 3);
    let values = read_band(&*band, DataType::Byte);
    assert_eq!(values[0], 150.0);
    assert_eq!(values[9], 159.0);

    let mut buf = vec![0u8; 64];
    ds.read_raster(Window::new(0, 0, 8, 8), &[3], &mut buf, (8, 8), DataType::Byte)
        .unwrap();
    assert_eq!(buf[8], 158);

    // Index 0 is rejected, a later index extends the count
    diag::clear_last_error();
    let ds = ProxyPoolDataset::builder(pool.clone(), "three.tif", 8, 8)
        .add_band_at(0, DataType::Byte, (4, 4))
        .add_band_at(2, DataType::Byte, (4, 4))
        .add_band(DataType::Byte, (4, 4))
        .build();
    assert_eq!(diag::last_error().unwrap().kind, ErrorKind::AppDefined);
    assert_eq!(ds.band_count(), 3);
    assert!(ds.band(1).is_none());
    assert_eq!(read_band(&*ds.band(3).unwrap(), DataType::Byte)[0], 150.0);
}

#[test]
fn test_update_access_writes_through() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = ProxyPoolDataset::builder(pool.clone(), "a.tif", 8, 8)
        .access(Access::Update)
        .add_band(DataType::Byte, (4, 4))
        .build();
    assert_eq!(ds.access(), Access::Update);
    assert_eq!(ds.key().access, Access::Update);

    let band = ds.band(1).unwrap();
    band.write(Window::new(0, 0, 2, 1), &[200, 201], (2, 1), DataType::Byte)
        .unwrap();
    let values = read_band(&*band, DataType::Byte);
    assert_eq!(&values[..3], &[200.0, 201.0, 2.0]);

    let read_only = declared(&pool, "a.tif");
    let err = read_only
        .band(1)
        .unwrap()
        .write(Window::new(0, 0, 1, 1), &[1], (1, 1), DataType::Byte)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}

#[test]
fn test_owner_tag_isolates_entries() {
    let (engine, pool) = setup_test_pool(4);
    let plain = declared(&pool, "a.tif");
    let tagged = ProxyPoolDataset::builder(pool.clone(), "a.tif", 8, 8)
        .owner("mosaic")
        .add_band(DataType::Byte, (4, 4))
        .build();

    read_band(&*plain.band(1).unwrap(), DataType::Byte);
    read_band(&*tagged.band(1).unwrap(), DataType::Byte);
    assert_eq!(pool.size(), 2);
    assert_eq!(engine.opens_of("a.tif"), 2);
    assert_eq!(tagged.key().owner.as_deref(), Some("mosaic"));
}

#[test]
fn test_internal_handle_is_delegated() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "a.tif");

    diag::clear_last_error();
    let handle = ds.internal_handle("DESCRIPTION").unwrap();
    assert_eq!(handle.downcast_ref::<String>().map(String::as_str), Some("a.tif"));
    // Handing out the handle is reported as a warning
    let warning = diag::last_error().unwrap();
    assert_eq!(warning.severity, diag::Severity::Warning);
    assert_eq!(warning.kind, ErrorKind::AppDefined);
    assert!(warning.message.contains("a.tif"));
    assert!(ds.internal_handle("OTHER").is_none());
}

#[test]
fn test_bands_report_their_facade() {
    let (_engine, pool) = setup_test_pool(4);
    let ds = declared(&pool, "a.tif");
    let band = ds.band(2).unwrap();

    let owner = band.dataset().unwrap();
    assert_eq!(owner.description(), "a.tif");
    assert_eq!(owner.band_count(), 2);
    assert_eq!(band.band_number(), 2);
}

#[test]
fn test_direct_proxy_wraps_open_dataset() {
    let dataset: Arc<dyn Dataset> =
        MemDataset::instantiate("direct", &template(), Access::ReadOnly);
    let proxy = ProxyDataset::wrap(dataset.clone());

    assert_eq!(proxy.raster_size(), (8, 8));
    assert_eq!(proxy.band_count(), 2);
    assert_eq!(proxy.description(), "direct");
    assert!(proxy.band(3).is_none());

    let band = proxy.band(1).unwrap();
    assert!(Arc::ptr_eq(&band, &proxy.band(1).unwrap()));
    assert_eq!(read_band(&*band, DataType::Byte)[10], 10.0);
    assert_eq!(band.overview_count(), 1);
    assert_eq!(band.overview(0).unwrap().size(), (4, 4));
    assert_eq!(band.dataset().unwrap().description(), "direct");
    assert_eq!(proxy.metadata_item("FOO", "").as_deref(), Some("1"));
}

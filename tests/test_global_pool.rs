// The process-wide pool is shared by every test in a binary, so this file
// holds a single test walking through its whole lifecycle.

use std::sync::{Arc, Mutex};
use std::thread;

use proxypool::diag;
use proxypool::error::ErrorKind;
use proxypool::mem::{MemEngine, MemTemplate};
use proxypool::pool::{self, PoolKey};
use proxypool::raster::RasterEngine;
use proxypool::{DataType, Dataset, ProxyPoolDataset, Window};

// What the open hook observed while "outer.tif" was being opened
#[derive(Debug, Default)]
struct Observed {
    nested: bool,
    holds_pool: Option<bool>,
    responsible: Option<thread::ThreadId>,
}

fn setup_test_engine() -> Arc<MemEngine> {
    let engine = Arc::new(MemEngine::new());
    for path in ["outer.tif", "inner.tif", "other.tif"] {
        engine.register(path, MemTemplate::new(4, 4).with_band(DataType::Byte, (4, 4), 0.0));
    }
    engine
}

fn facade(engine: &Arc<MemEngine>, path: &str) -> Arc<ProxyPoolDataset> {
    let engine: Arc<dyn RasterEngine> = engine.clone();
    ProxyPoolDataset::builder(pool::global(engine), path, 4, 4)
        .add_band(DataType::Byte, (4, 4))
        .build()
}

fn read_first(ds: &ProxyPoolDataset) -> Option<u8> {
    let mut buf = [0u8; 1];
    let band = ds.band(1)?;
    band.read(Window::new(1, 0, 1, 1), &mut buf, (1, 1), DataType::Byte)
        .ok()?;
    Some(buf[0])
}

#[test]
fn test_global_pool_lifecycle() {
    let engine = setup_test_engine();
    let main_thread = thread::current().id();
    assert!(pool::global_if_alive().is_none());
    assert!(!pool::in_nested_open());

    // A façade created while the pool opens a resource must not keep it alive
    let observed = Arc::new(Mutex::new(Observed::default()));
    let weak_engine = Arc::downgrade(&engine);
    let slot = observed.clone();
    engine.set_open_hook(
        "outer.tif",
        Arc::new(move |_: &str| {
            let mut seen = slot.lock().unwrap();
            seen.nested = pool::in_nested_open();
            seen.responsible = Some(pool::responsible_thread());
            if let Some(engine) = weak_engine.upgrade() {
                let inner = facade(&engine, "inner.tif");
                seen.holds_pool = Some(inner.holds_pool());
            }
        }),
    );

    let outer = facade(&engine, "outer.tif");
    assert!(outer.holds_pool());
    assert_eq!(outer.creating_thread(), main_thread);
    let first_pool = pool::global_if_alive().unwrap();

    // Opened from a worker, attributed to the creating thread
    let worker = {
        let outer = outer.clone();
        thread::spawn(move || read_first(&outer))
    };
    assert_eq!(worker.join().unwrap(), Some(1));
    {
        let seen = observed.lock().unwrap();
        assert!(seen.nested);
        assert_eq!(seen.holds_pool, Some(false));
        assert_eq!(seen.responsible, Some(main_thread));
    }
    assert_eq!(engine.last_open_thread("outer.tif"), Some(main_thread));
    assert!(first_pool.contains(&PoolKey::new("outer.tif").with_thread(main_thread)));
    assert!(!pool::in_nested_open());

    // The last strong reference going away ends the pool
    drop(first_pool);
    drop(outer);
    assert!(pool::global_if_alive().is_none());
    assert_eq!(engine.close_count(), engine.open_count());

    // A strong façade from before the pool is pinned
    let early = facade(&engine, "other.tif");
    assert!(early.holds_pool());
    pool::prevent_destroy();
    let late = facade(&engine, "other.tif");
    assert!(!late.holds_pool());
    assert_eq!(read_first(&late), Some(1));
    drop(early);
    assert!(pool::global_if_alive().is_some());
    let pinned = pool::global_if_alive().unwrap();

    // Forced teardown leaves façades failing with sentinels
    pool::force_destroy();
    assert!(pinned.is_destroyed());
    diag::clear_last_error();
    assert_eq!(read_first(&late), None);
    assert_eq!(diag::last_error().unwrap().kind, ErrorKind::ResolutionFailed);
    assert!(late.metadata("").is_none());
    assert_eq!(engine.close_count(), engine.open_count());

    // The next reference starts a fresh pool
    let fresh = facade(&engine, "other.tif");
    assert!(fresh.holds_pool());
    let current = pool::global_if_alive().unwrap();
    assert!(!Arc::ptr_eq(&current, &pinned));
    assert_eq!(read_first(&fresh), Some(1));
}

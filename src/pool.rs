//! Bounded pool of opened underlying resources.
//!
//! Entries are keyed by [`PoolKey`] (path, open parameters and owning
//! thread) and kept in most-recently-used order. An entry whose reference
//! count is zero may be recycled to open a different key once the pool is
//! full; a referenced entry is never closed.
//!
//! The process-wide pool lives only while strong [`PoolRef`]s exist.
//! Façades constructed while an underlying open is in progress on the same
//! thread only get a weak reference, so a pooled handle that owns proxies
//! does not keep its own pool alive.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use lazy_static::lazy_static;
use log::{debug, warn};
use lru::LruCache;

use crate::config::PoolConfig;
use crate::constants::{OpenFlags, POOL_OPEN_FLAGS};
use crate::diag::{self, Severity};
use crate::error::{Error, Result};
use crate::raster::{Dataset, OpenRequest, RasterEngine};
use crate::types::Access;

thread_local! {
    /// Depth of underlying opens in progress on this thread
    static NESTED_OPENS: Cell<usize> = const { Cell::new(0) };
    /// Thread shared opens are attributed to
    static RESPONSIBLE: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Thread the current work is attributed to
///
/// While the pool opens or closes a resource on behalf of a façade created
/// by another thread, this returns that thread. Engines use it to
/// attribute their own shared opens.
pub fn responsible_thread() -> ThreadId {
    RESPONSIBLE.with(Cell::get).unwrap_or_else(|| thread::current().id())
}

/// Whether an underlying open is in progress on this thread
pub fn in_nested_open() -> bool {
    NESTED_OPENS.with(Cell::get) > 0
}

/// Attributes work on this thread to another thread until dropped
#[derive(Debug)]
pub struct ResponsibleThreadGuard {
    previous: Option<ThreadId>,
}

impl ResponsibleThreadGuard {
    pub fn new(thread: ThreadId) -> Self {
        let previous = RESPONSIBLE.with(|r| r.replace(Some(thread)));
        ResponsibleThreadGuard { previous }
    }
}

impl Drop for ResponsibleThreadGuard {
    fn drop(&mut self) {
        RESPONSIBLE.with(|r| r.set(self.previous));
    }
}

// Marks an underlying open in progress; façades built meanwhile hold weak
// pool references
struct NestedOpenGuard;

impl NestedOpenGuard {
    fn new() -> Self {
        NESTED_OPENS.with(|n| n.set(n.get() + 1));
        NestedOpenGuard
    }
}

impl Drop for NestedOpenGuard {
    fn drop(&mut self) {
        NESTED_OPENS.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Identity of a pooled entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub path: String,
    pub options: Vec<(String, String)>,
    pub access: Access,
    /// Tag isolating the entries of one composite resource
    pub owner: Option<String>,
    /// Thread the entry is attributed to
    pub thread: ThreadId,
}

impl PoolKey {
    /// Read-only key for `path`, attributed to the responsible thread
    pub fn new(path: &str) -> Self {
        PoolKey {
            path: path.to_string(),
            options: Vec::new(),
            access: Access::ReadOnly,
            owner: None,
            thread: responsible_thread(),
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_options(mut self, options: Vec<(String, String)>) -> Self {
        self.options = options;
        self
    }

    pub fn with_owner(mut self, owner: Option<&str>) -> Self {
        self.owner = owner.map(str::to_string);
        self
    }

    pub fn with_thread(mut self, thread: ThreadId) -> Self {
        self.thread = thread;
        self
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquires served by an open entry
    pub hits: u64,
    /// Acquires that had to open the resource
    pub misses: u64,
    /// Entries recycled to make room
    pub evictions: u64,
    /// Underlying opens that failed
    pub opens_failed: u64,
}

enum EntryState {
    /// Being opened by the given thread, outside the pool lock
    Opening(ThreadId),
    Ready(Arc<dyn Dataset>),
}

struct CacheEntry {
    /// Outstanding guards on this entry
    refcount: usize,
    state: EntryState,
}

struct PoolState {
    entries: LruCache<PoolKey, CacheEntry>,
    capacity: usize,
    destroyed: bool,
    stats: PoolStats,
}

enum Lookup {
    Hit(Arc<dyn Dataset>),
    Wait,
    Recursive,
    Miss,
}

/// Bounded LRU pool of opened resources
pub struct ResourcePool {
    engine: Arc<dyn RasterEngine>,
    state: Mutex<PoolState>,
    /// Signalled whenever an `Opening` entry settles
    settled: Condvar,
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ResourcePool")
            .field("capacity", &state.capacity)
            .field("size", &state.entries.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl ResourcePool {
    /// Create a standalone pool
    pub fn new(config: PoolConfig, engine: Arc<dyn RasterEngine>) -> Arc<Self> {
        debug!("creating resource pool of {} entries", config.max_size);
        Arc::new(ResourcePool {
            engine,
            state: Mutex::new(PoolState {
                entries: LruCache::unbounded(),
                capacity: config.max_size,
                destroyed: false,
                stats: PoolStats::default(),
            }),
            settled: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn engine(&self) -> &Arc<dyn RasterEngine> {
        &self.engine
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Number of tracked entries, including ones being opened
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    /// Reference count of `key`, without touching recency
    pub fn refcount_of(&self, key: &PoolKey) -> Option<usize> {
        self.lock().entries.peek(key).map(|e| e.refcount)
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// Tracked keys, most recently used first
    pub fn keys(&self) -> Vec<PoolKey> {
        self.lock().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Borrow the resource behind `key`, opening it on a miss
    ///
    /// The returned guard keeps the entry referenced until dropped.
    pub fn acquire(self: &Arc<Self>, key: &PoolKey, shared: bool) -> Result<PoolGuard> {
        let executing = thread::current().id();
        let mut state = self.lock();

        let displaced = loop {
            if state.destroyed {
                return Err(diag::fail(Error::PoolDestroyed));
            }

            let lookup = {
                let st = &mut *state;
                match st.entries.get_mut(key) {
                    Some(entry) => match &entry.state {
                        EntryState::Ready(ds) => {
                            entry.refcount += 1;
                            st.stats.hits += 1;
                            Lookup::Hit(ds.clone())
                        }
                        EntryState::Opening(opener) if *opener == executing => Lookup::Recursive,
                        EntryState::Opening(_) => Lookup::Wait,
                    },
                    None => Lookup::Miss,
                }
            };

            match lookup {
                Lookup::Hit(dataset) => {
                    return Ok(PoolGuard {
                        pool: Arc::clone(self),
                        key: key.clone(),
                        dataset,
                    });
                }
                Lookup::Recursive => {
                    return Err(diag::fail(Error::RecursiveOpen {
                        path: key.path.clone(),
                    }));
                }
                Lookup::Wait => {
                    state = self.settled.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                Lookup::Miss => break Self::make_room(&mut state)?,
            }
        };

        state.entries.put(
            key.clone(),
            CacheEntry {
                refcount: 1,
                state: EntryState::Opening(executing),
            },
        );
        state.stats.misses += 1;
        drop(state);

        if let Some((old_key, dataset)) = displaced {
            self.close_entry(&old_key, dataset);
        }

        let opened = self.open_underlying(key, shared);
        self.publish(key, opened)
    }

    // Recycle the least recently used unreferenced entry when full
    fn make_room(state: &mut PoolState) -> Result<Option<(PoolKey, Arc<dyn Dataset>)>> {
        if state.entries.len() < state.capacity {
            return Ok(None);
        }
        let victim = state
            .entries
            .iter()
            .rev()
            .find(|(_, e)| e.refcount == 0 && matches!(e.state, EntryState::Ready(_)))
            .map(|(k, _)| k.clone());
        let Some(victim) = victim else {
            return Err(diag::fail(Error::PoolExhausted {
                capacity: state.capacity,
            }));
        };
        state.stats.evictions += 1;
        debug!("evicting {} to make room", victim.path);
        Ok(state.entries.pop(&victim).and_then(|entry| match entry.state {
            EntryState::Ready(ds) => Some((victim, ds)),
            EntryState::Opening(_) => None,
        }))
    }

    fn open_underlying(&self, key: &PoolKey, shared: bool) -> Result<Arc<dyn Dataset>> {
        let mut flags = POOL_OPEN_FLAGS;
        if key.access == Access::Update {
            flags |= OpenFlags::UPDATE;
        }
        if shared {
            flags |= OpenFlags::SHARED;
        }
        let request = OpenRequest {
            path: &key.path,
            access: key.access,
            flags,
            options: &key.options,
        };

        let _responsible = ResponsibleThreadGuard::new(key.thread);
        let _nested = NestedOpenGuard::new();
        self.engine.open(&request)
    }

    // Install the outcome of an open performed outside the lock
    fn publish(
        self: &Arc<Self>,
        key: &PoolKey,
        opened: Result<Arc<dyn Dataset>>,
    ) -> Result<PoolGuard> {
        let mut state = self.lock();
        let outcome = match opened {
            Ok(dataset) => match state.entries.peek_mut(key) {
                Some(entry) => {
                    entry.state = EntryState::Ready(dataset.clone());
                    Ok(dataset)
                }
                // The pool was torn down while we were opening
                None => Err(Some(dataset)),
            },
            Err(err) => {
                state.entries.pop(key);
                state.stats.opens_failed += 1;
                self.settled.notify_all();
                drop(state);
                let err = if matches!(err, Error::ResolutionFailed { .. }) {
                    err
                } else {
                    Error::resolution(&key.path, err)
                };
                return Err(diag::fail(err));
            }
        };
        self.settled.notify_all();
        drop(state);

        match outcome {
            Ok(dataset) => Ok(PoolGuard {
                pool: Arc::clone(self),
                key: key.clone(),
                dataset,
            }),
            Err(orphan) => {
                if let Some(dataset) = orphan {
                    self.close_entry(key, dataset);
                }
                Err(diag::fail(Error::PoolDestroyed))
            }
        }
    }

    fn close_entry(&self, key: &PoolKey, dataset: Arc<dyn Dataset>) {
        let _responsible = ResponsibleThreadGuard::new(key.thread);
        if let Err(err) = self.engine.close(dataset) {
            diag::report(Severity::Warning, &err);
        }
    }

    /// Give back a borrowed entry
    pub fn release(&self, guard: PoolGuard) {
        drop(guard);
    }

    fn release_key(&self, key: &PoolKey) {
        let mut state = self.lock();
        match state.entries.peek_mut(key) {
            Some(entry) if entry.refcount > 0 => entry.refcount -= 1,
            Some(_) => {
                debug_assert!(false, "release of unreferenced entry {}", key.path);
                warn!("release of unreferenced entry {}", key.path);
            }
            None => {
                if !state.destroyed {
                    warn!("release of untracked entry {}", key.path);
                }
            }
        }
    }

    /// Close every entry regardless of outstanding references
    ///
    /// Later acquires fail with [`Error::PoolDestroyed`].
    pub fn destroy(&self) {
        let drained = {
            let mut state = self.lock();
            state.destroyed = true;
            let mut drained = Vec::with_capacity(state.entries.len());
            while let Some((key, entry)) = state.entries.pop_lru() {
                if entry.refcount > 0 {
                    warn!("closing {} with {} outstanding references", key.path, entry.refcount);
                }
                if let EntryState::Ready(ds) = entry.state {
                    drained.push((key, ds));
                }
            }
            self.settled.notify_all();
            drained
        };
        for (key, dataset) in drained {
            self.close_entry(&key, dataset);
        }
    }
}

impl Drop for ResourcePool {
    fn drop(&mut self) {
        let destroyed = self.lock().destroyed;
        if !destroyed {
            debug!("destroying resource pool");
            self.destroy();
        }
    }
}

/// A borrowed pool entry, released on drop
pub struct PoolGuard {
    pool: Arc<ResourcePool>,
    key: PoolKey,
    dataset: Arc<dyn Dataset>,
}

impl PoolGuard {
    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }
}

impl Deref for PoolGuard {
    type Target = dyn Dataset;

    fn deref(&self) -> &Self::Target {
        &*self.dataset
    }
}

impl fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PoolGuard").field("key", &self.key).finish()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        self.pool.release_key(&self.key);
    }
}

/// Reference from a façade to its pool
#[derive(Debug, Clone)]
pub enum PoolRef {
    /// Keeps the pool alive
    Strong(Arc<ResourcePool>),
    /// Observes a pool kept alive elsewhere
    Weak(Weak<ResourcePool>),
}

impl PoolRef {
    pub fn get(&self) -> Option<Arc<ResourcePool>> {
        match self {
            PoolRef::Strong(pool) => Some(pool.clone()),
            PoolRef::Weak(pool) => pool.upgrade(),
        }
    }

    pub fn is_strong(&self) -> bool {
        matches!(self, PoolRef::Strong(_))
    }
}

impl From<Arc<ResourcePool>> for PoolRef {
    fn from(pool: Arc<ResourcePool>) -> Self {
        PoolRef::Strong(pool)
    }
}

struct GlobalPool {
    pool: Weak<ResourcePool>,
    /// Extra strong reference held for the shutdown sequence
    pinned: Option<Arc<ResourcePool>>,
    prevent_destroy: usize,
}

lazy_static! {
    static ref GLOBAL: Mutex<GlobalPool> = Mutex::new(GlobalPool {
        pool: Weak::new(),
        pinned: None,
        prevent_destroy: 0,
    });
}

fn lock_global() -> MutexGuard<'static, GlobalPool> {
    GLOBAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reference the process-wide pool, creating it on first use
///
/// The pool is created with `engine` and the configured capacity; later
/// callers share it. Inside an underlying open, or once destruction has
/// been prevented, the reference is weak.
pub fn global(engine: Arc<dyn RasterEngine>) -> PoolRef {
    let nested = in_nested_open();
    let (pool, weak_only) = {
        let mut g = lock_global();
        match g.pool.upgrade() {
            Some(pool) => {
                let weak_only = nested || g.pinned.is_some();
                (pool, weak_only)
            }
            None => {
                let pool = ResourcePool::new(PoolConfig::from_config(), engine);
                g.pool = Arc::downgrade(&pool);
                if g.prevent_destroy > 0 {
                    g.pinned = Some(pool.clone());
                }
                let weak_only = g.pinned.is_some();
                (pool, weak_only)
            }
        }
    };
    if weak_only {
        PoolRef::Weak(Arc::downgrade(&pool))
    } else {
        PoolRef::Strong(pool)
    }
}

/// The process-wide pool, if alive
pub fn global_if_alive() -> Option<Arc<ResourcePool>> {
    lock_global().pool.upgrade()
}

/// Keep the process-wide pool alive until [`force_destroy`]
pub fn prevent_destroy() {
    let mut g = lock_global();
    g.prevent_destroy += 1;
    if g.pinned.is_none() {
        g.pinned = g.pool.upgrade();
    }
}

/// Tear the process-wide pool down regardless of outstanding references
pub fn force_destroy() {
    let pool = {
        let mut g = lock_global();
        g.prevent_destroy = 0;
        let pinned = g.pinned.take();
        let pool = pinned.or_else(|| g.pool.upgrade());
        g.pool = Weak::new();
        pool
    };
    if let Some(pool) = pool {
        debug!("force-destroying resource pool");
        pool.destroy();
    }
}

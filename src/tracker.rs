//! Per-type memory accounting for [`Handle`](crate::Handle)s.
//!
//! Every element type `T` that a handle has ever been constructed (or converted) for gets one
//! [`TypeTracker`], which records how many bytes are currently attributed to live objects of that
//! type and the largest that figure has ever been. Trackers are created lazily in a process-wide
//! registry and are never torn down.
//!
//! The counters are purely diagnostic. Building without the `tracking` feature turns
//! [`TypeTracker::register`], [`TypeTracker::deregister`] and [`TypeTracker::transfer`] into empty
//! functions and makes every handle attribute zero bytes.
//!
//! ```
//! use counted::{Handle, tracker::TypeTracker};
//!
//! struct Grid([f64; 16]);
//!
//! let grid = Handle::new(Grid([0.0; 16]));
//! let tracker = TypeTracker::of::<Grid>();
//!
//! assert_eq!(tracker.current_bytes(), grid.tracked_bytes());
//! drop(grid);
//! assert_eq!(tracker.current_bytes(), 0);
//! assert_eq!(tracker.peak_bytes(), Handle::new(Grid([0.0; 16])).tracked_bytes());
//! ```

use std::{
    any::{TypeId, type_name},
    fmt, hash,
    sync::{
        LazyLock,
        atomic::{AtomicUsize, Ordering::*},
    },
};

use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

// === TypeKey === //

/// A stable identity for a (possibly unsized) type, used to key [`TypeTracker`]s.
///
/// Equality and hashing only consider the [`TypeId`]; the name is carried along for diagnostics
/// and its exact format is whatever [`type_name`] produces.
#[derive(Copy, Clone)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(self) -> TypeId {
        self.id
    }

    pub fn name(self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Eq for TypeKey {}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl hash::Hash for TypeKey {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// === TypeTracker === //

/// Current and peak bytes attributed to live objects of one type.
///
/// Obtain the tracker for a type with [`TypeTracker::of`]. All counters are atomics so trackers
/// can be updated from any number of threads.
pub struct TypeTracker {
    key: TypeKey,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl fmt::Debug for TypeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeTracker")
            .field("key", &self.key)
            .field("current_bytes", &self.current_bytes())
            .field("peak_bytes", &self.peak_bytes())
            .finish()
    }
}

impl TypeTracker {
    const fn new(key: TypeKey) -> Self {
        Self {
            key,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Fetches the tracker for `T`, creating it on first use.
    pub fn of<T: ?Sized + 'static>() -> &'static Self {
        Self::for_key(TypeKey::of::<T>())
    }

    /// Fetches the tracker for the type identified by `key`, creating it on first use.
    pub fn for_key(key: TypeKey) -> &'static Self {
        if let Some(&tracker) = REGISTRY.read().get(&key.id) {
            return tracker;
        }

        // Another thread may have raced us between the two locks; `entry` settles it.
        *REGISTRY.write().entry(key.id).or_insert_with(|| {
            tracing::debug!(type_name = key.name, "created type tracker");

            &*Box::leak(Box::new(Self::new(key)))
        })
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.name
    }

    pub fn current_bytes(&self) -> usize {
        self.current.load(Relaxed)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Relaxed)
    }

    /// Attributes `bytes` more bytes to this type, raising the peak if needed.
    #[inline]
    pub fn register(&self, bytes: usize) {
        #[cfg(feature = "tracking")]
        {
            let now = self.current.fetch_add(bytes, Relaxed).wrapping_add(bytes);

            // A wrapped total means some `deregister` outran its `register`. Keep it out of the peak.
            if now <= isize::MAX as usize {
                self.peak.fetch_max(now, Relaxed);
            }
        }

        #[cfg(not(feature = "tracking"))]
        let _ = bytes;
    }

    /// Removes `bytes` bytes previously [`register`](TypeTracker::register)ed with this type.
    ///
    /// Counters wrap rather than panic if more bytes are removed than were added.
    #[inline]
    pub fn deregister(&self, bytes: usize) {
        #[cfg(feature = "tracking")]
        self.current.fetch_sub(bytes, Relaxed);

        #[cfg(not(feature = "tracking"))]
        let _ = bytes;
    }

    /// Moves the attribution of `bytes` bytes from this type to `to`.
    #[inline]
    pub fn transfer(&self, bytes: usize, to: &TypeTracker) {
        self.deregister(bytes);
        to.register(bytes);
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            key: self.key,
            current_bytes: self.current_bytes(),
            peak_bytes: self.peak_bytes(),
        }
    }
}

// === Registry === //

static REGISTRY: LazyLock<RwLock<HashMap<TypeId, &'static TypeTracker, FxBuildHasher>>> =
    LazyLock::new(|| RwLock::new(HashMap::with_hasher(FxBuildHasher)));

/// A point-in-time copy of one tracker's counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub key: TypeKey,
    pub current_bytes: usize,
    pub peak_bytes: usize,
}

/// Snapshots every tracker created so far, sorted by type name.
pub fn snapshot_all() -> Vec<TrackerSnapshot> {
    let mut snapshots = REGISTRY
        .read()
        .values()
        .map(|tracker| tracker.snapshot())
        .collect::<Vec<_>>();

    snapshots.sort_by(|a, b| a.key.name.cmp(b.key.name));
    snapshots
}

/// Sums the bytes currently attributed across every tracker.
pub fn total_bytes() -> usize {
    REGISTRY
        .read()
        .values()
        .map(|tracker| tracker.current_bytes())
        .sum()
}

// === MemoryReport === //

/// A table of tracker snapshots, printable with [`Display`](fmt::Display).
#[derive(Debug, Clone, Default)]
pub struct MemoryReport {
    entries: Vec<TrackerSnapshot>,
}

impl MemoryReport {
    /// Captures every tracker which has ever had bytes attributed to it.
    pub fn capture() -> Self {
        Self {
            entries: snapshot_all()
                .into_iter()
                .filter(|entry| entry.peak_bytes > 0)
                .collect(),
        }
    }

    pub fn entries(&self) -> &[TrackerSnapshot] {
        &self.entries
    }

    pub fn total_current_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.current_bytes).sum()
    }

    pub fn total_peak_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.peak_bytes).sum()
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>14} {:>14}  type", "current", "peak")?;

        for entry in &self.entries {
            writeln!(
                f,
                "{:>14} {:>14}  {}",
                entry.current_bytes, entry.peak_bytes, entry.key
            )?;
        }

        write!(
            f,
            "{:>14} {:>14}  (total)",
            self.total_current_bytes(),
            self.total_peak_bytes()
        )
    }
}

/// Logs one `info` line per type which still has bytes attributed to it.
pub fn log_report() {
    let report = MemoryReport::capture();

    for entry in report.entries() {
        if entry.current_bytes == 0 {
            continue;
        }

        tracing::info!(
            type_name = entry.key.name,
            current_bytes = entry.current_bytes,
            peak_bytes = entry.peak_bytes,
            "live handle memory"
        );
    }

    tracing::info!(
        current_bytes = report.total_current_bytes(),
        peak_bytes = report.total_peak_bytes(),
        "handle memory total"
    );
}

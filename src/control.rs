use std::{
    alloc::{self, Layout},
    mem,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering::*, fence},
};

#[cfg(feature = "tracking")]
use parking_lot::Mutex;

use crate::{HandleError, TypeKey, fatal};

#[cfg(feature = "tracking")]
use crate::TypeTracker;

/// Counts above this are treated as a runaway leak. Matches the limit `Arc` uses so that the
/// count can never wrap before we notice.
const MAX_REFS: usize = isize::MAX as usize;

pub(crate) const BLOCK_SIZE: usize = mem::size_of::<ControlBlock>();

// === ControlBlock === //

/// The state shared by every [`Handle`](crate::Handle) referencing one object.
///
/// The block owns the object. It remembers the object's concrete type so that whichever view
/// (`Handle<Concrete>`, `Handle<dyn Trait>`, ...) releases the last reference still drops the
/// right thing.
pub(crate) struct ControlBlock {
    /// The number of live handles, plus one for every outstanding `disown_deletion`.
    refs: AtomicUsize,

    /// Bytes attributed to this object in its current tracker. Zero without `tracking`.
    tracked_bytes: usize,

    /// The tracker `tracked_bytes` is currently attributed to. Held for the whole of a transfer so
    /// that concurrent conversions of one object move its bytes one at a time.
    #[cfg(feature = "tracking")]
    tracker: Mutex<&'static TypeTracker>,

    /// The concrete object, type-erased.
    object: NonNull<()>,

    object_type: TypeKey,

    /// Drops and frees `object` as a `Box` of its concrete type.
    drop_object: unsafe fn(NonNull<()>),
}

impl ControlBlock {
    /// Allocates a block with a reference count of one which takes ownership of `object`.
    pub(crate) fn allocate<T: 'static>(object: Box<T>) -> NonNull<Self> {
        let layout = Layout::new::<Self>();
        let object_type = TypeKey::of::<T>();

        // SAFETY: `ControlBlock` is not zero-sized.
        let Some(block) = NonNull::new(unsafe { alloc::alloc(layout) }.cast::<Self>()) else {
            fatal(HandleError::OutOfMemory {
                type_name: object_type.name(),
                bytes: layout.size(),
            });
        };

        let tracked_bytes = if cfg!(feature = "tracking") {
            mem::size_of::<T>() + BLOCK_SIZE
        } else {
            0
        };

        #[cfg(feature = "tracking")]
        let tracker = {
            let tracker = TypeTracker::of::<T>();
            tracker.register(tracked_bytes);
            Mutex::new(tracker)
        };

        // SAFETY: `block` was just allocated with the layout of `Self`.
        unsafe {
            block.write(Self {
                refs: AtomicUsize::new(1),
                tracked_bytes,
                #[cfg(feature = "tracking")]
                tracker,
                object: NonNull::from(Box::leak(object)).cast(),
                object_type,
                drop_object: drop_boxed::<T>,
            });
        }

        block
    }

    /// Tears down a block whose reference count has reached zero.
    ///
    /// The block's memory is returned even if the object's destructor panics.
    ///
    /// ## Safety
    ///
    /// The caller must have observed the final [`release`](ControlBlock::release) of `block` and
    /// must not touch it again.
    pub(crate) unsafe fn destroy(block: NonNull<Self>) {
        // SAFETY: provided by caller.
        let (object, drop_object) = {
            let this = unsafe { block.as_ref() };

            #[cfg(feature = "tracking")]
            this.tracker().deregister(this.tracked_bytes);

            (this.object, this.drop_object)
        };

        let _dealloc = scopeguard::guard(block, |block| {
            // SAFETY: every field of `Self` is trivially droppable so freeing is all that's left.
            unsafe { alloc::dealloc(block.as_ptr().cast(), Layout::new::<Self>()) }
        });

        // SAFETY: the object is dropped exactly once, here, with its concrete type.
        unsafe { drop_object(object) };
    }

    pub(crate) fn refs(&self) -> usize {
        self.refs.load(Acquire)
    }

    /// Adds one reference. Fatal if the count runs away.
    pub(crate) fn acquire(&self) {
        if self.refs.fetch_add(1, Relaxed) > MAX_REFS {
            fatal(HandleError::RefCountOverflow {
                type_name: self.object_type.name(),
            });
        }
    }

    /// Drops one reference, returning `true` for exactly one caller: the one which released the
    /// last reference and must now [`destroy`](ControlBlock::destroy) the block.
    #[must_use]
    pub(crate) fn release(&self) -> bool {
        if self.refs.fetch_sub(1, Release) != 1 {
            // (not the last reference)
            return false;
        }

        // Synchronize with every other release so that their uses of the object happen-before
        // its destruction.
        fence(Acquire);

        true
    }

    /// Drops one reference which is known not to be the last.
    pub(crate) fn release_bias(&self) {
        let prev = self.refs.fetch_sub(1, Release);
        debug_assert!(prev > 1, "released a bias the block never had");
    }

    pub(crate) fn object(&self) -> NonNull<()> {
        self.object
    }

    pub(crate) fn object_type(&self) -> TypeKey {
        self.object_type
    }

    pub(crate) fn tracked_bytes(&self) -> usize {
        self.tracked_bytes
    }

    /// The tracker currently holding this object's bytes.
    #[cfg(feature = "tracking")]
    pub(crate) fn tracker(&self) -> &'static TypeTracker {
        *self.tracker.lock()
    }

    /// Moves this object's bytes over to `U`'s tracker.
    pub(crate) fn retrack<U: ?Sized + 'static>(&self) {
        #[cfg(feature = "tracking")]
        {
            let to = TypeTracker::of::<U>();
            let mut current = self.tracker.lock();

            if !std::ptr::eq(*current, to) {
                current.transfer(self.tracked_bytes, to);
                *current = to;
            }
        }
    }
}

unsafe fn drop_boxed<T>(object: NonNull<()>) {
    // SAFETY: `object` was produced by `Box::leak` on a `Box<T>` in `ControlBlock::allocate`.
    drop(unsafe { Box::from_raw(object.cast::<T>().as_ptr()) });
}

use std::{
    any::type_name,
    fmt, hash,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};

use derive_where::derive_where;

use crate::{HandleError, TypeKey, control::ControlBlock, fatal};

// === Shared === //

/// The two pointers a non-null [`Handle`] carries. Keeping them together in one `Option` means a
/// handle can never have an object without a control block or vice versa.
#[derive_where(Copy, Clone)]
pub(crate) struct Shared<T: ?Sized> {
    pub(crate) object: NonNull<T>,
    pub(crate) control: NonNull<ControlBlock>,
}

impl<T: ?Sized> Shared<T> {
    fn block(&self) -> &ControlBlock {
        // SAFETY: a `Shared` stored in a live handle keeps its control block alive.
        unsafe { self.control.as_ref() }
    }
}

// === Handle === //

/// A nullable, intrusively reference-counted, thread-safe handle to a heap object.
///
/// Cloning a handle shares the object and bumps a count held in a control block next to it. When
/// the last handle goes away the object is dropped and the block is freed, exactly once, on
/// whichever thread released last.
///
/// Dereferencing a null handle is a fatal error (see [`fatal`](crate::fatal)). Use
/// [`Handle::get`] for a non-panicking view.
///
/// Mutation through a shared handle goes through interior mutability in `T`, exactly as it would
/// through any other shared reference. [`Handle::get_mut`] and [`Handle::make_mut`] give exclusive
/// access to unshared objects.
pub struct Handle<T: ?Sized> {
    shared: Option<Shared<T>>,
    _owns: PhantomData<T>,
}

// SAFETY: the same reasoning as `Arc<T>`. Handles on several threads may hand out `&T`s
// concurrently (`Sync`) and whichever thread releases last drops the `T` (`Send`).
unsafe impl<T: ?Sized + Send + Sync> Send for Handle<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Handle<T> {}

impl<T: 'static> Handle<T> {
    /// Moves `value` to the heap and returns the only handle to it.
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    /// Adopts an already-boxed object. Its memory is now owned by the handle's control block.
    pub fn from_box(object: Box<T>) -> Self {
        let control = ControlBlock::allocate(object);

        // SAFETY: we just created the block.
        let object = unsafe { control.as_ref() }.object().cast::<T>();

        Self::from_shared(Some(Shared { object, control }))
    }
}

impl<T: ?Sized> Handle<T> {
    /// A handle which references nothing.
    pub const fn null() -> Self {
        Self {
            shared: None,
            _owns: PhantomData,
        }
    }

    /// Wraps pointers whose reference has already been counted.
    pub(crate) const fn from_shared(shared: Option<Shared<T>>) -> Self {
        Self {
            shared,
            _owns: PhantomData,
        }
    }

    /// Gives up ownership of the counted reference without releasing it.
    pub(crate) fn into_shared(self) -> Option<Shared<T>> {
        let shared = self.shared;
        mem::forget(self);
        shared
    }

    pub(crate) fn shared(&self) -> Option<Shared<T>> {
        self.shared
    }

    pub fn is_null(&self) -> bool {
        self.shared.is_none()
    }

    /// Returns `true` if some other handle shares this object. Null handles are never shared.
    pub fn is_non_unique(&self) -> bool {
        self.ref_count() > 1
    }

    /// The number of handles sharing this object, plus any [`disown_deletion`] biases. Zero for a
    /// null handle.
    ///
    /// [`disown_deletion`]: Handle::disown_deletion
    pub fn ref_count(&self) -> usize {
        self.shared.map_or(0, |shared| shared.block().refs())
    }

    /// Borrows the object, or returns `None` for a null handle. Ownership is unaffected.
    pub fn get(&self) -> Option<&T> {
        // SAFETY: our counted reference keeps the object alive for as long as `self` is borrowed.
        self.shared.map(|shared| unsafe { shared.object.as_ref() })
    }

    /// Fetches the raw object pointer, or `None` for a null handle. Ownership is unaffected.
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.shared.map(|shared| shared.object)
    }

    /// Borrows the object mutably if this is the only handle to it.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.is_non_unique() {
            return None;
        }

        // SAFETY: we hold the only reference and `&mut self` stops it from being cloned.
        self.shared.map(|shared| unsafe { &mut *shared.object.as_ptr() })
    }

    /// Returns `true` if both handles reference the same object, or are both null.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.control_ptr() == b.control_ptr()
    }

    /// Makes `self` share `rhs`'s object, releasing whatever `self` referenced before.
    ///
    /// Does nothing if both handles already reference the same object.
    pub fn assign(&mut self, rhs: &Self) {
        if Self::ptr_eq(self, rhs) {
            return;
        }

        // Acquire before releasing in case our old object is what keeps `rhs` alive.
        if let Some(shared) = rhs.shared {
            shared.block().acquire();
        }

        self.release();
        self.shared = rhs.shared;
    }

    /// Releases this handle's reference and leaves it null.
    pub fn reset(&mut self) {
        self.release();
    }

    /// Moves the reference out of `self`, leaving it null.
    pub fn take(&mut self) -> Self {
        Self::from_shared(self.shared.take())
    }

    /// Exchanges the objects referenced by two handles. No reference count changes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.shared, &mut other.shared);
    }

    /// Permanently stops the object from being destroyed by ordinary releases.
    ///
    /// This adds one reference which nothing will ever release, so the object and its control
    /// block are leaked for the rest of the process. It exists for functions which hand out a
    /// handle to something they may or may not own: disowning makes the "not owned" case safe to
    /// drop. [`Handle::undo_disown`] reverses it.
    ///
    /// Fatal if the handle is null, unlike [`Handle::undo_disown`] which ignores null handles.
    #[track_caller]
    pub fn disown_deletion(&self) {
        let shared = self.shared_or_fatal();
        let block = shared.block();

        block.acquire();

        tracing::debug!(
            type_name = block.object_type().name(),
            ref_count = block.refs(),
            "disowned deletion of handle object"
        );
    }

    /// Removes one bias added by [`Handle::disown_deletion`]. Does nothing for a null handle, which
    /// can never carry a bias since disowning one is fatal.
    ///
    /// ## Safety
    ///
    /// The object must have an outstanding `disown_deletion` bias which has not yet been undone.
    /// Undoing a bias that was never added lets the object be destroyed while other handles still
    /// reference it.
    pub unsafe fn undo_disown(&self) {
        let Some(shared) = self.shared else {
            return;
        };
        let block = shared.block();

        block.release_bias();

        tracing::debug!(
            type_name = block.object_type().name(),
            ref_count = block.refs(),
            "undid handle deletion disowning"
        );
    }

    /// Bytes attributed to this object in the memory trackers. Zero for a null handle or
    /// without the `tracking` feature.
    pub fn tracked_bytes(&self) -> usize {
        self.shared.map_or(0, |shared| shared.block().tracked_bytes())
    }

    /// The type the object was constructed as, regardless of the type this handle views it as.
    pub fn concrete_type(&self) -> Option<TypeKey> {
        self.shared.map(|shared| shared.block().object_type())
    }

    #[track_caller]
    fn shared_or_fatal(&self) -> Shared<T> {
        match self.shared {
            Some(shared) => shared,
            None => fatal(HandleError::NullDereference {
                type_name: type_name::<T>(),
            }),
        }
    }

    fn control_ptr(&self) -> Option<NonNull<ControlBlock>> {
        self.shared.map(|shared| shared.control)
    }

    fn release(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        if shared.block().release() {
            // SAFETY: we released the last reference so nothing else can reach the block.
            unsafe { ControlBlock::destroy(shared.control) };
        }
    }
}

impl<T: Clone + 'static> Handle<T> {
    /// Borrows the object mutably, first replacing it with a private copy if it is shared.
    ///
    /// Fatal if the handle is null.
    #[track_caller]
    pub fn make_mut(&mut self) -> &mut T {
        if self.is_non_unique() {
            let copy = Self::new(T::clone(&**self));
            *self = copy;
        }

        let shared = self.shared_or_fatal();

        // SAFETY: the reference is now unique and `&mut self` stops it from being cloned.
        unsafe { &mut *shared.object.as_ptr() }
    }
}

impl<T: ?Sized> Drop for Handle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        if let Some(shared) = self.shared {
            shared.block().acquire();
        }

        Self::from_shared(self.shared)
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T: ?Sized> Deref for Handle<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &Self::Target {
        let shared = self.shared_or_fatal();

        // SAFETY: our counted reference keeps the object alive for as long as `self` is borrowed.
        unsafe { shared.object.as_ref() }
    }
}

impl<T: ?Sized> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: 'static> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> Eq for Handle<T> {}

impl<T: ?Sized> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: ?Sized> hash::Hash for Handle<T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.control_ptr().hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("Handle").field(&value).finish(),
            None => f.write_str("Handle(<null>)"),
        }
    }
}

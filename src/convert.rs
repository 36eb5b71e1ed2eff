use std::{
    any::{TypeId, type_name},
    mem,
    ptr::{self, NonNull},
};

use crate::{Handle, HandleError, fatal, handle::Shared};

// === Conversions === //

impl<T: ?Sized + Send + Sync> Handle<T> {
    /// Produces a handle viewing the same object as a `U`, typically a trait object `T`
    /// implements. See [`upcast!`](crate::upcast!) for the usual way to call this.
    ///
    /// `coerce` must return the object it was given, seen as a `U`. Views which move the address or
    /// change the size of the referent (field projections, say) are rejected as invalid
    /// conversions.
    ///
    /// The new handle shares this handle's reference count and the object's tracked bytes move to
    /// `U`'s tracker. A null handle converts to a null handle.
    ///
    /// Only thread-safe objects can be viewed through another type. The view may be `Send` even
    /// when `T` is not, and would let the last reference drop the object on a foreign thread:
    ///
    /// ```compile_fail
    /// use std::{fmt::Debug, rc::Rc};
    ///
    /// use counted::{Handle, upcast};
    ///
    /// let local = Handle::new(Rc::new(5));
    /// let view: Handle<dyn Debug> = upcast!(as dyn Debug, local);
    /// ```
    pub fn try_upcast<U: ?Sized + 'static>(
        &self,
        coerce: fn(&T) -> &U,
    ) -> Result<Handle<U>, HandleError> {
        let Some(shared) = self.shared() else {
            return Ok(Handle::null());
        };

        // SAFETY: our counted reference keeps the object alive.
        let source = unsafe { shared.object.as_ref() };
        let target = coerce(source);

        if !ptr::addr_eq(source, target) || mem::size_of_val(source) != mem::size_of_val(target) {
            return Err(HandleError::InvalidConversion {
                from: type_name::<T>(),
                to: type_name::<U>(),
            });
        }

        // SAFETY: `target` is the object we reference, viewed as a `U`.
        Ok(unsafe { Self::share_as(shared, NonNull::from(target)) })
    }

    /// Like [`Handle::try_upcast`] but reports rejected views as fatal errors.
    #[track_caller]
    pub fn upcast<U: ?Sized + 'static>(&self, coerce: fn(&T) -> &U) -> Handle<U> {
        match self.try_upcast(coerce) {
            Ok(handle) => handle,
            Err(err) => fatal(err),
        }
    }
}

impl<T: ?Sized> Handle<T> {
    /// Produces a handle viewing the same object as its concrete type `U`, or an error if the
    /// object was not constructed as a `U`.
    ///
    /// The new handle shares this handle's reference count and the object's tracked bytes move to
    /// `U`'s tracker. A null handle converts to a null handle.
    pub fn try_downcast<U: 'static>(&self) -> Result<Handle<U>, HandleError> {
        let Some(shared) = self.shared() else {
            return Ok(Handle::null());
        };

        let object = Self::checked_concrete::<U>(shared)?;

        // SAFETY: the object's concrete type is `U`.
        Ok(unsafe { Self::share_as(shared, object) })
    }

    /// Like [`Handle::try_downcast`] but reports type mismatches as fatal errors.
    #[track_caller]
    pub fn downcast<U: 'static>(&self) -> Handle<U> {
        match self.try_downcast::<U>() {
            Ok(handle) => handle,
            Err(err) => fatal(err),
        }
    }

    /// Converts this handle into a handle viewing the object as its concrete type `U`, giving
    /// `self` back on type mismatch.
    ///
    /// This takes ownership of `self` to avoid touching the reference count.
    pub fn into_downcast<U: 'static>(self) -> Result<Handle<U>, Self> {
        let Some(shared) = self.shared() else {
            return Ok(Handle::null());
        };

        let Ok(object) = Self::checked_concrete::<U>(shared) else {
            return Err(self);
        };

        let control = shared.control;
        _ = self.into_shared();

        // SAFETY: we hold the reference forgotten above.
        unsafe { control.as_ref() }.retrack::<U>();

        Ok(Handle::from_shared(Some(Shared { object, control })))
    }

    fn checked_concrete<U: 'static>(shared: Shared<T>) -> Result<NonNull<U>, HandleError> {
        // SAFETY: the caller's counted reference keeps the block alive.
        let block = unsafe { shared.control.as_ref() };
        let object_type = block.object_type();

        if object_type.id() != TypeId::of::<U>() {
            return Err(HandleError::InvalidConversion {
                from: object_type.name(),
                to: type_name::<U>(),
            });
        }

        Ok(block.object().cast::<U>())
    }

    /// Counts a new reference to the object behind `shared`, viewed through `object`.
    ///
    /// ## Safety
    ///
    /// `shared` must belong to a live handle and `object` must point to the object it references.
    unsafe fn share_as<U: ?Sized + 'static>(shared: Shared<T>, object: NonNull<U>) -> Handle<U> {
        // SAFETY: the caller's counted reference keeps the block alive.
        let block = unsafe { shared.control.as_ref() };

        block.acquire();
        block.retrack::<U>();

        Handle::from_shared(Some(Shared {
            object,
            control: shared.control,
        }))
    }
}

/// Upcasts a [`Handle`] into a handle of the type given after `as`, usually a trait object.
///
/// This is shorthand for calling [`Handle::upcast`] with an [unsizing coercion]. The source
/// handle is borrowed, not consumed.
///
/// ```
/// use std::fmt::Debug;
///
/// use counted::{Handle, upcast};
///
/// let value = Handle::new(5u32);
/// let view: Handle<dyn Debug + Send + Sync> = upcast!(as dyn Debug + Send + Sync, value);
///
/// assert_eq!(format!("{:?}", &*view), "5");
/// assert_eq!(value.ref_count(), 2);
/// ```
///
/// [unsizing coercion]: https://doc.rust-lang.org/reference/type-coercions.html#unsized-coercions
#[macro_export]
macro_rules! upcast {
    (as $ty:ty, $($value:tt)*) => {
        $crate::Handle::upcast::<$ty>(&($($value)*), |v| v)
    };
}

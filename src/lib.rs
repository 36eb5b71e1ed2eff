//! Intrusively reference-counted handles with per-type memory accounting.
//!
//! A [`Handle<T>`] owns a heap object jointly with every other handle cloned from it. The count
//! lives in a small control block allocated next to the object; the last handle to go away drops
//! the object and frees the block. Handles may be null, can be converted between a concrete type
//! and the trait objects it implements, and can be told never to delete their object at all.
//!
//! ```
//! use std::cell::Cell;
//!
//! use counted::Handle;
//!
//! let first = Handle::new(Cell::new(5));
//! assert_eq!(first.ref_count(), 1);
//! assert!(!first.is_non_unique());
//!
//! // Clones share the object. Like a pointer, modifying one modifies the other.
//! let second = first.clone();
//! first.set(7);
//! assert_eq!(Cell::get(&second), 7);
//! assert_eq!(second.ref_count(), 2);
//!
//! {
//!     let mut third = Handle::<Cell<i32>>::null();
//!     third.assign(&second);
//!     assert_eq!(first.ref_count(), 3);
//! }
//!
//! // `third` went away but the cell is still alive.
//! assert_eq!(first.ref_count(), 2);
//! assert_eq!(first, second);
//! ```
//!
//! # Null handles
//!
//! [`Handle::null`] (also the [`Default`]) references nothing. [`Handle::is_null`] and
//! [`Handle::get`] inspect it safely, but dereferencing one is a programming error: it goes to
//! [`fatal`], which logs the [`HandleError`] and panics.
//!
//! ```should_panic
//! use counted::Handle;
//!
//! let nothing = Handle::<u32>::null();
//! let _value: u32 = *nothing;  // attempted to dereference a null `Handle<u32>`
//! ```
//!
//! # Conversions
//!
//! Rust's equivalent of a base class is a trait object. [`upcast!`] views a handle's object as any
//! trait object it implements; [`Handle::downcast`] goes back to the concrete type, checking the
//! object's [`TypeId`](std::any::TypeId) at runtime. Both produce a handle sharing the source's
//! control block.
//!
//! ```
//! use counted::{Handle, upcast};
//!
//! pub trait Flux: Send + Sync {
//!     fn flux(&self) -> f64;
//! }
//!
//! pub struct Constant(f64);
//!
//! impl Flux for Constant {
//!     fn flux(&self) -> f64 {
//!         self.0
//!     }
//! }
//!
//! let concrete = Handle::new(Constant(2.5));
//! let abstracted: Handle<dyn Flux> = upcast!(as dyn Flux, concrete);
//!
//! assert_eq!(abstracted.flux(), 2.5);
//! assert_eq!(concrete.ref_count(), 2);
//!
//! let back = abstracted.downcast::<Constant>();
//! assert_eq!(back.0, 2.5);
//! assert!(abstracted.try_downcast::<u32>().is_err());
//! ```
//!
//! # Disowning deletion
//!
//! [`Handle::disown_deletion`] adds a reference that is never released, so the object survives
//! every ordinary handle to it. This is a deliberate leak for the rest of the process.
//!
//! # Memory accounting
//!
//! With the default `tracking` feature every element type gets a [`TypeTracker`] recording the
//! bytes currently attributed to its live objects and their peak. Conversions move an object's
//! bytes to the target type's tracker. See the [`tracker`] module.
//!
//! # Threads
//!
//! `Handle<T>` is `Send` and `Sync` whenever `T` is. Clones may be created and dropped on any
//! number of threads at once; the reference count is atomic and the object is destroyed exactly
//! once, by whichever thread releases last. A single handle value still needs `&mut` (or external
//! synchronization) to be reassigned, swapped, or reset.

mod control;

mod convert;

mod error;
pub use self::error::*;

mod handle;
pub use self::handle::*;

pub mod tracker;
pub use self::tracker::{TypeKey, TypeTracker};

use thiserror::Error;

// === HandleError === //

/// The ways a [`Handle`](crate::Handle) operation can fail.
///
/// None of these are expected at runtime: each one means a program invariant has already been
/// broken. The panicking operations (`Deref`, [`downcast`](crate::Handle::downcast), ...) hand them
/// straight to [`fatal`]; the `try_*` operations return them so the caller can decide.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("attempted to dereference a null `Handle<{type_name}>`")]
    NullDereference { type_name: &'static str },

    #[error("cannot view an object of type `{from}` as `{to}`")]
    InvalidConversion {
        from: &'static str,
        to: &'static str,
    },

    #[error("out of memory allocating a {bytes}-byte control block for `{type_name}`")]
    OutOfMemory {
        type_name: &'static str,
        bytes: usize,
    },

    #[error("reference count of a `{type_name}` overflowed")]
    RefCountOverflow { type_name: &'static str },
}

// === Fatal === //

/// Reports an unrecoverable handle error and never returns.
///
/// The error is logged at `error` level before unwinding. Binaries built with `panic = "abort"`
/// terminate here.
#[cold]
#[track_caller]
pub fn fatal(error: HandleError) -> ! {
    tracing::error!(%error, "fatal handle error");

    panic!("{error}");
}

//! Generic error handling shared by the workspace.

use std::fmt::Display;

/// An opaque error type for application seams.
///
/// Typed errors (`snafu` enums) are used wherever callers are expected to match on the failure. Everywhere else, errors
/// are erased into `GenericError` and carried along with context.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments, or any value implementing `Debug` and `Display` (such as
/// an existing error, whose source chain is preserved).
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::error::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::error::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::error::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod sealed {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Attaches context to a fallible result, converting it into a [`GenericError`].
///
/// Named distinctly from `anyhow::Context` so it can be imported next to `snafu::ResultExt` without the two extension
/// methods colliding.
pub trait ErrorContext<T>: sealed::Sealed {
    /// Wraps the error with `context`.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error with context produced by `f`, evaluated only on failure.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| GenericError::new(e).context(context))
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| GenericError::new(e).context(f()))
    }
}

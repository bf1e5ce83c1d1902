//! # Injectable Logger
//!
//! The dispatcher's `logger` config field is modeled as a capability set —
//! `{debug, info, warn, error}` — rather than a concrete logging crate
//! dependency, so a caller already standardized on `tracing`, a structured
//! JSON sink, or anything else can plug in without this crate picking a
//! side. When the caller supplies nothing, [`DispatcherConfig`] defaults to
//! [`LogCrateLogger`], which forwards to the ambient `log` facade — the same
//! facade `lib_common`'s `core` module and the `servers` binaries log
//! through — so diagnostics aren't silently dropped by default.
//!
//! [`DispatcherConfig`]: crate::dispatcher::DispatcherConfig

/// The logging capability the dispatcher core consumes.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Discards every message. Useful for tests and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Forwards every call to the `log` crate's module-level macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl Logger for LogCrateLogger {
    fn debug(&self, message: &str) {
        #[cfg(feature = "logging")]
        log::debug!("{message}");
        #[cfg(not(feature = "logging"))]
        let _ = message;
    }

    fn info(&self, message: &str) {
        #[cfg(feature = "logging")]
        log::info!("{message}");
        #[cfg(not(feature = "logging"))]
        let _ = message;
    }

    fn warn(&self, message: &str) {
        #[cfg(feature = "logging")]
        log::warn!("{message}");
        #[cfg(not(feature = "logging"))]
        let _ = message;
    }

    fn error(&self, message: &str) {
        #[cfg(feature = "logging")]
        log::error!("{message}");
        #[cfg(not(feature = "logging"))]
        let _ = message;
    }
}

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!
//! Request correlation:
//!     → x-request-id set by the HTTP layer, logged by the proxy handler
//! ```

pub mod logging;

pub use logging::init_logging;

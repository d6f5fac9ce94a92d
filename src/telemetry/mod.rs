//! Telemetry for kubekit.
//!
//! Structured logging through the `tracing` crate. Components log with
//! structured fields (`pipeline`, `task`, `play`, `block`, `host`); the binary
//! installs the subscriber once at startup with [`LoggingBuilder`].
//!
//! ```rust,ignore
//! use kubekit::telemetry::{LogFormat, LogLevel, LoggingBuilder};
//!
//! LoggingBuilder::new()
//!     .with_level(LogLevel::from_verbosity(2))
//!     .with_format(LogFormat::Json)
//!     .init()?;
//! ```

pub mod logging;

pub use logging::{LogFormat, LogLevel, LoggingBuilder};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use super::logging::{LogFormat, LogLevel, LoggingBuilder};
    pub use tracing::{debug, error, info, instrument, trace, warn, Instrument, Span};
}

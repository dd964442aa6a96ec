//! Pour client library
//!
//! Captures tagged log events, mirrors them to a per-run file on disk and
//! ships them, together with periodic hardware usage samples, to a remote
//! collector:
//!
//! - **tag**: Success/Warning/Error catalog
//! - **event**: Log event record and its wire format
//! - **buffer**: Events awaiting remote shipment
//! - **persist**: Per-run append-only log file
//! - **transport**: HTTP(S) client for the collector
//! - **failure**: Failure counting for the remote tasks
//! - **shipment**: Periodic log shipment with a failure ceiling
//! - **hardware**: Periodic memory/CPU reports
//! - **emitter**: Public capture API
//! - **pipeline**: The `Pour` handle wiring it all together
//! - **config**: Environment and file based configuration
//!
//! # Example
//!
//! ```no_run
//! use pour::config::Config;
//! use pour::tag::TAG_WARNING;
//! use pour::Pour;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let mut pour = Pour::bootstrap(config);
//!     pour.start();
//!
//!     let log = pour.emitter();
//!     pour::log_event!(log, "cache warmed in", 120, "ms");
//!     log.log_tagged(false, TAG_WARNING, "disk usage above 80%");
//!
//!     pour.shutdown().await;
//! }
//! ```

// Module declarations
pub mod buffer;
pub mod config;
pub mod emitter;
pub mod event;
pub mod failure;
pub mod hardware;
pub mod persist;
pub mod pipeline;
pub mod shipment;
pub mod tag;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferStats, EventBuffer};
pub use colored::Color;
pub use config::{Config, ConfigError};
pub use emitter::{Dispatcher, Emitter};
pub use event::{LogEvent, SourceLocation};
pub use failure::FailureCounter;
pub use hardware::{CpuInfo, HardwareSampler, HardwareUsage, MetricsSource, SystemMetrics};
pub use persist::{LocalPersister, PersistError, RunId};
pub use pipeline::Pour;
pub use shipment::{ShipmentLoop, TickOutcome};
pub use tag::{Tag, TAG_ERROR, TAG_SUCCESS, TAG_WARNING};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};

// ctlstream - Real-time Certificate Transparency log streaming

//! ctlstream continuously tails every usable public Certificate Transparency
//! log, parses appended entries into structured certificate records, and
//! broadcasts them to WebSocket subscribers. Subscribers may request
//! per-field projections and reservoir-sampled delivery.

pub mod cli;
pub mod error;
pub mod hub;
pub mod monitor;
pub mod parser;
pub mod server;

// Re-export commonly used types
pub use crate::cli::Args;
pub use crate::error::StreamError;
pub use crate::hub::Hub;
pub use crate::monitor::LogMonitor;

/// Result type for ctlstream operations
pub type Result<T> = std::result::Result<T, StreamError>;

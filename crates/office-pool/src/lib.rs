//! # office-pool
//!
//! Runs a fixed pool of external document-engine instances and dispatches
//! conversion tasks across them. The engine does the rendering; this
//! crate does the part that has to survive production: bounded admission
//! with explicit backpressure, exclusive instance checkout, retry of
//! instance-health failures on another instance, and background restart of
//! dead processes with exponential backoff.
//!
//! ```no_run
//! use office_pool::{Converter, ConversionRequest};
//!
//! # async fn run() -> Result<(), office_pool::ConvertError> {
//! let converter = Converter::builder().pool_size(2).build().await?;
//! let result = converter
//!     .convert(ConversionRequest::new("report.odt", "report.pdf"))
//!     .await?;
//! assert!(result.exported);
//! converter.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod converter;
mod dispatcher;
mod error;
mod events;
mod monitor;
mod pool;
mod restart;
mod task;

pub use config::PoolConfig;
pub use converter::{Converter, ConverterBuilder};
pub use error::ConvertError;
pub use events::PoolEvent;
pub use restart::{RestartBackoff, RestartConfig};
pub use task::{Conversion, ConversionRequest, SubmittedTask};

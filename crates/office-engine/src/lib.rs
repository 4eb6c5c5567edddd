//! # office-engine
//!
//! Supervision of external document-engine processes and the remote-control
//! sessions used to drive them: load a document, transform it in memory,
//! export it, close it. One process serves one document at a time; each
//! process is reached through exactly one [`EngineSession`], handed out by
//! an [`EngineBackend`].
//!
//! Pooling, dispatch, and retries live in `office-pool`; this crate only
//! knows how to run and talk to a single instance.

pub mod backend;
pub mod config;
pub mod document;
mod error;
pub mod format;
pub mod instance;
pub mod process;
pub mod protocol;
pub mod test_utils;

pub use backend::{EngineBackend, EngineSession, LocalBackend};
pub use config::OfficeConfig;
pub use document::{
    Capability, DocumentFamily, DocumentHandle, is_calc, is_draw, is_impress, is_text,
};
pub use error::OfficeError;
pub use format::{DocumentFormat, FormatRegistry};
pub use instance::{InstanceState, OfficeInstance};
pub use protocol::{ExportOptions, Request, Response, TransformAction};

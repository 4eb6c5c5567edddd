//! Backend seam between instance supervision and the engine boundary.
//!
//! [`EngineBackend`] launches one engine instance and hands back an
//! [`EngineSession`], the only way to reach that instance. A session is
//! scoped to exactly one process; dropping or quitting it invalidates
//! every document handle it produced. The local implementation speaks the
//! control protocol over loopback TCP; `test_utils` provides a scripted
//! in-memory implementation of the same traits.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace, warn};

use crate::config::OfficeConfig;
use crate::document::DocumentHandle;
use crate::error::OfficeError;
use crate::process::OfficeProcess;
use crate::protocol::{ExportOptions, Request, Response, TransformAction};

/// Launches engine instances.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    /// Bring up instance `ordinal` and return a live session to it.
    ///
    /// Implementations must not return until the instance answers a probe
    /// or the start timeout elapses.
    async fn launch(&self, ordinal: u32) -> Result<Box<dyn EngineSession>, OfficeError>;
}

/// A live control session to one engine instance.
///
/// At most one document is open per session at any time.
#[async_trait]
pub trait EngineSession: Send {
    /// Lightweight round-trip health probe.
    async fn probe(&mut self) -> Result<(), OfficeError>;

    /// Open a document and report its structural capabilities.
    async fn load(&mut self, source: &Path) -> Result<DocumentHandle, OfficeError>;

    /// Apply an in-memory transformation to the open document.
    async fn transform(
        &mut self,
        doc: &DocumentHandle,
        action: TransformAction,
    ) -> Result<(), OfficeError>;

    /// Export the open document.
    async fn export(
        &mut self,
        doc: &DocumentHandle,
        target: &Path,
        options: &ExportOptions,
    ) -> Result<(), OfficeError>;

    /// Close the open document without exporting.
    async fn close(&mut self, doc: &DocumentHandle) -> Result<(), OfficeError>;

    /// Shut the instance down: graceful quit, kill after the grace period.
    async fn quit(self: Box<Self>);

    /// Kill the instance immediately. Used for instances already deemed dead.
    async fn terminate(self: Box<Self>);
}

/// Backend that spawns real engine processes on the local machine.
pub struct LocalBackend {
    config: OfficeConfig,
}

impl LocalBackend {
    pub fn new(config: OfficeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineBackend for LocalBackend {
    async fn launch(&self, ordinal: u32) -> Result<Box<dyn EngineSession>, OfficeError> {
        let process = OfficeProcess::spawn(ordinal, &self.config).await?;
        let addr = format!("127.0.0.1:{}", self.config.port_for(ordinal));

        let deadline = Instant::now() + self.config.start_timeout();
        let stream = loop {
            match TcpStream::connect(&addr).await {
                Ok(stream) => break stream,
                Err(e) => {
                    if Instant::now() >= deadline {
                        process.kill().await;
                        return Err(OfficeError::Start {
                            ordinal,
                            reason: format!("not reachable on {addr} within start timeout: {e}"),
                        });
                    }
                    tokio::time::sleep(self.config.connect_retry()).await;
                }
            }
        };
        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        let mut session = LocalSession {
            ordinal,
            reader: BufReader::new(read_half),
            writer: write_half,
            process: Some(process),
            call_timeout: self.config.call_timeout(),
            stop_grace: self.config.stop_grace(),
        };

        // The socket can accept connections before the engine is ready to
        // serve requests; a successful probe is the real start signal.
        session.probe().await.map_err(|e| OfficeError::Start {
            ordinal,
            reason: format!("initial probe failed: {e}"),
        })?;

        debug!(ordinal, %addr, "engine instance reachable");
        Ok(Box::new(session))
    }
}

/// TCP control session to a locally spawned engine process.
struct LocalSession {
    ordinal: u32,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    process: Option<OfficeProcess>,
    call_timeout: Duration,
    stop_grace: Duration,
}

impl LocalSession {
    async fn call(&mut self, request: Request) -> Result<Response, OfficeError> {
        let operation = request.operation();
        let started = Instant::now();
        match tokio::time::timeout(self.call_timeout, self.round_trip(&request)).await {
            Ok(result) => result,
            Err(_) => Err(OfficeError::Timeout {
                operation,
                elapsed: started.elapsed(),
            }),
        }
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response, OfficeError> {
        let operation = request.operation();
        let mut frame = serde_json::to_vec(request)
            .map_err(|e| OfficeError::comm(operation, format!("encode: {e}")))?;
        frame.push(b'\n');

        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| OfficeError::comm(operation, e.to_string()))?;

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| OfficeError::comm(operation, e.to_string()))?;
        if n == 0 {
            return Err(OfficeError::comm(operation, "engine closed the connection"));
        }
        trace!(ordinal = self.ordinal, operation, "engine replied");

        serde_json::from_str(&line).map_err(|e| OfficeError::comm(operation, format!("decode: {e}")))
    }

    fn expect_ok(operation: &'static str, response: Response) -> Result<(), OfficeError> {
        match response {
            Response::Ok => Ok(()),
            Response::Rejected { reason } | Response::Failed { reason } => {
                // Rejections are re-mapped per call site; a bare Ok-call has
                // no content interpretation, so both collapse to comm errors.
                Err(OfficeError::comm(operation, reason))
            }
            other => Err(OfficeError::comm(
                operation,
                format!("unexpected response {other:?}"),
            )),
        }
    }
}

#[async_trait]
impl EngineSession for LocalSession {
    async fn probe(&mut self) -> Result<(), OfficeError> {
        Self::expect_ok("probe", self.call(Request::Probe).await?)
    }

    async fn load(&mut self, source: &Path) -> Result<DocumentHandle, OfficeError> {
        match self.call(Request::Load { source: source.to_path_buf() }).await? {
            Response::Loaded { doc, capabilities } => Ok(DocumentHandle::new(doc, capabilities)),
            Response::Rejected { reason } => Err(OfficeError::Load {
                path: source.to_path_buf(),
                reason,
            }),
            Response::Failed { reason } => Err(OfficeError::comm("load", reason)),
            other => Err(OfficeError::comm(
                "load",
                format!("unexpected response {other:?}"),
            )),
        }
    }

    async fn transform(
        &mut self,
        doc: &DocumentHandle,
        action: TransformAction,
    ) -> Result<(), OfficeError> {
        let described = action.describe();
        match self
            .call(Request::Transform { doc: doc.id(), action })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Rejected { reason } => Err(OfficeError::Transform {
                action: described,
                reason,
            }),
            Response::Failed { reason } => Err(OfficeError::comm("transform", reason)),
            other => Err(OfficeError::comm(
                "transform",
                format!("unexpected response {other:?}"),
            )),
        }
    }

    async fn export(
        &mut self,
        doc: &DocumentHandle,
        target: &Path,
        options: &ExportOptions,
    ) -> Result<(), OfficeError> {
        match self
            .call(Request::Export {
                doc: doc.id(),
                target: target.to_path_buf(),
                options: options.clone(),
            })
            .await?
        {
            Response::Ok => Ok(()),
            Response::Rejected { reason } => Err(OfficeError::Export {
                target: target.to_path_buf(),
                reason,
            }),
            Response::Failed { reason } => Err(OfficeError::comm("export", reason)),
            other => Err(OfficeError::comm(
                "export",
                format!("unexpected response {other:?}"),
            )),
        }
    }

    async fn close(&mut self, doc: &DocumentHandle) -> Result<(), OfficeError> {
        Self::expect_ok("close", self.call(Request::Close { doc: doc.id() }).await?)
    }

    async fn quit(mut self: Box<Self>) {
        if let Err(e) = self.call(Request::Quit).await {
            warn!(ordinal = self.ordinal, error = %e, "graceful quit failed");
        }
        if let Some(process) = self.process.take() {
            process.reap(self.stop_grace).await;
        }
    }

    async fn terminate(mut self: Box<Self>) {
        if let Some(process) = self.process.take() {
            process.kill().await;
        }
    }
}

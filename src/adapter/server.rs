//! DAP server - client connection and main read loop

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::backend::Backend;
use crate::common::config::Config;
use crate::common::logging::LoggingHandle;
use crate::common::{Error, Result};
use crate::dap::{codec, transport, Outbox, OutgoingMessage, RequestMessage};

use super::handler::{Adapter, Flow};

/// Serves one client over a pair of byte streams
pub struct DapServer {
    adapter: Arc<Adapter>,
    outgoing: mpsc::UnboundedReceiver<OutgoingMessage>,
}

impl DapServer {
    /// Create a server for `backend`. Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Self {
        Self::with_logging(backend, config, None)
    }

    /// Like [`DapServer::new`], letting sessions adjust the given logging setup
    pub fn with_logging(
        backend: Arc<dyn Backend>,
        config: Config,
        logging: Option<LoggingHandle>,
    ) -> Self {
        let (outbox, outgoing) = Outbox::channel();
        Self {
            adapter: Adapter::new(backend, config, outbox, logging),
            outgoing,
        }
    }

    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.adapter
    }

    /// Run until the client disconnects or closes the stream
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self { adapter, outgoing } = self;
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer_task = tokio::spawn(transport::write_loop(outgoing, writer, stop_rx));

        tracing::info!("Debug adapter ready");
        let mut reader = BufReader::new(reader);

        let result = loop {
            let json = match codec::read_message(&mut reader).await {
                Ok(json) => json,
                Err(Error::ClientDisconnected) => {
                    tracing::info!("Client closed the connection");
                    break Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error reading from client");
                    break Err(e);
                }
            };
            tracing::trace!(message = %json, "Received from client");

            let request: RequestMessage = match serde_json::from_str(&json) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed message");
                    continue;
                }
            };
            if request.message_type != "request" {
                tracing::debug!(kind = %request.message_type, "Ignoring non-request message");
                continue;
            }

            if adapter.dispatch(request).await == Flow::Shutdown {
                tracing::info!("Client disconnected");
                break Ok(());
            }
        };

        // Cleanup
        adapter.shutdown();
        let _ = stop_tx.send(());
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Writer stopped with an error"),
            Err(e) => tracing::warn!(error = %e, "Writer task failed"),
        }

        tracing::info!("Debug adapter shutdown complete");
        result
    }
}

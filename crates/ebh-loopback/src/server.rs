//! Accept loop shared by the loopback servers.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use embedded_broker_harness_core::ServerError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::{PROTOCOL_VERSION, Request, Response, codes};

/// Handles one decoded request.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, request: &Request) -> Response;
}

/// A running accept loop.
pub struct Acceptor {
    name: &'static str,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Acceptor {
    /// Bind `address` and start serving connections with `dispatcher`.
    pub async fn bind<D: Dispatch>(
        name: &'static str,
        address: &str,
        dispatcher: Arc<D>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::io(format!("binding {name} listener on {address}"), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::io(format!("reading {name} listener address"), e))?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_accept_loop(name, listener, dispatcher, cancel.clone()));
        info!("{name} listening on {local_addr}");
        Ok(Self {
            name,
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the loop to exit. Repeat calls are no-ops.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await.map_err(|e| ServerError::Shutdown {
            message: format!("{} accept loop did not exit cleanly", self.name),
            source: Some(Box::new(e)),
        })
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_accept_loop<D: Dispatch>(
    name: &'static str,
    listener: TcpListener,
    dispatcher: Arc<D>,
    cancel: CancellationToken,
) {
    debug!("{name} accept loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher.as_ref()).await {
                                error!("{name} connection handler error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("{name} accept error: {e}");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    debug!("{name} accept loop stopped");
}

async fn handle_connection<D: Dispatch>(stream: TcpStream, dispatcher: &D) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => {
            debug!("Peer disconnected without sending a request");
            return Ok(());
        }
        Err(e) => {
            warn!("Failed to read request: {e}");
            return Ok(());
        }
        Ok(_) => {}
    }

    let response = match serde_json::from_str::<Request>(line.trim()) {
        Err(e) => {
            warn!("Malformed request: {e}");
            Response::error("unknown", codes::INVALID_REQUEST, &format!("{e}"))
        }
        Ok(request) if request.version != PROTOCOL_VERSION => Response::error(
            &request.request_id,
            codes::VERSION_MISMATCH,
            &format!(
                "unsupported protocol version {}; server speaks {PROTOCOL_VERSION}",
                request.version
            ),
        ),
        Ok(request) => {
            debug!("Request {} id={}", request.command, request.request_id);
            dispatcher.dispatch(&request)
        }
    };

    let mut reply = serde_json::to_string(&response)?;
    reply.push('\n');
    let mut stream = reader.into_inner();
    // Fire-and-forget callers hang up without reading the reply.
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        debug!("Reply to {} not delivered: {e}", response.request_id);
        return Ok(());
    }
    stream.flush().await?;
    Ok(())
}

//! Wire protocol server
//!
//! One task per accepted connection. Each `read` is treated as one frame: 25
//! bytes is a save, 2 bytes an extract, anything else is logged and dropped
//! without a response while the connection stays open.

use crate::{
    ledger::Ledger,
    protocol::{encode_error, encode_extract_ok, encode_save_ok, ErrorCode, Request},
    Error, Result,
};
use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// Per-read buffer; larger than any valid frame so an oversized write is
/// seen at its real length and rejected whole
const READ_BUFFER_LEN: usize = 512;

/// Bound wire protocol server
#[derive(Debug)]
pub struct LedgerServer {
    listener: TcpListener,
    ledger: Arc<Ledger>,
}

impl LedgerServer {
    /// Bind the listener
    pub async fn bind(addr: &str, ledger: Arc<Ledger>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Ledger server listening");
        Ok(Self { listener, ledger })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// On shutdown the listener is dropped and every tracked connection task
    /// is aborted, closing its socket. In-flight requests may not complete.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ledger = self.ledger.clone();
                        connections.spawn(async move {
                            match handle_connection(stream, addr, ledger).await {
                                Ok(()) => tracing::debug!(client = %addr, "Connection closed"),
                                Err(e) => tracing::warn!(client = %addr, error = %e, "Connection error"),
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                _ = &mut shutdown => {
                    tracing::info!(open = connections.len(), "Ledger server shutting down");
                    break;
                }
            }
        }

        drop(self.listener);
        connections.abort_all();
        while connections.join_next().await.is_some() {}

        Ok(())
    }
}

/// Serve one client until it disconnects or a socket error occurs
async fn handle_connection(mut stream: TcpStream, addr: SocketAddr, ledger: Arc<Ledger>) -> Result<()> {
    tracing::debug!(client = %addr, "New connection");

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(client = %addr, error = %e, "Could not set TCP_NODELAY");
    }

    let mut buf = [0u8; READ_BUFFER_LEN];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        let request = match Request::parse(&buf[..n]) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(client = %addr, bytes = n, error = %e, "Dropping malformed frame");
                continue;
            }
        };

        if let Some(response) = dispatch(&ledger, request).await {
            stream.write_all(&response).await?;
        }
    }
}

/// Run a request against the ledger and encode the reply
///
/// Returns `None` when the failure has no wire representation; the error is
/// logged and the client gets no response.
pub async fn dispatch(ledger: &Ledger, request: Request) -> Option<BytesMut> {
    let result = match request {
        Request::Save(record) => match record.decode().into_transaction() {
            Ok((account, tx)) => ledger
                .save(account, tx)
                .await
                .and_then(|result| encode_save_ok(&result)),
            Err(e) => Err(e),
        },
        Request::Extract(account) => ledger
            .extract(account)
            .and_then(|statement| encode_extract_ok(account, &statement)),
    };

    match result {
        Ok(response) => Some(response),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &Error) -> Option<BytesMut> {
    match ErrorCode::for_error(err) {
        Some(code) => {
            tracing::debug!(error = %err, "Request rejected");
            Some(encode_error(code))
        }
        None => {
            tracing::error!(error = %err, "Request failed without a wire error code");
            None
        }
    }
}

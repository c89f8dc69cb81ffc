//! HTTP API and admission webhook listener.
//!
//! Every accepted connection is served on its own tokio task, so a slow
//! remediation call never holds up admission reviews. While a request is
//! being handled the connection is watched for the client going away, and
//! the server watches for shutdown; either one drops the handler future,
//! which cancels any outstanding remediation call.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub mod http;
pub mod routes;

pub use routes::{AppState, HttpResponse, Route};

use http::{read_request, write_response, RawRequest};

/// Bind `bind` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn serve(bind: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind}: {e}"))?;
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };
    serve_listener(listener, state, ctrl_c).await
}

/// Serve connections from `listener` until `shutdown` resolves.
///
/// On shutdown the listener stops accepting, requests still in flight are
/// answered with 503, and the call returns once every connection task has
/// finished.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve_listener<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let local = listener.local_addr()?;
    info!(bind = %local, "policy agent listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    let shutdown = shutdown_rx.clone();
                    connections.spawn(handle_connection(stream, peer, state, shutdown));
                }
                Err(e) => warn!(error = %e, "failed to accept connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "connection task failed");
                }
            }
            () = &mut shutdown => break,
        }
    }

    info!("shutdown requested");
    drop(listener);
    if shutdown_tx.send(true).is_err() {
        debug!("no connections left to notify");
    }
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "connection task failed");
        }
    }
    info!("policy agent stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = tokio::select! {
        read = read_request(&mut reader, &mut write_half) => read,
        () = cancelled(&mut shutdown) => return,
    };
    let RawRequest {
        method,
        target,
        body,
    } = match request {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            warn!(%peer, error = %e, "rejecting malformed request");
            let response = HttpResponse::error(400, e);
            if let Err(e) = write_response(&mut write_half, &response).await {
                debug!(%peer, error = %e, "failed to write response");
            }
            return;
        }
    };

    debug!(%peer, %method, %target, "request received");
    let response = tokio::select! {
        response = state.dispatch(&method, &target, body) => response,
        () = client_gone(&mut reader) => {
            info!(%peer, %target, "client disconnected, request abandoned");
            return;
        }
        () = cancelled(&mut shutdown) => HttpResponse::error(503, "server shutting down"),
    };

    if let Err(e) = write_response(&mut write_half, &response).await {
        warn!(%peer, %target, error = %e, "failed to write response");
    }
}

/// Resolves once the peer closes its side of the connection or the socket
/// fails. Bytes sent after the request are discarded.
async fn client_gone<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0_u8; 512];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Resolves once shutdown is signalled; never if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

//! The ingress: a TCP listener accepting newline-delimited JSON
//! envelopes, one per line, with a per-line read deadline that keeps
//! idle connections open.

use std::net::SocketAddr;

use futures::StreamExt;
use stream_cancel::Tripwire;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, Duration};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::dispatch::Dispatcher;

const READ_DEADLINE: Duration = Duration::from_millis(400);
const MAX_LINE_LENGTH: usize = 100 * 1024;

/// The running TCP server. Errors surface on a channel the
/// orchestrator multiplexes; [`Server::stop`] waits for the accept
/// loop and every connection to finish after the shutdown signal has
/// fired.
pub struct Server {
    local_addr: SocketAddr,
    errors: mpsc::UnboundedReceiver<std::io::Error>,
    serve: JoinHandle<()>,
}

impl Server {
    /// Binds `addr` and starts serving. Accepting and reading stop
    /// once `shutdown` resolves.
    pub async fn bind(
        addr: &str,
        dispatcher: Dispatcher,
        shutdown: Tripwire,
    ) -> std::io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (error_tx, errors) = mpsc::unbounded_channel();
        let serve = tokio::spawn(serve(listener, dispatcher, shutdown, error_tx));
        info!(message = "Listening for flow envelopes.", addr = %local_addr);
        Ok(Server {
            local_addr,
            errors,
            serve,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The next server error; `None` once the server has fully
    /// stopped.
    pub async fn recv_error(&mut self) -> Option<std::io::Error> {
        self.errors.recv().await
    }

    /// Waits for the accept loop and all connections to finish,
    /// draining any remaining errors. Call after the shutdown signal
    /// has been triggered.
    pub async fn stop(mut self) {
        while let Some(error) = self.errors.recv().await {
            error!(message = "TCP server error.", %error);
        }
        let _ = self.serve.await;
        info!(message = "TCP server stopped.");
    }
}

async fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: Tripwire,
    errors: mpsc::UnboundedSender<std::io::Error>,
) {
    info!(message = "Start serving clients.");
    let mut connections = JoinSet::new();
    let accept_shutdown = shutdown.clone();
    tokio::pin!(accept_shutdown);

    loop {
        tokio::select! {
            _ = &mut accept_shutdown => {
                info!(message = "Graceful stop of accept loop.");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    info!(message = "Accepted connection.", %peer);
                    connections.spawn(handle_connection(
                        socket,
                        peer,
                        dispatcher.clone(),
                        shutdown.clone(),
                        errors.clone(),
                    ));
                }
                Err(error) => {
                    let _ = errors.send(error);
                }
            },
        }
    }

    // stop accepting before waiting out active connections
    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    shutdown: Tripwire,
    errors: mpsc::UnboundedSender<std::io::Error>,
) {
    let mut lines = FramedRead::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(message = "Forcing close on connection.", %peer);
                break;
            }
            next = timeout(READ_DEADLINE, lines.next()) => match next {
                // deadline expired without a complete line; the
                // connection stays open and the deadline restarts
                Err(_elapsed) => continue,
                // EOF, connection closed cleanly by the peer
                Ok(None) => break,
                Ok(Some(Ok(line))) => {
                    // the frame is an owned buffer, detached from the
                    // reader's internal scratch space
                    let _ = dispatcher.dispatch(line.into()).await;
                }
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                    warn!(message = "Discarded over-long line.", %peer);
                }
                Ok(Some(Err(LinesCodecError::Io(error)))) => {
                    let _ = errors.send(error);
                    break;
                }
            },
        }
    }
    info!(message = "Finished connection.", %peer);
}

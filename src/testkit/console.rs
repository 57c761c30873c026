//! Loopback console host for relay tests.
//!
//! Behaves like a hypervisor console endpoint: serves `/ticket/{ticket}`,
//! refuses the upgrade unless the client asks for the `binary` sub-protocol,
//! and echoes every data frame back unchanged.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Response as ClientResponse;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::domain::ConsoleTicket;

const REQUIRED_PROTOCOL: &str = "binary";

/// Client socket opened against the relay listener.
pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct ServerState {
    tickets: Mutex<Vec<String>>,
    rejected: AtomicUsize,
    open: AtomicUsize,
    frames: AtomicUsize,
}

/// Echoing console host bound to an ephemeral loopback port.
pub struct ConsoleServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl ConsoleServer {
    /// Start an echo server.
    pub async fn start() -> std::io::Result<Self> {
        Self::spawn(None).await
    }

    /// Start a server that closes each connection after echoing `frames` frames.
    pub async fn start_closing_after(frames: usize) -> std::io::Result<Self> {
        Self::spawn(Some(frames)).await
    }

    async fn spawn(close_after: Option<usize>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState::default());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone(), close_after));
            }
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// A ticket pointing at this server.
    pub fn ticket(&self, ticket: &str) -> ConsoleTicket {
        ConsoleTicket::new(ticket, self.addr.ip().to_string(), self.addr.port())
    }

    /// Tickets presented by successful upgrades, in arrival order.
    pub fn tickets(&self) -> Vec<String> {
        self.state.tickets.lock().clone()
    }

    /// Upgrades refused for missing the binary sub-protocol.
    pub fn rejected(&self) -> usize {
        self.state.rejected.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Data frames echoed so far.
    pub fn frames(&self) -> usize {
        self.state.frames.load(Ordering::SeqCst)
    }
}

impl Drop for ConsoleServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn refuse(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn serve(stream: TcpStream, state: Arc<ServerState>, close_after: Option<usize>) {
    let handshake_state = state.clone();
    let callback = move |request: &Request, mut response: Response| {
        let offered = request
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !offered.split(',').any(|p| p.trim() == REQUIRED_PROTOCOL) {
            handshake_state.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(refuse(StatusCode::BAD_REQUEST, "binary sub-protocol required"));
        }

        let Some(ticket) = request.uri().path().strip_prefix("/ticket/") else {
            return Err(refuse(StatusCode::NOT_FOUND, "unknown path"));
        };
        handshake_state.tickets.lock().push(ticket.to_string());

        response.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(REQUIRED_PROTOCOL),
        );
        Ok(response)
    };

    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    state.open.fetch_add(1, Ordering::SeqCst);
    let mut echoed = 0usize;
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Binary(_) | Message::Text(_) => {
                if ws.send(message).await.is_err() {
                    break;
                }
                echoed += 1;
                state.frames.fetch_add(1, Ordering::SeqCst);
                if close_after.is_some_and(|limit| echoed >= limit) {
                    let _ = ws.close(None).await;
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    state.open.fetch_sub(1, Ordering::SeqCst);
}

/// Connect to the relay listener at `addr` the way a browser console does,
/// offering the `binary` sub-protocol.
pub async fn connect_client(
    addr: SocketAddr,
    path: &str,
) -> Result<(ClientSocket, ClientResponse), WsError> {
    let mut request = format!("ws://{addr}{path}").into_client_request()?;
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(REQUIRED_PROTOCOL),
    );
    tokio_tungstenite::connect_async(request).await
}

/// An in-memory WebSocket pair: `(relay side, client side)`.
///
/// Lets tests call `RelayManager::attach` directly without a listener.
pub async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    (server, client)
}

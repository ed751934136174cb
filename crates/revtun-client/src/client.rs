//! Tunnel client lifecycle and public traffic proxying

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::request::Parts;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use revtun_agent::{is_transport_churn, AgentEvent, AgentStats, TunnelAgent};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::handshake::encode_request_head;

const BAD_GATEWAY_BODY: &str = "Bad Gateway: tunnel connection failed\n";

/// Response body type produced by [`Client::handle_request`]
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Grace periods governing a tunnel without connected sockets
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long the client machine has to open its first socket
    pub initial_grace: Duration,
    /// How long the client machine has to come back after losing every socket
    pub reconnect_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_grace: Duration::from_secs(10),
            reconnect_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    New,
    Online,
    Offline,
    Closed,
}

/// A tunnel: one agent, its identifier and its lifecycle policy
pub struct Client {
    id: String,
    agent: TunnelAgent,
    config: ClientConfig,
    state: Mutex<ClientState>,
    closed: CancellationToken,
}

impl Client {
    /// Create the client and start its initial grace timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(id: impl Into<String>, agent: TunnelAgent, config: ClientConfig) -> Arc<Self> {
        let events = agent.subscribe();
        let deadline = Instant::now() + config.initial_grace;

        let client = Arc::new(Self {
            id: id.into(),
            agent,
            config,
            state: Mutex::new(ClientState::New),
            closed: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&client).supervise(events, deadline));
        client
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent(&self) -> &TunnelAgent {
        &self.agent
    }

    pub fn state(&self) -> ClientState {
        *self.lock_state()
    }

    pub fn stats(&self) -> AgentStats {
        self.agent.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ClientState::Closed
    }

    /// Resolves once the client has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ClientState) {
        let mut state = self.lock_state();
        if *state != ClientState::Closed {
            *state = next;
        }
    }

    /// Close the tunnel. Safe to call any number of times.
    pub fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == ClientState::Closed {
                return;
            }
            *state = ClientState::Closed;
        }

        self.closed.cancel();
        self.agent.destroy();
        info!(tunnel_id = %self.id, "Tunnel closed");
    }

    /// Tracks agent connectivity and enforces the grace periods.
    async fn supervise(
        self: Arc<Self>,
        mut events: broadcast::Receiver<AgentEvent>,
        initial_deadline: Instant,
    ) {
        let mut deadline = Some(initial_deadline);

        loop {
            let grace = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.closed.cancelled() => break,
                _ = grace => {
                    info!(
                        tunnel_id = %self.id,
                        state = ?self.state(),
                        "No tunnel socket within grace period, closing tunnel"
                    );
                    self.close();
                    break;
                }
                event = events.recv() => match event {
                    Ok(AgentEvent::Online) => {
                        deadline = None;
                        self.set_state(ClientState::Online);
                    }
                    Ok(AgentEvent::Offline) => {
                        deadline = Some(Instant::now() + self.config.reconnect_grace);
                        self.set_state(ClientState::Offline);
                    }
                    Ok(AgentEvent::Error(message)) => {
                        warn!(tunnel_id = %self.id, error = %message, "Tunnel agent failed, closing tunnel");
                        self.close();
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(tunnel_id = %self.id, skipped, "Missed agent events, resyncing");
                        deadline = self.resync(deadline);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    /// Rebuild the connectivity state from socket counts after missed events.
    fn resync(&self, deadline: Option<Instant>) -> Option<Instant> {
        if self.agent.stats().connected_sockets > 0 {
            self.set_state(ClientState::Online);
            return None;
        }

        match self.state() {
            ClientState::New => deadline,
            ClientState::Offline if deadline.is_some() => deadline,
            _ => {
                self.set_state(ClientState::Offline);
                Some(Instant::now() + self.config.reconnect_grace)
            }
        }
    }

    /// Forward a public HTTP request over a tunnel socket.
    ///
    /// Failures before the response head arrives are answered with 502. Once
    /// the head has been returned, a failure surfaces as a body error.
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let uri = req.uri().clone();

        match self.forward(req).await {
            Ok(response) => {
                debug!(
                    tunnel_id = %self.id,
                    %method,
                    %uri,
                    status = response.status().as_u16(),
                    "Proxied request"
                );
                response
            }
            Err(e) => {
                warn!(tunnel_id = %self.id, %method, %uri, error = %e, "Tunnel request failed");
                bad_gateway()
            }
        }
    }

    async fn forward<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>, ProxyError>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let socket = self.agent.create_connection().await?;
        let socket_id = socket.id();
        let peer_addr = socket.peer_addr();

        let (mut sender, conn) = http1::Builder::new()
            .preserve_header_case(true)
            .handshake(TokioIo::new(socket))
            .await
            .map_err(ProxyError::Handshake)?;

        let tunnel_id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(%tunnel_id, socket_id, %peer_addr, error = %e, "Tunnel connection closed with error");
            }
        });

        let response = sender.send_request(req).await.map_err(ProxyError::Request)?;
        Ok(response.map(|body| body.boxed()))
    }

    /// Join an upgraded public connection to a tunnel socket.
    ///
    /// `public` must be positioned right after the request head described by
    /// `head`. The head is written to the tunnel socket, then bytes are piped
    /// in both directions until either side closes.
    pub async fn handle_upgrade<S>(&self, head: &Parts, mut public: S) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut socket = match self.agent.create_connection().await {
            Ok(socket) => socket,
            Err(e) => {
                debug!(tunnel_id = %self.id, error = %e, "No tunnel socket for upgrade, closing public connection");
                let _ = public.shutdown().await;
                return Err(e.into());
            }
        };

        socket.write_all(&encode_request_head(head)).await?;

        match tokio::io::copy_bidirectional(&mut public, &mut socket).await {
            Ok((to_tunnel, to_public)) => {
                debug!(
                    tunnel_id = %self.id,
                    socket_id = socket.id(),
                    to_tunnel,
                    to_public,
                    "Upgraded connection finished"
                );
                Ok(())
            }
            Err(e) if is_transport_churn(&e) => {
                debug!(tunnel_id = %self.id, error = %e, "Upgraded connection dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn bad_gateway() -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(BAD_GATEWAY_BODY.as_bytes()))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

//! Tunnel agent implementation
//!
//! Listens on a tunnel's dedicated port and keeps the client machine's
//! connections in an idle pool. Requests for a socket that arrive while the
//! pool is empty are queued and served in arrival order.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{is_transport_churn, AgentError};
use crate::socket::TunnelSocket;

const BIND_ATTEMPTS: u32 = 3;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(250);
const LISTEN_BACKLOG: u32 = 1024;
const EVENT_CAPACITY: usize = 64;

/// Tunnel agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Tunnel this agent serves, used for log context
    pub tunnel_id: String,
    pub bind_addr: IpAddr,
    /// Port to listen on (0 lets the OS choose)
    pub port: u16,
    /// Maximum number of sockets the client machine may hold open at once
    pub max_tcp_sockets: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tunnel_id: "tunnel".to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_tcp_sockets: 10,
        }
    }
}

/// Connectivity transitions reported to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The first socket of the client machine connected
    Online,
    /// The last connected socket went away
    Offline,
    /// The listener failed and the agent stopped accepting sockets
    Error(String),
}

/// Point-in-time socket counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub connected_sockets: usize,
    pub available_sockets: usize,
    pub waiting_requests: usize,
}

type Waiter = oneshot::Sender<Result<TunnelSocket, AgentError>>;

/// An idle socket parked in the pool.
///
/// The socket itself lives inside a watcher task that notices when the
/// client machine closes it. Claiming stops the watcher and takes the socket
/// back out of the task.
struct IdleSocket {
    socket_id: u64,
    release: CancellationToken,
    watcher: JoinHandle<Option<TunnelSocket>>,
}

impl IdleSocket {
    /// Returns `None` when the peer closed the socket before it was claimed.
    async fn claim(self) -> Option<TunnelSocket> {
        self.release.cancel();
        self.watcher.await.ok().flatten()
    }

    fn discard(self) {
        self.watcher.abort();
    }
}

enum NextSocket {
    Idle(IdleSocket),
    Queued(oneshot::Receiver<Result<TunnelSocket, AgentError>>),
}

#[derive(Default)]
struct PoolState {
    started: bool,
    closed: bool,
    port: Option<u16>,
    connected: usize,
    idle: VecDeque<IdleSocket>,
    waiting: VecDeque<Waiter>,
}

pub(crate) struct Shared {
    tunnel_id: String,
    max_tcp_sockets: usize,
    state: Mutex<PoolState>,
    events: broadcast::Sender<AgentEvent>,
    next_socket_id: AtomicU64,
}

/// Frees a socket's slot when the socket is dropped
pub(crate) struct SocketLease {
    shared: Arc<Shared>,
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.shared.socket_closed();
    }
}

impl Shared {
    // A TunnelSocket must never be dropped while this guard is alive: its
    // lease locks the same mutex.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        if state.connected >= self.max_tcp_sockets {
            debug!(
                tunnel_id = %self.tunnel_id,
                %peer_addr,
                max_tcp_sockets = self.max_tcp_sockets,
                "Socket cap reached, dropping tunnel socket"
            );
            return;
        }

        state.connected += 1;
        if state.connected == 1 {
            info!(tunnel_id = %self.tunnel_id, "Tunnel online");
            let _ = self.events.send(AgentEvent::Online);
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(tunnel_id = %self.tunnel_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let socket_id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            tunnel_id = %self.tunnel_id,
            socket_id,
            %peer_addr,
            connected = state.connected,
            "Tunnel socket connected"
        );

        let lease = SocketLease {
            shared: Arc::clone(self),
        };
        let socket = TunnelSocket::new(socket_id, peer_addr, stream, lease);
        self.hand_off(&mut state, socket);
    }

    /// Gives the socket to the oldest live waiter, or parks it in the pool.
    fn hand_off(self: &Arc<Self>, state: &mut PoolState, mut socket: TunnelSocket) {
        while let Some(waiter) = state.waiting.pop_front() {
            match waiter.send(Ok(socket)) {
                Ok(()) => return,
                // requester went away; try the next one
                Err(Ok(returned)) => socket = returned,
                Err(Err(_)) => return,
            }
        }

        let release = CancellationToken::new();
        let socket_id = socket.id();
        let watcher = tokio::spawn(watch_idle(Arc::clone(self), socket, release.clone()));
        state.idle.push_back(IdleSocket {
            socket_id,
            release,
            watcher,
        });
    }

    fn socket_closed(&self) {
        let mut state = self.lock();
        state.connected = state.connected.saturating_sub(1);
        debug!(
            tunnel_id = %self.tunnel_id,
            connected = state.connected,
            "Tunnel socket closed"
        );

        if state.connected == 0 && !state.closed {
            info!(tunnel_id = %self.tunnel_id, "Tunnel offline");
            let _ = self.events.send(AgentEvent::Offline);
        }
    }
}

/// Holds an idle socket until it is claimed or closed by the peer.
async fn watch_idle(
    shared: Arc<Shared>,
    socket: TunnelSocket,
    release: CancellationToken,
) -> Option<TunnelSocket> {
    let mut probe = [0u8; 1];
    let closed = tokio::select! {
        biased;
        _ = release.cancelled() => false,
        peeked = socket.stream.peek(&mut probe) => match peeked {
            Ok(0) => true,
            Ok(_) => {
                // the relay always speaks first on a tunnel socket
                debug!(
                    tunnel_id = %shared.tunnel_id,
                    socket_id = socket.id(),
                    peer_addr = %socket.peer_addr(),
                    "Unexpected data on idle tunnel socket, dropping it"
                );
                true
            }
            Err(e) => {
                if !is_transport_churn(&e) {
                    warn!(tunnel_id = %shared.tunnel_id, error = %e, "Idle tunnel socket failed");
                }
                true
            }
        },
    };

    if !closed {
        return Some(socket);
    }

    shared
        .lock()
        .idle
        .retain(|idle| idle.socket_id != socket.id());
    debug!(
        tunnel_id = %shared.tunnel_id,
        socket_id = socket.id(),
        "Idle tunnel socket removed from pool"
    );
    None
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => shared.admit(stream, peer_addr),
            Err(e) if is_transport_churn(&e) => {
                debug!(tunnel_id = %shared.tunnel_id, error = %e, "Tunnel socket aborted during accept");
            }
            Err(e) => {
                error!(tunnel_id = %shared.tunnel_id, error = %e, "Tunnel listener failed");
                let _ = shared.events.send(AgentEvent::Error(e.to_string()));
                break;
            }
        }
    }

    debug!(tunnel_id = %shared.tunnel_id, "Tunnel listener stopped");
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Owns the listening socket and socket pool of one tunnel
pub struct TunnelAgent {
    config: AgentConfig,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl TunnelAgent {
    pub fn new(config: AgentConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            tunnel_id: config.tunnel_id.clone(),
            max_tcp_sockets: config.max_tcp_sockets,
            state: Mutex::new(PoolState::default()),
            events,
            next_socket_id: AtomicU64::new(1),
        });

        Self {
            config,
            shared,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register for connectivity events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.shared.events.subscribe()
    }

    /// Bind the tunnel port and start accepting sockets. Returns the bound port.
    pub async fn listen(&self) -> Result<u16, AgentError> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(AgentError::Closed);
            }
            if state.started {
                return Err(AgentError::AlreadyStarted);
            }
            state.started = true;
        }

        let listener = self.bind_with_retry().await?;
        let port = listener.local_addr()?.port();

        {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(AgentError::Closed);
            }
            state.port = Some(port);
        }

        info!(
            tunnel_id = %self.config.tunnel_id,
            address = %self.config.bind_addr,
            port,
            "Tunnel agent listening"
        );

        tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            self.shutdown.clone(),
        ));

        Ok(port)
    }

    async fn bind_with_retry(&self) -> Result<TcpListener, AgentError> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);

        // A port released a moment ago may still be held by the previous
        // tunnel's listener task.
        for attempt in 1..=BIND_ATTEMPTS {
            match bind_listener(addr) {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                    warn!(
                        tunnel_id = %self.config.tunnel_id,
                        port = addr.port(),
                        attempt,
                        "Tunnel port in use, retrying"
                    );
                    tokio::time::sleep(BIND_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(AgentError::BindError {
                        address: addr.ip().to_string(),
                        port: addr.port(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(AgentError::BindError {
            address: addr.ip().to_string(),
            port: addr.port(),
            reason: format!("Address in use after {} attempts", BIND_ATTEMPTS),
        })
    }

    /// Obtain a socket for one proxied exchange.
    ///
    /// Takes the oldest idle socket when one is available. Otherwise waits for
    /// the client machine to connect one; waiters are served first come,
    /// first served.
    pub async fn create_connection(&self) -> Result<TunnelSocket, AgentError> {
        let mut retrying = false;
        loop {
            let next = {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(AgentError::Closed);
                }
                match state.idle.pop_front() {
                    Some(idle) => NextSocket::Idle(idle),
                    None => {
                        let (tx, rx) = oneshot::channel();
                        // a request whose claimed socket died keeps its place in line
                        if retrying {
                            state.waiting.push_front(tx);
                        } else {
                            state.waiting.push_back(tx);
                        }
                        NextSocket::Queued(rx)
                    }
                }
            };

            match next {
                NextSocket::Idle(idle) => {
                    if let Some(socket) = idle.claim().await {
                        return Ok(socket);
                    }
                    retrying = true;
                }
                NextSocket::Queued(rx) => {
                    debug!(tunnel_id = %self.config.tunnel_id, "No idle tunnel socket, request queued");
                    return rx.await.unwrap_or(Err(AgentError::Closed));
                }
            }
        }
    }

    /// Return an unused socket to the agent
    pub fn release(&self, socket: TunnelSocket) {
        let mut state = self.shared.lock();
        if state.closed {
            drop(state);
            drop(socket);
            return;
        }
        self.shared.hand_off(&mut state, socket);
    }

    /// Close the listener, fail queued requests and drop idle sockets.
    pub fn destroy(&self) {
        let (idle, waiting) = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiting),
            )
        };

        self.shutdown.cancel();

        for waiter in waiting {
            let _ = waiter.send(Err(AgentError::Closed));
        }
        for socket in idle {
            socket.discard();
        }

        info!(tunnel_id = %self.config.tunnel_id, "Tunnel agent destroyed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Port the agent is bound to, once listening
    pub fn port(&self) -> Option<u16> {
        self.shared.lock().port
    }

    pub fn stats(&self) -> AgentStats {
        let mut state = self.shared.lock();
        state.waiting.retain(|waiter| !waiter.is_closed());
        AgentStats {
            connected_sockets: state.connected,
            available_sockets: state.idle.len(),
            waiting_requests: state.waiting.len(),
        }
    }
}

impl Drop for TunnelAgent {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config(max_tcp_sockets: usize) -> AgentConfig {
        AgentConfig {
            tunnel_id: "test-tunnel".to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            max_tcp_sockets,
        }
    }

    async fn start_agent(max_tcp_sockets: usize) -> (TunnelAgent, u16) {
        let agent = TunnelAgent::new(test_config(max_tcp_sockets));
        let port = agent.listen().await.unwrap();
        (agent, port)
    }

    async fn connect(port: u16) -> TcpStream {
        TcpStream::connect(("127.0.0.1", port)).await.unwrap()
    }

    async fn eventually(agent: &TunnelAgent, check: impl Fn(AgentStats) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check(agent.stats()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("condition not reached, stats: {:?}", agent.stats()));
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tcp_sockets, 10);
        assert_eq!(config.port, 0);
        assert!(config.bind_addr.is_unspecified());
    }

    #[tokio::test]
    async fn test_listen_is_one_shot() {
        let (agent, port) = start_agent(10).await;
        assert_ne!(port, 0);
        assert_eq!(agent.port(), Some(port));

        let second = agent.listen().await;
        assert!(matches!(second, Err(AgentError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_listen_on_taken_port_fails() {
        let (_first, port) = start_agent(10).await;

        let mut config = test_config(10);
        config.port = port;
        let second = TunnelAgent::new(config);

        match second.listen().await {
            Err(AgentError::BindError { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_online_and_offline_events() {
        let (agent, port) = start_agent(10).await;
        let mut events = agent.subscribe();

        let remote = connect(port).await;
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, AgentEvent::Online);
        eventually(&agent, |s| s.connected_sockets == 1 && s.available_sockets == 1).await;

        drop(remote);
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, AgentEvent::Offline);
        eventually(&agent, |s| s.connected_sockets == 0 && s.available_sockets == 0).await;
    }

    #[tokio::test]
    async fn test_idle_socket_that_sends_data_is_dropped() {
        let (agent, port) = start_agent(10).await;
        let mut events = agent.subscribe();

        let mut remote = connect(port).await;
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, AgentEvent::Online);

        remote.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, AgentEvent::Offline);
        eventually(&agent, |s| s.connected_sockets == 0 && s.available_sockets == 0).await;

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), remote.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_idle_socket_that_sends_data_and_hangs_up_is_dropped() {
        let (agent, port) = start_agent(10).await;

        let mut remote = connect(port).await;
        eventually(&agent, |s| s.connected_sockets == 1).await;
        remote.write_all(b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(remote);

        eventually(&agent, |s| s.connected_sockets == 0 && s.available_sockets == 0).await;
    }

    #[tokio::test]
    async fn test_socket_cap_rejects_extra_connections() {
        let (agent, port) = start_agent(2).await;

        let _first = connect(port).await;
        let _second = connect(port).await;
        eventually(&agent, |s| s.connected_sockets == 2).await;

        let mut third = connect(port).await;
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), third.read(&mut buf))
            .await
            .unwrap();
        // rejected sockets are closed straight away
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(agent.stats().connected_sockets, 2);
    }

    #[tokio::test]
    async fn test_create_connection_uses_idle_socket() {
        let (agent, port) = start_agent(10).await;

        let mut remote = connect(port).await;
        eventually(&agent, |s| s.available_sockets == 1).await;

        let mut socket = agent.create_connection().await.unwrap();
        assert_eq!(agent.stats().available_sockets, 0);
        assert_eq!(agent.stats().connected_sockets, 1);

        remote.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        socket.write_all(b"pong").await.unwrap();
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_queued_requests_are_served_in_order() {
        let (agent, port) = start_agent(10).await;
        let agent = Arc::new(agent);

        let first = tokio::spawn({
            let agent = agent.clone();
            async move { agent.create_connection().await }
        });
        eventually(&agent, |s| s.waiting_requests == 1).await;

        let second = tokio::spawn({
            let agent = agent.clone();
            async move { agent.create_connection().await }
        });
        eventually(&agent, |s| s.waiting_requests == 2).await;

        let mut remote_a = connect(port).await;
        remote_a.write_all(b"a").await.unwrap();
        eventually(&agent, |s| s.waiting_requests == 1).await;

        let mut remote_b = connect(port).await;
        remote_b.write_all(b"b").await.unwrap();

        let mut first = first.await.unwrap().unwrap();
        let mut second = second.await.unwrap().unwrap();

        let mut buf = [0u8; 1];
        first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"a");
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"b");

        // sockets went straight to the waiters
        assert_eq!(agent.stats().available_sockets, 0);
    }

    #[tokio::test]
    async fn test_request_keeps_its_place_when_claimed_socket_died() {
        let (agent, port) = start_agent(10).await;

        // an idle entry whose peer has already gone away
        agent.shared.lock().idle.push_back(IdleSocket {
            socket_id: u64::MAX,
            release: CancellationToken::new(),
            watcher: tokio::spawn(async { None::<TunnelSocket> }),
        });
        // a request that queued while the dead socket was being claimed
        let (later_tx, mut later_rx) = oneshot::channel();
        agent.shared.lock().waiting.push_back(later_tx);

        let first = agent.create_connection();
        tokio::pin!(first);
        tokio::select! {
            biased;
            _ = &mut first => panic!("no socket should be available yet"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(agent.stats().waiting_requests, 2);

        let _remote = connect(port).await;
        let socket = tokio::time::timeout(Duration::from_secs(5), first)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(socket.id(), u64::MAX);
        assert!(later_rx.try_recv().is_err());
        assert_eq!(agent.stats().waiting_requests, 1);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_skipped() {
        let (agent, port) = start_agent(10).await;
        let agent = Arc::new(agent);

        let abandoned = tokio::spawn({
            let agent = agent.clone();
            async move { agent.create_connection().await }
        });
        eventually(&agent, |s| s.waiting_requests == 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        let _remote = connect(port).await;
        eventually(&agent, |s| s.available_sockets == 1).await;
        assert_eq!(agent.stats().waiting_requests, 0);
    }

    #[tokio::test]
    async fn test_dropping_socket_frees_slot() {
        let (agent, port) = start_agent(1).await;
        let mut events = agent.subscribe();

        let _remote = connect(port).await;
        eventually(&agent, |s| s.available_sockets == 1).await;

        let socket = agent.create_connection().await.unwrap();
        drop(socket);
        eventually(&agent, |s| s.connected_sockets == 0).await;

        assert_eq!(events.recv().await.unwrap(), AgentEvent::Online);
        assert_eq!(events.recv().await.unwrap(), AgentEvent::Offline);

        // the slot is free for the next socket
        let _again = connect(port).await;
        eventually(&agent, |s| s.connected_sockets == 1).await;
    }

    #[tokio::test]
    async fn test_release_returns_socket_to_pool() {
        let (agent, port) = start_agent(10).await;

        let _remote = connect(port).await;
        eventually(&agent, |s| s.available_sockets == 1).await;

        let socket = agent.create_connection().await.unwrap();
        let socket_id = socket.id();
        agent.release(socket);
        assert_eq!(agent.stats().available_sockets, 1);

        let again = agent.create_connection().await.unwrap();
        assert_eq!(again.id(), socket_id);
    }

    #[tokio::test]
    async fn test_destroy_fails_queued_requests() {
        let (agent, _port) = start_agent(10).await;
        let agent = Arc::new(agent);

        let queued = tokio::spawn({
            let agent = agent.clone();
            async move { agent.create_connection().await }
        });
        eventually(&agent, |s| s.waiting_requests == 1).await;

        agent.destroy();
        assert!(matches!(queued.await.unwrap(), Err(AgentError::Closed)));
        assert!(matches!(
            agent.create_connection().await,
            Err(AgentError::Closed)
        ));
        assert!(matches!(agent.listen().await, Err(AgentError::Closed)));
        assert!(agent.is_closed());

        // second destroy is a no-op
        agent.destroy();
    }

    #[tokio::test]
    async fn test_destroy_closes_idle_sockets() {
        let (agent, port) = start_agent(10).await;

        let mut remote = connect(port).await;
        eventually(&agent, |s| s.available_sockets == 1).await;

        agent.destroy();
        assert_eq!(agent.stats().available_sockets, 0);

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), remote.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        eventually(&agent, |s| s.connected_sockets == 0).await;
    }
}

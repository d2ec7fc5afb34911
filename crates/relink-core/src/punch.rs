//! NAT punch-through coordination.
//!
//! When the relay asks for a NAT connection, the coordinator binds a UDP
//! socket on a free port, sends a short burst carrying the relay's
//! correlation token to the relay's punch endpoint, and listens for the
//! peer's matching burst. Once the relay advertises the peer's endpoint, a
//! second, paced burst is fired directly at the peer to open the NAT binding
//! from our side.
//!
//! Nothing here blocks the session tick:
//! - sends use a non-blocking duplicate of the punch socket
//! - receives run on a Tokio task that only posts [`PunchEvent`]s into a
//!   single-consumer queue
//! - the paced peer burst is a [`PunchBurst`] advanced by [`PunchCoordinator::poll`]
//!
//! If no reply ever arrives the connection simply stays relayed.

use crate::error::PunchError;
use crate::liveness::{Proxy, ProxyTable};
use crate::proxy::{ProxyKey, SocketProxy};
use rand::Rng;
use relink_proto::FrameWriter;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::ops::Range;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ports tried for the punch socket
pub const NAT_PORT_RANGE: Range<u16> = 16000..17000;

/// Bind attempts before giving up on the punch port range
pub const MAX_BIND_ATTEMPTS: usize = 64;

/// Datagrams in the burst towards the relay's punch endpoint
pub const RELAY_PUNCH_ATTEMPTS: usize = 3;

/// Datagrams in the paced burst towards the peer
pub const PEER_PUNCH_ATTEMPTS: usize = 10;

/// Spacing of the peer burst
pub const PEER_PUNCH_INTERVAL: Duration = Duration::from_millis(250);

/// Peer burst marker
const PEER_PUNCH_MARKER: [u8; 1] = [1];

/// Relay keepalive marker
const KEEPALIVE_MARKER: [u8; 1] = [0];

/// Datagrams shorter than this are punch/keepalive markers and never forwarded
const MIN_FORWARD_LEN: usize = 3;

/// Upper bound for the relay punch payload
const PUNCH_PAYLOAD_CAPACITY: usize = 150;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Work posted by socket receive tasks, drained on the session tick
#[derive(Debug)]
pub enum PunchEvent {
    /// Datagram on the punch socket
    Datagram {
        /// Sender
        from: SocketAddr,
        /// Payload
        data: Vec<u8>,
    },
    /// Datagram from the local direct-connect module on a proxy socket
    ProxyData {
        /// Proxy that received it
        key: ProxyKey,
        /// Local module endpoint
        from: SocketAddr,
        /// Payload
        data: Vec<u8>,
    },
    /// A receive loop ended
    ReceiveFailed(String),
}

/// Which proxy side incoming punch traffic feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchRole {
    /// Neither hosting nor joined
    Idle,
    /// Hosting: one proxy per remote peer
    Server,
    /// Joined: single client proxy
    Client,
}

/// Paced burst of single-byte datagrams towards a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchBurst {
    target: SocketAddr,
    remaining: usize,
    next_at: Instant,
}

impl PunchBurst {
    fn new(target: SocketAddr, now: Instant) -> Self {
        Self {
            target,
            remaining: PEER_PUNCH_ATTEMPTS,
            next_at: now,
        }
    }

    /// Datagrams still to send
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

#[derive(Debug)]
struct PunchSocket {
    sender: std::net::UdpSocket,
    local: SocketAddr,
    recv_task: JoinHandle<()>,
}

impl Drop for PunchSocket {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Drives hole punching and the proxies that follow it
#[derive(Debug)]
pub struct PunchCoordinator {
    local_ip: Option<IpAddr>,
    socket: Option<PunchSocket>,
    relay_endpoint: Option<SocketAddr>,
    events_tx: mpsc::UnboundedSender<PunchEvent>,
    events_rx: mpsc::UnboundedReceiver<PunchEvent>,
    bursts: Vec<PunchBurst>,
    server_proxies: ProxyTable<SocketAddr, SocketProxy>,
    client_proxy: Option<SocketProxy>,
    client_peer: Option<SocketAddr>,
}

impl PunchCoordinator {
    /// Create a coordinator; `local_ip` is where the punch socket binds
    #[must_use]
    pub fn new(local_ip: Option<IpAddr>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            local_ip,
            socket: None,
            relay_endpoint: None,
            events_tx,
            events_rx,
            bursts: Vec::new(),
            server_proxies: ProxyTable::new(),
            client_proxy: None,
            client_peer: None,
        }
    }

    /// Port of the punch socket, once allocated
    #[must_use]
    pub fn nat_port(&self) -> Option<u16> {
        self.socket.as_ref().map(|s| s.local.port())
    }

    /// Port the local direct-connect server listens on behind the proxies
    #[must_use]
    pub fn direct_server_port(&self) -> Option<u16> {
        self.nat_port().and_then(|p| p.checked_add(1))
    }

    /// Port of the client-side proxy
    #[must_use]
    pub fn client_proxy_port(&self) -> Option<u16> {
        self.nat_port().and_then(|p| p.checked_sub(1))
    }

    /// Relay punch endpoint, once resolved
    #[must_use]
    pub fn relay_endpoint(&self) -> Option<SocketAddr> {
        self.relay_endpoint
    }

    /// Number of live server-side proxies
    #[must_use]
    pub fn server_proxy_count(&self) -> usize {
        self.server_proxies.len()
    }

    /// Whether the client-side proxy exists
    #[must_use]
    pub fn has_client_proxy(&self) -> bool {
        self.client_proxy.is_some()
    }

    /// Bursts still in flight
    #[must_use]
    pub fn pending_bursts(&self) -> usize {
        self.bursts.len()
    }

    /// Allocate the punch socket if needed and return its address.
    ///
    /// # Errors
    ///
    /// Returns `PunchError` if no local address is known, no Tokio runtime
    /// is running, or no port in [`NAT_PORT_RANGE`] can be bound.
    pub fn ensure_socket(&mut self) -> Result<SocketAddr, PunchError> {
        if let Some(socket) = &self.socket {
            return Ok(socket.local);
        }

        let ip = self.local_ip.ok_or(PunchError::NoLocalAddress)?;
        let runtime = Handle::try_current().map_err(|_| PunchError::NoRuntime)?;
        let std_socket = bind_punch_socket(ip)?;
        let local = std_socket.local_addr()?;
        let sender = std_socket.try_clone()?;
        let recv_socket = {
            let _guard = runtime.enter();
            UdpSocket::from_std(std_socket)?
        };
        let recv_task = spawn_receiver(&runtime, recv_socket, self.events_tx.clone());

        tracing::debug!("NAT punch socket bound on {}", local);
        self.socket = Some(PunchSocket {
            sender,
            local,
            recv_task,
        });
        Ok(local)
    }

    /// Answer a relay NAT request: resolve the relay punch endpoint and send
    /// the correlation burst.
    ///
    /// # Errors
    ///
    /// Returns `PunchError` if the socket cannot be allocated, the relay does
    /// not resolve, or the token does not fit the punch payload.
    pub fn begin_relay_punch(
        &mut self,
        relay_host: &str,
        nat_id: &str,
        port: i32,
    ) -> Result<(), PunchError> {
        let port =
            u16::try_from(port).map_err(|_| PunchError::Resolve(format!("{relay_host}:{port}")))?;
        self.ensure_socket()?;

        let endpoint = resolve(relay_host, port)?;
        self.relay_endpoint = Some(endpoint);

        let payload = punch_payload(nat_id)?;
        for _ in 0..RELAY_PUNCH_ATTEMPTS {
            if let Err(e) = self.send_raw(&payload, endpoint) {
                tracing::warn!("NAT punch send to {} failed: {}", endpoint, e);
            }
        }

        tracing::debug!(
            "Sent {} punch datagrams to relay {}",
            RELAY_PUNCH_ATTEMPTS,
            endpoint
        );
        Ok(())
    }

    /// Schedule the paced burst towards a peer
    ///
    /// # Errors
    ///
    /// Returns `PunchError` if the punch socket cannot be allocated.
    pub fn start_peer_punch(&mut self, target: SocketAddr, now: Instant) -> Result<(), PunchError> {
        self.ensure_socket()?;
        self.bursts.retain(|b| b.target != target);
        self.bursts.push(PunchBurst::new(target, now));
        Ok(())
    }

    /// Advance in-flight bursts; at most one datagram per burst per call
    pub fn poll(&mut self, now: Instant) {
        let Some(socket) = &self.socket else {
            self.bursts.clear();
            return;
        };

        for burst in &mut self.bursts {
            if burst.remaining > 0 && burst.next_at <= now {
                if let Err(e) = socket.sender.send_to(&PEER_PUNCH_MARKER, burst.target) {
                    tracing::trace!("Punch datagram to {} failed: {}", burst.target, e);
                }
                burst.remaining -= 1;
                burst.next_at = now + PEER_PUNCH_INTERVAL;
            }
        }

        self.bursts.retain(|b| b.remaining > 0);
    }

    /// Keep the relay-side NAT binding open; failures are logged and swallowed
    pub fn keepalive(&self) {
        if let (Some(socket), Some(relay)) = (&self.socket, self.relay_endpoint) {
            if let Err(e) = socket.sender.send_to(&KEEPALIVE_MARKER, relay) {
                tracing::warn!("NAT keepalive failed: {}", e);
            }
        }
    }

    /// Remember the peer the client proxy talks to
    pub fn set_client_peer(&mut self, peer: SocketAddr) {
        self.client_peer = Some(peer);
    }

    /// Open the client-side proxy on `nat_port - 1` and return its port
    ///
    /// # Errors
    ///
    /// Returns `PunchError` if no punch socket exists or the proxy port is
    /// taken.
    pub fn open_client_proxy(&mut self) -> Result<u16, PunchError> {
        let port = self.client_proxy_port().ok_or(PunchError::NoLocalAddress)?;
        if self.client_proxy.is_none() {
            let proxy = SocketProxy::bind(
                ProxyKey::Client,
                SocketAddr::new(LOOPBACK, port),
                None,
                self.events_tx.clone(),
            )?;
            self.client_proxy = Some(proxy);
        }
        Ok(port)
    }

    /// Drop the client-side proxy
    pub fn dispose_client_proxy(&mut self) {
        if let Some(mut proxy) = self.client_proxy.take() {
            proxy.dispose();
        }
        self.client_peer = None;
    }

    /// Evict idle server-side proxies
    pub fn sweep_proxies(&mut self, now: Instant, timeout: Duration) -> usize {
        let evicted = self.server_proxies.sweep(now, timeout);
        if evicted > 0 {
            tracing::debug!("Evicted {} idle NAT proxies", evicted);
        }
        evicted
    }

    /// Dispose every server-side proxy
    pub fn clear_server_proxies(&mut self) -> usize {
        self.server_proxies.clear()
    }

    /// Drain the receive queue and forward traffic according to `role`
    pub fn process_events(&mut self, role: PunchRole, now: Instant) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            processed += 1;
            match event {
                PunchEvent::Datagram { from, data } => self.on_datagram(from, &data, role, now),
                PunchEvent::ProxyData {
                    key: ProxyKey::Server(remote),
                    data,
                    ..
                } => {
                    self.server_proxies.touch(&remote, now);
                    self.send_to_peer(&data, remote);
                }
                PunchEvent::ProxyData {
                    key: ProxyKey::Client,
                    from,
                    data,
                } => {
                    if let Some(proxy) = &mut self.client_proxy {
                        proxy.set_target(from);
                    }
                    if let Some(peer) = self.client_peer {
                        self.send_to_peer(&data, peer);
                    }
                }
                PunchEvent::ReceiveFailed(reason) => {
                    tracing::warn!("NAT receive loop stopped: {}", reason);
                }
            }
        }
        processed
    }

    /// Release every socket, proxy and burst
    pub fn shutdown(&mut self) {
        self.bursts.clear();
        self.server_proxies.clear();
        self.dispose_client_proxy();
        self.socket = None;
        self.relay_endpoint = None;
        while self.events_rx.try_recv().is_ok() {}
    }

    fn on_datagram(&mut self, from: SocketAddr, data: &[u8], role: PunchRole, now: Instant) {
        if self.relay_endpoint.map(|r| r.ip()) == Some(from.ip()) {
            return;
        }

        match role {
            PunchRole::Server => {
                if self.server_proxies.touch(&from, now) {
                    if data.len() >= MIN_FORWARD_LEN {
                        if let Some(proxy) = self.server_proxies.get_mut(&from) {
                            if let Err(e) = proxy.relay_data(data) {
                                tracing::trace!("Proxy relay for {} failed: {}", from, e);
                            }
                        }
                    }
                } else if let Some(port) = self.direct_server_port() {
                    match SocketProxy::bind(
                        ProxyKey::Server(from),
                        SocketAddr::new(LOOPBACK, 0),
                        Some(SocketAddr::new(LOOPBACK, port)),
                        self.events_tx.clone(),
                    ) {
                        Ok(proxy) => {
                            tracing::debug!("Opened NAT proxy for {}", from);
                            self.server_proxies.insert(from, proxy, now);
                        }
                        Err(e) => tracing::warn!("Failed to open NAT proxy for {}: {}", from, e),
                    }
                }
            }
            PunchRole::Client => {
                if self.client_peer.is_none() {
                    self.client_peer = Some(from);
                }
                if self.client_proxy.is_none() {
                    if let Err(e) = self.open_client_proxy() {
                        tracing::warn!("Failed to open client proxy: {}", e);
                    }
                } else if data.len() >= MIN_FORWARD_LEN {
                    if let Some(proxy) = &self.client_proxy {
                        if let Err(e) = proxy.relay_data(data) {
                            tracing::trace!("Client proxy relay failed: {}", e);
                        }
                    }
                }
            }
            PunchRole::Idle => {
                tracing::trace!("Ignoring punch datagram from {} while idle", from);
            }
        }
    }

    fn send_to_peer(&self, data: &[u8], peer: SocketAddr) {
        if let Err(e) = self.send_raw(data, peer) {
            tracing::trace!("Punch socket send to {} failed: {}", peer, e);
        }
    }

    fn send_raw(&self, data: &[u8], to: SocketAddr) -> io::Result<()> {
        match &self.socket {
            Some(socket) => socket.sender.send_to(data, to).map(|_| ()),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "punch socket not allocated",
            )),
        }
    }
}

/// Relay punch payload: `bool true` followed by the echoed token
///
/// # Errors
///
/// Returns a framing error if the token does not fit the payload.
pub fn punch_payload(nat_id: &str) -> Result<Vec<u8>, PunchError> {
    let mut buf = [0u8; PUNCH_PAYLOAD_CAPACITY];
    let len = {
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_bool(true)?;
        writer.write_string(nat_id)?;
        writer.position()
    };
    Ok(buf[..len].to_vec())
}

fn bind_punch_socket(ip: IpAddr) -> Result<std::net::UdpSocket, PunchError> {
    let mut rng = rand::thread_rng();

    for attempt in 1..=MAX_BIND_ATTEMPTS {
        let addr = SocketAddr::new(ip, rng.gen_range(NAT_PORT_RANGE));
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        match socket.bind(&addr.into()) {
            Ok(()) => {
                socket.set_nonblocking(true)?;
                return Ok(socket.into());
            }
            Err(e) => {
                tracing::trace!("Punch port {} unavailable (attempt {}): {}", addr, attempt, e);
            }
        }
    }

    Err(PunchError::NoFreePort(MAX_BIND_ATTEMPTS))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, PunchError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|e| PunchError::Resolve(format!("{host}: {e}")))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| PunchError::Resolve(host.to_string()))
}

fn spawn_receiver(
    runtime: &Handle,
    socket: UdpSocket,
    events: mpsc::UnboundedSender<PunchEvent>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, from)) => {
                    let event = PunchEvent::Datagram {
                        from,
                        data: buf[..len].to_vec(),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(PunchEvent::ReceiveFailed(e.to_string()));
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> PunchCoordinator {
        PunchCoordinator::new(Some(LOOPBACK))
    }

    fn recv_all(socket: &std::net::UdpSocket) -> Vec<Vec<u8>> {
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while let Ok((len, _)) = socket.recv_from(&mut buf) {
            out.push(buf[..len].to_vec());
        }
        out
    }

    #[test]
    fn test_socket_requires_runtime() {
        let mut punch = coordinator();
        assert!(matches!(punch.ensure_socket(), Err(PunchError::NoRuntime)));
        assert_eq!(punch.nat_port(), None);
        assert!(punch.open_client_proxy().is_err());
    }

    #[test]
    fn test_punch_payload_layout() {
        let payload = punch_payload("ab").unwrap();
        assert_eq!(payload, vec![1, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_punch_payload_too_long() {
        let token = "x".repeat(PUNCH_PAYLOAD_CAPACITY);
        assert!(matches!(punch_payload(&token), Err(PunchError::Frame(_))));
    }

    #[test]
    fn test_resolve_literal() {
        let addr = resolve("10.1.2.3", 7776).unwrap();
        assert_eq!(addr, "10.1.2.3:7776".parse().unwrap());
    }

    #[tokio::test]
    async fn test_socket_in_port_range() {
        let mut punch = coordinator();
        let local = punch.ensure_socket().unwrap();
        assert!(NAT_PORT_RANGE.contains(&local.port()));
        assert_eq!(punch.ensure_socket().unwrap(), local);
        assert_eq!(punch.direct_server_port(), Some(local.port() + 1));
        assert_eq!(punch.client_proxy_port(), Some(local.port() - 1));
    }

    #[tokio::test]
    async fn test_no_local_address() {
        let mut punch = PunchCoordinator::new(None);
        assert!(matches!(
            punch.ensure_socket(),
            Err(PunchError::NoLocalAddress)
        ));
    }

    #[tokio::test]
    async fn test_relay_burst_and_keepalive() {
        let relay = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let relay_port = i32::from(relay.local_addr().unwrap().port());

        let mut punch = coordinator();
        punch
            .begin_relay_punch("127.0.0.1", "token-1", relay_port)
            .unwrap();

        let expected = punch_payload("token-1").unwrap();
        let received = recv_all(&relay);
        assert_eq!(received.len(), RELAY_PUNCH_ATTEMPTS);
        assert!(received.iter().all(|d| *d == expected));

        punch.keepalive();
        assert_eq!(recv_all(&relay), vec![vec![0u8]]);
    }

    #[tokio::test]
    async fn test_invalid_relay_port() {
        let mut punch = coordinator();
        assert!(matches!(
            punch.begin_relay_punch("127.0.0.1", "t", -5),
            Err(PunchError::Resolve(_))
        ));
    }

    #[tokio::test]
    async fn test_peer_burst_is_paced() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut punch = coordinator();
        let t0 = Instant::now();
        punch
            .start_peer_punch(peer.local_addr().unwrap(), t0)
            .unwrap();

        punch.poll(t0);
        punch.poll(t0);
        assert_eq!(recv_all(&peer).len(), 1);

        for i in 1..PEER_PUNCH_ATTEMPTS as u32 {
            punch.poll(t0 + PEER_PUNCH_INTERVAL * i);
        }
        assert_eq!(recv_all(&peer).len(), PEER_PUNCH_ATTEMPTS - 1);
        assert_eq!(punch.pending_bursts(), 0);
    }

    #[tokio::test]
    async fn test_unanswered_punch_leaves_no_state() {
        let relay = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let relay_port = i32::from(relay.local_addr().unwrap().port());

        let mut punch = coordinator();
        punch
            .begin_relay_punch("127.0.0.1", "silent", relay_port)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(punch.process_events(PunchRole::Server, Instant::now()), 0);
        assert_eq!(punch.server_proxy_count(), 0);
        assert!(!punch.has_client_proxy());
    }

    #[tokio::test]
    async fn test_server_proxy_lifecycle() {
        let mut punch = coordinator();
        punch.ensure_socket().unwrap();
        let remote: SocketAddr = "198.51.100.7:5000".parse().unwrap();
        let t0 = Instant::now();

        punch
            .events_tx
            .send(PunchEvent::Datagram {
                from: remote,
                data: vec![1],
            })
            .unwrap();
        assert_eq!(punch.process_events(PunchRole::Server, t0), 1);
        assert_eq!(punch.server_proxy_count(), 1);

        punch
            .events_tx
            .send(PunchEvent::Datagram {
                from: remote,
                data: vec![9, 9, 9, 9],
            })
            .unwrap();
        punch.process_events(PunchRole::Server, t0 + Duration::from_secs(5));

        assert_eq!(
            punch.sweep_proxies(t0 + Duration::from_secs(14), crate::liveness::PROXY_TIMEOUT),
            0
        );
        assert_eq!(
            punch.sweep_proxies(t0 + Duration::from_secs(16), crate::liveness::PROXY_TIMEOUT),
            1
        );
        assert_eq!(punch.server_proxy_count(), 0);
    }

    #[tokio::test]
    async fn test_datagrams_from_relay_ignored() {
        let relay = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let relay_port = i32::from(relay.local_addr().unwrap().port());
        let mut punch = coordinator();
        punch.begin_relay_punch("127.0.0.1", "t", relay_port).unwrap();

        punch
            .events_tx
            .send(PunchEvent::Datagram {
                from: "127.0.0.1:4444".parse().unwrap(),
                data: vec![1],
            })
            .unwrap();
        punch.process_events(PunchRole::Server, Instant::now());
        assert_eq!(punch.server_proxy_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let mut punch = coordinator();
        punch.ensure_socket().unwrap();
        punch.open_client_proxy().unwrap();
        punch.shutdown();
        punch.shutdown();

        assert_eq!(punch.nat_port(), None);
        assert!(!punch.has_client_proxy());
        assert_eq!(punch.relay_endpoint(), None);
    }
}

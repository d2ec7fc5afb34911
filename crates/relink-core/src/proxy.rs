//! Loopback socket proxies between the direct-connect module and punched
//! peers.
//!
//! After a successful punch the remote peer talks to our punch socket, while
//! the local direct-connect module only ever talks to loopback. A proxy owns
//! one loopback UDP socket that bridges the two:
//!
//! ```text
//!   remote peer ──► punch socket ──► proxy.relay_data() ──► local module
//!   local module ──► proxy socket ──► PunchEvent::ProxyData ──► punch socket ──► remote peer
//! ```
//!
//! Inbound datagrams from the local module are never handled on the receive
//! task: they are posted to the coordinator's event queue and processed on
//! the session tick. Sends go through a non-blocking duplicate of the socket
//! so the tick never awaits.

use crate::liveness::Proxy;
use crate::punch::PunchEvent;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which side of the bridge a proxy serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKey {
    /// Host side, one per remote peer endpoint
    Server(SocketAddr),
    /// Client side, single instance
    Client,
}

/// Loopback UDP bridge
#[derive(Debug)]
pub struct SocketProxy {
    key: ProxyKey,
    sender: std::net::UdpSocket,
    target: Option<SocketAddr>,
    recv_task: Option<JoinHandle<()>>,
}

impl SocketProxy {
    /// Bind a proxy and start forwarding local datagrams into `events`.
    ///
    /// `target` is the local module endpoint; for the client side it is
    /// learned from the first datagram the module sends.
    ///
    /// # Errors
    ///
    /// Returns an error if no Tokio runtime is running or the loopback
    /// socket cannot be bound.
    pub fn bind(
        key: ProxyKey,
        bind_addr: SocketAddr,
        target: Option<SocketAddr>,
        events: mpsc::UnboundedSender<PunchEvent>,
    ) -> io::Result<Self> {
        let runtime = Handle::try_current().map_err(io::Error::other)?;
        let std_socket = std::net::UdpSocket::bind(bind_addr)?;
        std_socket.set_nonblocking(true)?;
        let sender = std_socket.try_clone()?;
        let recv_socket = {
            let _guard = runtime.enter();
            UdpSocket::from_std(std_socket)?
        };

        let recv_task = runtime.spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        let event = PunchEvent::ProxyData {
                            key,
                            from,
                            data: buf[..len].to_vec(),
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Proxy {:?} receive error: {}", key, e);
                        let _ = events.send(PunchEvent::ReceiveFailed(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(Self {
            key,
            sender,
            target,
            recv_task: Some(recv_task),
        })
    }

    /// Key this proxy was created under
    #[must_use]
    pub fn key(&self) -> ProxyKey {
        self.key
    }

    /// Local address of the proxy socket
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be determined.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.sender.local_addr()
    }

    /// Local module endpoint, if known
    #[must_use]
    pub fn target(&self) -> Option<SocketAddr> {
        self.target
    }

    /// Record the local module endpoint (client side)
    pub fn set_target(&mut self, target: SocketAddr) {
        self.target = Some(target);
    }

    /// Forward a datagram from the remote peer to the local module.
    ///
    /// Datagrams are dropped while the local endpoint is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the non-blocking send fails.
    pub fn relay_data(&self, data: &[u8]) -> io::Result<()> {
        match self.target {
            Some(target) => self.sender.send_to(data, target).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl Proxy for SocketProxy {
    fn dispose(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
    }
}

impl Drop for SocketProxy {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_datagrams_become_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let remote: SocketAddr = "203.0.113.5:4000".parse().unwrap();
        let proxy = SocketProxy::bind(
            ProxyKey::Server(remote),
            "127.0.0.1:0".parse().unwrap(),
            None,
            tx,
        )
        .unwrap();

        let module = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        module
            .send_to(b"hello", proxy.local_addr().unwrap())
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            PunchEvent::ProxyData { key, from, data } => {
                assert_eq!(key, ProxyKey::Server(remote));
                assert_eq!(from, module.local_addr().unwrap());
                assert_eq!(data, b"hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relay_data_reaches_target() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let module = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let proxy = SocketProxy::bind(
            ProxyKey::Client,
            "127.0.0.1:0".parse().unwrap(),
            Some(module.local_addr().unwrap()),
            tx,
        )
        .unwrap();

        proxy.relay_data(b"payload").unwrap();

        let mut buf = [0u8; 32];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), module.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"payload");
    }

    #[tokio::test]
    async fn test_relay_without_target_is_dropped() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let proxy =
            SocketProxy::bind(ProxyKey::Client, "127.0.0.1:0".parse().unwrap(), None, tx).unwrap();
        assert!(proxy.relay_data(b"x").is_ok());
    }

    #[tokio::test]
    async fn test_dispose_twice() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut proxy =
            SocketProxy::bind(ProxyKey::Client, "127.0.0.1:0".parse().unwrap(), None, tx).unwrap();
        proxy.dispose();
        proxy.dispose();
    }

    #[test]
    fn test_bind_outside_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = SocketProxy::bind(ProxyKey::Client, "127.0.0.1:0".parse().unwrap(), None, tx);
        assert!(result.is_err());
    }
}

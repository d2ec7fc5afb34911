//! Length-prefixed TCP relay link.
//!
//! Each frame travels as a 4-byte big-endian length followed by the frame
//! bytes. The socket is owned by a Tokio task; the session talks to it
//! through two unbounded channels so that `send` never blocks the tick.

use relink_core::{RelayTransport, TransportError, TransportEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Largest frame accepted on the link
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

/// Relay link over TCP
#[derive(Debug)]
pub struct TcpRelayTransport {
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Default for TcpRelayTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpRelayTransport {
    /// Create an idle transport
    #[must_use]
    pub fn new() -> Self {
        let (_, events_rx) = mpsc::unbounded_channel();
        Self {
            events_rx,
            outbound: None,
            task: None,
        }
    }

    /// Next event reported by the link task
    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events_rx.try_recv().ok()
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Events from the old link must not reach the session.
        let (_, events_rx) = mpsc::unbounded_channel();
        self.events_rx = events_rx;
    }
}

impl RelayTransport for TcpRelayTransport {
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        self.close();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.events_rx = events_rx;
        self.outbound = Some(outbound_tx);

        let address = address.to_string();
        self.task = Some(tokio::spawn(run_link(address, port, events_tx, outbound_rx)));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.close();
    }

    fn send(&mut self, frame: &[u8], _channel: u8) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::Other(format!(
                "frame of {} bytes exceeds {}",
                frame.len(),
                MAX_FRAME_SIZE
            )));
        }

        self.outbound
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(frame.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    fn max_packet_size(&self) -> usize {
        MAX_FRAME_SIZE
    }

    fn shutdown(&mut self) {
        self.close();
    }
}

async fn run_link(
    address: String,
    port: u16,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let stream = match TcpStream::connect((address.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(format!(
                "connect to {address}:{port} failed: {e}"
            )));
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY: {}", e);
    }
    let _ = events.send(TransportEvent::Connected);

    let (reader, writer) = stream.into_split();
    let result = tokio::select! {
        r = read_frames(reader, &events) => r,
        w = write_frames(writer, outbound) => w,
    };

    if let Err(e) = result {
        let _ = events.send(TransportEvent::Error(e.to_string()));
    }
    let _ = events.send(TransportEvent::Disconnected);
}

async fn read_frames(
    mut reader: OwnedReadHalf,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> std::io::Result<()> {
    loop {
        let len = reader.read_u32().await? as usize;
        if len == 0 || len > MAX_FRAME_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid frame length {len}"),
            ));
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;
        if events
            .send(TransportEvent::Data { frame, channel: 0 })
            .is_err()
        {
            return Ok(());
        }
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
) -> std::io::Result<()> {
    while let Some(frame) = outbound.recv().await {
        let len = u32::try_from(frame.len())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
        writer.write_u32(len).await?;
        writer.write_all(&frame).await?;
    }
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn next_event(transport: &mut TcpRelayTransport) -> TransportEvent {
        for _ in 0..200 {
            if let Some(event) = transport.poll_event() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no transport event");
    }

    #[tokio::test]
    async fn test_frames_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpRelayTransport::new();
        transport.connect("127.0.0.1", port).unwrap();
        let (mut relay, _) = listener.accept().await.unwrap();

        assert_eq!(next_event(&mut transport).await, TransportEvent::Connected);

        transport.send(&[200], 0).unwrap();
        assert_eq!(relay.read_u32().await.unwrap(), 1);
        assert_eq!(relay.read_u8().await.unwrap(), 200);

        relay.write_u32(2).await.unwrap();
        relay.write_all(&[5, 1]).await.unwrap();
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::Data {
                frame: vec![5, 1],
                channel: 0
            }
        );

        drop(relay);
        let mut event = next_event(&mut transport).await;
        if matches!(event, TransportEvent::Error(_)) {
            event = next_event(&mut transport).await;
        }
        assert_eq!(event, TransportEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = TcpRelayTransport::new();
        assert!(matches!(
            transport.send(&[1], 0),
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_drops_pending_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpRelayTransport::new();
        transport.connect("127.0.0.1", port).unwrap();
        let _ = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.disconnect();
        assert!(transport.poll_event().is_none());
    }
}

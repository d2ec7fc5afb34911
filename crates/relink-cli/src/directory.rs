//! HTTP room list and load balancer client.
//!
//! Requests run on spawned Tokio tasks; their results come back on a
//! channel the driver drains every tick and hands to the session.

use relink_core::{DirectoryEndpoint, RoomListSource};
use relink_proto::{RelayAddress, Region, Room};
use tokio::sync::mpsc;

/// Header carrying the preferred region on best-relay requests
pub const REGION_HEADER: &str = "x-Region";

/// Completed directory request
#[derive(Debug)]
pub enum DirectoryReply {
    /// Room list fetch finished
    Rooms(Result<Vec<Room>, String>),
    /// Best-relay lookup finished
    BestRelay(Result<RelayAddress, String>),
}

/// [`RoomListSource`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpRoomList {
    client: reqwest::Client,
    replies: mpsc::UnboundedSender<DirectoryReply>,
}

impl HttpRoomList {
    /// Create a source and the channel its replies arrive on
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DirectoryReply>) {
        let (replies, rx) = mpsc::unbounded_channel();
        let source = Self {
            client: reqwest::Client::new(),
            replies,
        };
        (source, rx)
    }
}

impl RoomListSource for HttpRoomList {
    fn request_rooms(&mut self, endpoint: &DirectoryEndpoint) {
        let client = self.client.clone();
        let replies = self.replies.clone();
        let url = rooms_url(endpoint);

        tokio::spawn(async move {
            let result = fetch_rooms(&client, &url).await.map_err(|e| e.to_string());
            let _ = replies.send(DirectoryReply::Rooms(result));
        });
    }

    fn request_best_relay(&mut self, endpoint: &DirectoryEndpoint, region: Region) {
        let client = self.client.clone();
        let replies = self.replies.clone();
        let url = best_relay_url(endpoint);

        tokio::spawn(async move {
            let result = fetch_best_relay(&client, &url, region)
                .await
                .map_err(|e| e.to_string());
            let _ = replies.send(DirectoryReply::BestRelay(result));
        });
    }
}

/// Room list URL for an endpoint
#[must_use]
pub fn rooms_url(endpoint: &DirectoryEndpoint) -> String {
    if endpoint.load_balanced {
        format!("http://{}:{}/api/masterlist/", endpoint.address, endpoint.port)
    } else {
        format!("http://{}:{}/api/servers", endpoint.address, endpoint.port)
    }
}

/// Best-relay URL for a load balancer
#[must_use]
pub fn best_relay_url(endpoint: &DirectoryEndpoint) -> String {
    format!("http://{}:{}/api/join/", endpoint.address, endpoint.port)
}

/// Fetch and parse a room list
///
/// # Errors
///
/// Returns an error on HTTP failure or malformed JSON.
pub async fn fetch_rooms(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<Room>> {
    tracing::debug!("GET {}", url);
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    Ok(Room::parse_list(&body)?)
}

/// Ask a load balancer for the best relay in `region`
///
/// # Errors
///
/// Returns an error on HTTP failure or malformed JSON.
pub async fn fetch_best_relay(
    client: &reqwest::Client,
    url: &str,
    region: Region,
) -> anyhow::Result<RelayAddress> {
    tracing::debug!("GET {} (region {:?})", url, region);
    let body = client
        .get(url)
        .header(REGION_HEADER, u8::from(region).to_string())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(Room::parse_relay_address(&body)?)
}

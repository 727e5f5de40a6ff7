//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dreamforge_gateway::config::GatewayConfig;
use dreamforge_gateway::http::HttpServer;
use dreamforge_gateway::lifecycle::Shutdown;
use dreamforge_gateway::proxy::{AssetProxy, UpstreamTracker, UrlValidator};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// How the mock origin serves one path.
#[derive(Clone, Default)]
pub struct MockAsset {
    pub data: Vec<u8>,
    /// Cut the first full (non-range) response after this many body bytes.
    pub truncate_first_at: Option<usize>,
    /// Cut every range response halfway through.
    pub truncate_ranges: bool,
    /// Answer with 302 to this location instead of serving data.
    pub redirect_to: Option<String>,
    /// Accept the connection and never answer.
    pub hang: bool,
    /// Pause between 1 KiB body chunks.
    pub chunk_delay: Option<Duration>,
}

impl MockAsset {
    pub fn bytes(len: usize) -> Self {
        Self {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            ..Default::default()
        }
    }
}

/// Raw-TCP asset origin that understands just enough HTTP/1.1.
pub struct MockOrigin {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockOrigin {
    pub async fn start(assets: Vec<(&str, MockAsset)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let assets: Arc<HashMap<String, MockAsset>> = Arc::new(
            assets.into_iter().map(|(path, asset)| (path.to_string(), asset)).collect(),
        );
        let full_served: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let ranges: Arc<Mutex<Vec<Option<String>>>> = Arc::default();

        let (h, r) = (hits.clone(), ranges.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let (assets, full_served, hits, ranges) =
                    (assets.clone(), full_served.clone(), h.clone(), r.clone());
                tokio::spawn(async move {
                    let _ = serve(socket, assets, full_served, hits, ranges).await;
                });
            }
        });

        Self { addr, hits, ranges }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn origin(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Range header of every request received, in order.
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.ranges.lock().unwrap().clone()
    }
}

async fn serve(
    mut socket: TcpStream,
    assets: Arc<HashMap<String, MockAsset>>,
    full_served: Arc<Mutex<HashMap<String, usize>>>,
    hits: Arc<AtomicUsize>,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    hits.fetch_add(1, Ordering::SeqCst);

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.split("\r\n");
    let target = lines.next().and_then(|l| l.split(' ').nth(1)).unwrap_or("/");
    let path = target.split('?').next().unwrap_or("/").to_string();
    let range = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());
    ranges.lock().unwrap().push(range.clone());

    let Some(asset) = assets.get(&path) else {
        return respond(&mut socket, "404 Not Found", &[], b"not found", None, None).await;
    };

    if asset.hang {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        return Ok(());
    }

    if let Some(location) = &asset.redirect_to {
        let headers = [format!("Location: {location}")];
        return respond(&mut socket, "302 Found", &headers, b"", None, None).await;
    }

    let total = asset.data.len();
    match range.as_deref().and_then(|r| parse_range(r, total)) {
        Some((start, end)) => {
            if start >= total {
                let headers = [format!("Content-Range: bytes */{total}")];
                return respond(&mut socket, "416 Range Not Satisfiable", &headers, b"", None, None).await;
            }
            let body = &asset.data[start..=end];
            let headers = [
                format!("Content-Range: bytes {start}-{end}/{total}"),
                "Accept-Ranges: bytes".to_string(),
                "Content-Type: binary/octet-stream".to_string(),
                "ETag: \"v1\"".to_string(),
            ];
            let cut = asset.truncate_ranges.then_some(body.len() / 2);
            respond(&mut socket, "206 Partial Content", &headers, body, cut, asset.chunk_delay).await
        }
        None => {
            let served = {
                let mut map = full_served.lock().unwrap();
                let count = map.entry(path.clone()).or_default();
                *count += 1;
                *count
            };
            let cut = if served == 1 { asset.truncate_first_at } else { None };
            let headers = [
                "Accept-Ranges: bytes".to_string(),
                "Content-Type: binary/octet-stream".to_string(),
                "ETag: \"v1\"".to_string(),
            ];
            respond(&mut socket, "200 OK", &headers, &asset.data, cut, asset.chunk_delay).await
        }
    }
}

/// `bytes=S-` or `bytes=S-E`, clamped to the asset.
fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => total.saturating_sub(1),
        e => e.parse::<usize>().ok()?.min(total.saturating_sub(1)),
    };
    Some((start, end))
}

async fn respond(
    socket: &mut TcpStream,
    status: &str,
    headers: &[String],
    body: &[u8],
    cut_at: Option<usize>,
    chunk_delay: Option<Duration>,
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for header in headers {
        head.push_str(header);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    socket.write_all(head.as_bytes()).await?;

    let body = &body[..cut_at.unwrap_or(body.len()).min(body.len())];
    for piece in body.chunks(1024) {
        socket.write_all(piece).await?;
        if let Some(delay) = chunk_delay {
            socket.flush().await?;
            tokio::time::sleep(delay).await;
        }
    }
    socket.flush().await?;
    socket.shutdown().await
}

/// A gateway bound to an ephemeral port, fetching from a local origin.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub tracker: UpstreamTracker,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub async fn start(origin: &MockOrigin, config: GatewayConfig) -> Self {
        let tracker = UpstreamTracker::new();
        let proxy = AssetProxy::for_origin(
            UrlValidator::with_origin(origin.origin()),
            &config.proxy,
            tracker.clone(),
        )
        .unwrap();
        let server = HttpServer::with_proxy(config, proxy, tracker.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.subscribe();
        let (_, config_updates) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let _ = server.run(listener, config_updates, server_shutdown).await;
        });

        Self { addr, tracker, shutdown }
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}/proxy", self.addr)
    }

    /// Wait until every upstream lease is released, up to `limit`.
    pub async fn wait_for_idle_upstream(&self, limit: Duration) -> u64 {
        let deadline = tokio::time::Instant::now() + limit;
        while self.tracker.active() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.tracker.active()
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(20))
        .build()
        .unwrap()
}

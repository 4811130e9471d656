//! Local mock servers for probing tests.
//!
//! [`MockProxy`] acts as a forward HTTP proxy: plain-http probes arrive as
//! absolute-form requests, so fictitious hostnames like `a.test` can be
//! probed without DNS. `CONNECT` (https through the proxy) is logged and
//! refused, which makes every https attempt fail fast and visibly.
#![allow(dead_code)]

use axum::{
    extract::{Request, State},
    http::{header::HOST, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use libsurvivor_storm::{ProxyRotator, ScanConfig};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub method: Method,
    pub host: String,
    pub path: String,
}

impl Seen {
    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }
}

type Responder = Arc<dyn Fn(&Seen) -> Response + Send + Sync>;
type Log = Arc<Mutex<Vec<Seen>>>;

pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get address");

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Server failed to start");
    });

    addr
}

#[derive(Clone)]
pub struct MockProxy {
    pub addr: SocketAddr,
    log: Log,
}

impl MockProxy {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&Seen) -> Response + Send + Sync + 'static,
    {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let responder: Responder = Arc::new(respond);
        let app = Router::new()
            .fallback(handle)
            .with_state((Arc::clone(&log), responder));
        let addr = serve(app).await;
        Self { addr, log }
    }

    /// A proxy answering every plain-http request with the same status and body.
    pub async fn fixed(status: StatusCode, body: &'static str) -> Self {
        Self::start(move |_| (status, body).into_response()).await
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.seen().iter().filter(|s| s.is_connect()).count()
    }

    pub fn gets(&self) -> usize {
        self.seen().iter().filter(|s| s.method == Method::GET).count()
    }

    pub fn rotator(&self) -> Arc<ProxyRotator> {
        Arc::new(ProxyRotator::from_list(&self.addr.to_string()).unwrap())
    }
}

async fn handle(State((log, respond)): State<(Log, Responder)>, req: Request) -> Response {
    let host = req
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();
    let seen = Seen {
        method: req.method().clone(),
        host,
        path: req.uri().path().to_string(),
    };
    log.lock().unwrap().push(seen.clone());

    if seen.is_connect() {
        return StatusCode::BAD_GATEWAY.into_response();
    }
    respond(&seen)
}

/// What a [`RawServer`] sends back for one request.
#[derive(Debug, Clone, Copy)]
pub enum RawReply {
    /// `200 OK` with the whole body; the connection stays open for reuse.
    Full(&'static str),
    /// `200 OK` announcing 100 body bytes, sending `body`, then hanging up.
    Truncated(&'static str),
}

/// A bare HTTP/1.1 server over a `TcpListener`, for behaviour axum hides:
/// connection counting and malformed bodies. Anything that is not a plain
/// `GET` (a TLS handshake, say) is dropped at once.
#[derive(Clone)]
pub struct RawServer {
    pub addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<String>>>,
}

impl RawServer {
    pub async fn start<F>(reply: F) -> Self
    where
        F: Fn(&str) -> RawReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get address");
        let server = Self {
            addr,
            accepts: Arc::new(AtomicUsize::new(0)),
            paths: Arc::new(Mutex::new(Vec::new())),
        };

        let reply = Arc::new(reply);
        let state = server.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                state.accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(state.clone().connection(stream, Arc::clone(&reply)));
            }
        });

        server
    }

    async fn connection<F>(self, mut stream: TcpStream, reply: Arc<F>)
    where
        F: Fn(&str) -> RawReply + Send + Sync + 'static,
    {
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let request = String::from_utf8_lossy(&buf[..n]);
            let Some(path) = request
                .strip_prefix("GET ")
                .and_then(|rest| rest.split(' ').next())
            else {
                return;
            };
            self.paths.lock().unwrap().push(path.to_string());

            match reply(path) {
                RawReply::Full(body) => {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    if stream.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
                RawReply::Truncated(body) => {
                    let response = format!("HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{}", body);
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                    return;
                }
            }
        }
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

pub fn config() -> ScanConfig {
    ScanConfig {
        workers: 4,
        timeout: Duration::from_secs(3),
        ..ScanConfig::default()
    }
}

pub fn lines(output: Vec<u8>) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

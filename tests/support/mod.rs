// Local provider doubles: an axum REST server and a tokio-tungstenite stream server.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response as WsResponse};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn flat_quote(symbol: &str, price: f64) -> Value {
    json!({
        "symbol": symbol,
        "price": format!("{price:.2}"),
        "changePercent": "0.50%",
        "bid": price - 0.05,
        "ask": price + 0.05,
        "volume": "1200000",
    })
}

pub fn columnar_quote(symbol: &str, last: f64, mid: f64, updated: u64) -> Value {
    json!({
        "s": "ok",
        "symbol": [symbol],
        "last": [last],
        "mid": [mid],
        "bid": [last - 0.01],
        "ask": [last + 0.01],
        "bidSize": [3],
        "askSize": [5],
        "volume": [1000],
        "updated": [updated],
    })
}

#[derive(Clone, Default)]
pub struct Hits(Arc<Mutex<AHashMap<String, u32>>>);

impl Hits {
    fn record(&self, key: &str) -> u32 {
        let mut hits = self.0.lock();
        let n = hits.entry(key.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    pub fn get(&self, key: &str) -> u32 {
        self.0.lock().get(key).copied().unwrap_or(0)
    }
}

pub struct RestServer {
    pub base_url: String,
    pub hits: Hits,
}

// GET /quote/:symbol behaves by symbol:
//   FLAKY -> 503 on the first call, then a quote
//   LIMIT -> 429, NOTE -> rate-limit note body, GONE -> 404
//   anything else -> flat quote priced 100 + call number
async fn quote(State(hits): State<Hits>, Path(symbol): Path<String>) -> Response {
    let n = hits.record(&symbol);
    match symbol.as_str() {
        "FLAKY" if n == 1 => (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response(),
        "LIMIT" => StatusCode::TOO_MANY_REQUESTS.into_response(),
        "NOTE" => Json(json!({"Note": "Thank you for using our API. 5 calls per minute."})).into_response(),
        "GONE" => (StatusCode::NOT_FOUND, "unknown symbol").into_response(),
        s => Json(flat_quote(s, 100.0 + n as f64)).into_response(),
    }
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
}

async fn search(State(hits): State<Hits>, Query(params): Query<SearchParams>) -> Json<Value> {
    hits.record("search");
    let matches: Vec<Value> = ["AAPL", "APP", "MSFT"]
        .iter()
        .filter(|s| s.to_lowercase().contains(&params.q.to_lowercase()))
        .map(|s| flat_quote(s, 50.0))
        .collect();
    Json(json!({ "bestMatches": matches }))
}

#[derive(Deserialize)]
struct BatchBody {
    symbols: Vec<String>,
}

async fn quotes(State(hits): State<Hits>, Json(body): Json<BatchBody>) -> Json<Value> {
    hits.record("bulk");
    Json(Value::Array(body.symbols.iter().map(|s| flat_quote(s, 77.0)).collect()))
}

async fn indices(State(hits): State<Hits>) -> Json<Value> {
    hits.record("indices");
    Json(json!([
        {"symbol": "^GSPC", "name": "S&P 500", "price": 5000.5, "change": 12.5, "changePercent": 0.25},
        {"symbol": "^IXIC", "name": "NASDAQ", "price": 16000.0, "change": -40.0, "changePercent": -0.25},
    ]))
}

pub async fn spawn_rest_server() -> RestServer {
    let hits = Hits::default();
    let app = Router::new()
        .route("/quote/:symbol", get(quote))
        .route("/search", get(search))
        .route("/quotes", post(quotes))
        .route("/indices/top", get(indices))
        .with_state(hits.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    RestServer { base_url: format!("http://{addr}"), hits }
}

/// One accepted streaming connection as seen by the server.
pub struct ServerConn {
    pub path: String,
    /// Text frames sent by the client; ends when the client closes.
    pub requests: mpsc::UnboundedReceiver<String>,
    /// Frames to push to the client; dropping it closes the connection.
    pub push: mpsc::UnboundedSender<String>,
}

impl ServerConn {
    pub async fn next_request(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed");
        serde_json::from_str(&text).unwrap()
    }

    pub fn send(&self, frame: Value) {
        self.push.send(frame.to_string()).unwrap();
    }
}

pub struct StreamServer {
    pub url: String,
    pub connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl StreamServer {
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }
}

pub async fn spawn_stream_server() -> StreamServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let conn_tx = conn_tx.clone();
            tokio::spawn(async move {
                let mut path = String::new();
                let record_path = |req: &Request, resp: WsResponse| {
                    path = req.uri().to_string();
                    Ok::<_, ErrorResponse>(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, record_path).await else { return };

                let (req_tx, req_rx) = mpsc::unbounded_channel();
                let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
                let _ = conn_tx.send(ServerConn { path, requests: req_rx, push: push_tx });

                let (mut write, mut read) = ws.split();
                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = req_tx.send(text);
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        out = push_rx.recv() => match out {
                            Some(text) => {
                                if write.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                let _ = write.close().await;
                                break;
                            }
                        },
                    }
                }
            });
        }
    });

    StreamServer { url: format!("ws://{addr}"), connections: conn_rx }
}

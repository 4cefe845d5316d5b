// Websocket adapter: {stream_url}/realtime?token=... via tokio-tungstenite

use super::{FrameSink, FrameStream, StreamConnector, TransportError};
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

pub struct WsConnector {
    pub stream_url: String, // e.g. "wss://stream.example.com"
    pub token: Option<String>,
}

impl WsConnector {
    pub fn new(stream_url: &str, token: Option<String>) -> Self {
        Self { stream_url: stream_url.trim_end_matches('/').to_string(), token }
    }

    pub fn endpoint(&self) -> String {
        match &self.token {
            Some(token) => format!("{}/realtime?token={}", self.stream_url, token),
            None => format!("{}/realtime", self.stream_url),
        }
    }

    // never log the token
    fn redacted_endpoint(&self) -> String {
        format!("{}/realtime", self.stream_url)
    }
}

#[async_trait::async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        let url = self.endpoint();
        let (ws_stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect { url: self.redacted_endpoint(), reason: e.to_string() })?;
        info!(url = %self.redacted_endpoint(), status = %response.status(), "streaming connection open");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

        // Only text frames carry quotes; control frames are handled by tungstenite.
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        debug!("dropping non-utf8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server sent close frame");
                    Some(Err(TransportError::Closed))
                }
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

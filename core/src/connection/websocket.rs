use crate::connection::transport::{
    CloseInfo, ConnectError, Connector, Link, LinkCommand, LinkEvent, NORMAL_CLOSURE,
};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use log::debug;
use std::borrow::Cow;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Text-frame WebSocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
}

impl WebSocketConnector {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ConnectError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConnectError::InvalidEndpoint(endpoint));
        }
        Ok(Self { endpoint })
    }
}

impl Connector for WebSocketConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>> {
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let (stream, _response) =
                connect_async(endpoint.as_str())
                    .await
                    .map_err(|err| ConnectError::Handshake {
                        endpoint: endpoint.clone(),
                        reason: err.to_string(),
                    })?;
            let (mut sink, mut source) = stream.split();
            let (link, mut written, events) = Link::pair();

            tokio::spawn(async move {
                while let Some(command) = written.recv().await {
                    match command {
                        LinkCommand::Text(text) => {
                            if let Err(err) = sink.send(Message::Text(text)).await {
                                debug!("websocket write failed: {}", err);
                                break;
                            }
                        }
                        LinkCommand::Close(info) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(info.code.unwrap_or(NORMAL_CLOSURE)),
                                reason: Cow::Owned(info.reason),
                            };
                            if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                                debug!("websocket close failed: {}", err);
                            }
                            break;
                        }
                    }
                }
            });

            tokio::spawn(async move {
                while let Some(item) = source.next().await {
                    let event = match item {
                        Ok(Message::Text(text)) => LinkEvent::Text(text),
                        Ok(Message::Binary(bytes)) => {
                            LinkEvent::Text(String::from_utf8_lossy(&bytes).into_owned())
                        }
                        Ok(Message::Close(frame)) => {
                            let info = match frame {
                                Some(frame) => CloseInfo::with_code(
                                    u16::from(frame.code),
                                    frame.reason.into_owned(),
                                ),
                                None => CloseInfo::abnormal("closed without status"),
                            };
                            let _ = events.send(LinkEvent::Closed(info));
                            return;
                        }
                        Ok(_) => continue,
                        Err(err) => {
                            let _ = events.send(LinkEvent::Error(err.to_string()));
                            return;
                        }
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                let _ = events.send(LinkEvent::Closed(CloseInfo::abnormal("stream ended")));
            });

            Ok(link)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_endpoints() {
        assert!(WebSocketConnector::new("http://127.0.0.1:5000/ws").is_err());
        let connector = WebSocketConnector::new("ws://127.0.0.1:5000/ws").unwrap();
        assert_eq!(connector.endpoint(), "ws://127.0.0.1:5000/ws");
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_the_handshake() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1/ws").unwrap();
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, ConnectError::Handshake { .. }));
    }
}

use std::pin::Pin;

use futures::StreamExt as _;
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, TransportError};
use crate::model::ConversationId;

/// Body of a streamed reply as raw byte chunks.
pub type ReplyStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Backend endpoint that opens streamed replies.
#[async_trait::async_trait]
pub trait ConversationTransport: Send + Sync {
    /// Submits `text` to a conversation and returns the streamed reply body.
    ///
    /// Dropping the returned stream must release the underlying connection.
    async fn submit_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<ReplyStream, TransportError>;
}

/// One stored message of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    messages: Vec<HistoryMessage>,
}

/// `ConversationTransport` over the Sense REST API.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        // Fail early on an unusable base URL.
        config.endpoint(&[])?;
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport from `SENSE_API_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Loads the stored messages of a conversation.
    pub async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HistoryMessage>, ClientError> {
        let url = self.config.chat_url(conversation_id.as_str())?;
        debug!(%conversation_id, "fetching conversation history");
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| TransportError::connect(format!("history request failed: {e}")))?;
        let response = ensure_success(response).await?;
        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::read(format!("invalid history body: {e}")))?;
        Ok(chat.messages)
    }
}

#[async_trait::async_trait]
impl ConversationTransport for HttpTransport {
    async fn submit_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<ReplyStream, TransportError> {
        let url = self
            .config
            .messages_url(conversation_id.as_str())
            .map_err(|e| TransportError::connect(e.to_string()))?;
        let body = serde_json::json!({ "message": { "content": text } });
        debug!(%conversation_id, %url, "opening reply stream");

        let response = self
            .authorized(self.client.post(url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::connect(format!("message request failed: {e}")))?;
        let response = ensure_success(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::read(e.to_string())));
        Ok(Box::pin(stream))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(TransportError::status(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP/1.1 response and returns the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.expect("read");
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    async fn collect(mut stream: ReplyStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[tokio::test]
    async fn submit_message_posts_json_with_bearer_token() {
        let (base_url, server) =
            serve_once("200 OK", "data: {\"content\":\"hi\"}\ndata: [DONE]\n").await;
        let transport =
            HttpTransport::new(ClientConfig::new(base_url).token("secret")).expect("transport");

        let stream = transport
            .submit_message(&ConversationId::from("chat-7"), "hello there")
            .await
            .expect("stream");
        let body = collect(stream).await;
        assert_eq!(body, b"data: {\"content\":\"hi\"}\ndata: [DONE]\n");

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /api/v1/conversations/chat-7/messages HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains(r#"{"message":{"content":"hello there"}}"#));
    }

    #[tokio::test]
    async fn non_success_status_is_status_error() {
        let (base_url, _server) = serve_once("401 Unauthorized", "token expired").await;
        let transport = HttpTransport::new(ClientConfig::new(base_url)).expect("transport");

        let err = match transport
            .submit_message(&ConversationId::from("chat-7"), "hello")
            .await
        {
            Ok(_) => panic!("401 should fail"),
            Err(err) => err,
        };
        assert_eq!(err, TransportError::status(401, "token expired"));
    }

    #[tokio::test]
    async fn request_without_token_has_no_authorization_header() {
        let (base_url, server) = serve_once("200 OK", "").await;
        let transport = HttpTransport::new(ClientConfig::new(base_url)).expect("transport");
        let stream = transport
            .submit_message(&ConversationId::from("c"), "hi")
            .await
            .expect("stream");
        assert!(collect(stream).await.is_empty());
        let request = server.await.expect("server");
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn fetch_history_decodes_messages() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"_id":"c","messages":[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]}"#,
        )
        .await;
        let transport = HttpTransport::new(ClientConfig::new(base_url)).expect("transport");
        let history = transport
            .fetch_history(&ConversationId::from("c"))
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hello");
        let request = server.await.expect("server");
        assert!(request.starts_with("GET /api/v1/chats/c HTTP/1.1"));
    }

    #[tokio::test]
    async fn connection_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let transport =
            HttpTransport::new(ClientConfig::new(format!("http://{addr}"))).expect("transport");
        let result = transport
            .submit_message(&ConversationId::from("c"), "hi")
            .await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}

//! HTTP call client for plugin endpoints over unix sockets and TCP.
//!
//! The unix path hand-frames HTTP/1.1 over a `UnixStream` with
//! `Connection: close` semantics; the TCP path goes through `reqwest`.
//! Both produce JSON request bodies and decode JSON responses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ocmr_core::error::{OcmError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// How a plugin listens for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionType {
    UnixSocket,
    Tcp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnixSocket => write!(f, "unix-socket"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Request method for a plugin endpoint call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Deadline applied to every call when the caller does not set one.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

enum Transport {
    Unix { socket_path: PathBuf },
    Tcp { base_url: String, http: reqwest::Client },
}

/// Typed client bound to a plugin's discovered transport address.
pub struct PluginClient {
    transport: Transport,
    call_timeout: Duration,
}

impl PluginClient {
    /// Client for a plugin listening on a unix domain socket.
    pub fn unix(socket_path: impl AsRef<Path>) -> Self {
        Self {
            transport: Transport::Unix {
                socket_path: socket_path.as_ref().to_path_buf(),
            },
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Client for a plugin listening on a TCP address.
    ///
    /// Accepts `host:port` or a full `http://host:port` base.
    pub fn tcp(base: &str) -> Self {
        let trimmed = base.trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        Self {
            transport: Transport::Tcp {
                base_url,
                http: reqwest::Client::new(),
            },
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call deadline. A call that has not produced a full
    /// response within the deadline fails instead of hanging on a wedged
    /// plugin.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The connection type this client dials.
    pub fn connection_type(&self) -> ConnectionType {
        match self.transport {
            Transport::Unix { .. } => ConnectionType::UnixSocket,
            Transport::Tcp { .. } => ConnectionType::Tcp,
        }
    }

    /// Begin a call against `endpoint` (e.g. `component-version/download`).
    pub fn call(&self, method: Method, endpoint: &str) -> CallBuilder<'_> {
        CallBuilder {
            client: self,
            method,
            endpoint: endpoint.trim_start_matches('/').to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Probe the plugin's `GET /healthz` endpoint.
    pub async fn healthz(&self) -> Result<()> {
        self.call(Method::Get, "healthz").send().await.map(|_| ())
    }

    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String> {
        tracing::debug!(
            endpoint = %endpoint,
            method = method.as_str(),
            connection = %self.connection_type(),
            "dispatching plugin call"
        );
        let dispatch = async {
            match &self.transport {
                Transport::Unix { socket_path } => {
                    self.execute_unix(socket_path, method, endpoint, query, headers, body)
                        .await
                }
                Transport::Tcp { base_url, http } => {
                    self.execute_tcp(base_url, http, method, endpoint, query, headers, body)
                        .await
                }
            }
        };
        match tokio::time::timeout(self.call_timeout, dispatch).await {
            Ok(result) => result,
            Err(_) => Err(OcmError::TimeoutError(format!(
                "call to {} did not complete within {:?}",
                endpoint, self.call_timeout,
            ))),
        }
    }

    /// Hand-framed HTTP/1.1 exchange over a unix socket.
    ///
    /// `Connection: close` framing: the response body is everything after
    /// the header terminator, read to EOF.
    async fn execute_unix(
        &self,
        socket_path: &Path,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String> {
        let path = build_path(endpoint, query);
        let body = body.unwrap_or("");

        let mut request = format!(
            "{} {} HTTP/1.1\r\nHost: unix\r\nConnection: close\r\n",
            method.as_str(),
            path,
        );
        for (name, value) in headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        request.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body,
        ));

        let mut stream = UnixStream::connect(socket_path).await.map_err(|e| {
            OcmError::TransportError(format!(
                "failed to connect to {}: {}",
                socket_path.display(),
                e,
            ))
        })?;

        stream.write_all(request.as_bytes()).await.map_err(|e| {
            OcmError::TransportError(format!("request write failed: {}", e))
        })?;

        let mut response = Vec::with_capacity(4096);
        let mut buf = vec![0u8; 65536];
        loop {
            let n = stream.read(&mut buf).await.map_err(|e| {
                OcmError::TransportError(format!("response read failed: {}", e))
            })?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
        }

        let response_str = String::from_utf8_lossy(&response);
        let (head, body) = response_str.split_once("\r\n\r\n").ok_or_else(|| {
            OcmError::TransportError("malformed response: no HTTP body".to_string())
        })?;

        let status = parse_status_line(head)?;
        if status != 200 {
            return Err(OcmError::TransportError(format!(
                "endpoint {} returned status {}: {}",
                endpoint,
                status,
                body.chars().take(512).collect::<String>(),
            )));
        }

        Ok(body.to_string())
    }

    async fn execute_tcp(
        &self,
        base_url: &str,
        http: &reqwest::Client,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<String> {
        let url = format!("{}/{}", base_url, endpoint);
        let mut request = match method {
            Method::Get => http.get(&url),
            Method::Post => http.post(&url),
        };
        if !query.is_empty() {
            request = request.query(query);
        }
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
            OcmError::TransportError(format!("request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            OcmError::TransportError(format!("response read from {} failed: {}", url, e))
        })?;

        if status.as_u16() != 200 {
            return Err(OcmError::TransportError(format!(
                "endpoint {} returned status {}: {}",
                endpoint,
                status.as_u16(),
                text.chars().take(512).collect::<String>(),
            )));
        }

        Ok(text)
    }
}

/// An in-flight call: payload, headers, and query parameters collected
/// before dispatch.
pub struct CallBuilder<'a> {
    client: &'a PluginClient,
    method: Method,
    endpoint: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl<'a> CallBuilder<'a> {
    /// JSON-encode `payload` as the request body.
    pub fn payload<P: Serialize>(mut self, payload: &P) -> Result<Self> {
        let body = serde_json::to_string(payload).map_err(|e| {
            OcmError::SerializationError(format!("failed to marshal call payload: {}", e))
        })?;
        self.body = Some(body);
        Ok(self)
    }

    /// Attach a header pair. Credentials go under `Authorization` as a JSON
    /// object, not a bearer token.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach credentials as a JSON object in the `Authorization` header.
    pub fn credentials<C: Serialize>(self, credentials: &C) -> Result<Self> {
        let encoded = serde_json::to_string(credentials).map_err(|e| {
            OcmError::SerializationError(format!("failed to marshal credentials: {}", e))
        })?;
        Ok(self.header("Authorization", encoded))
    }

    /// Attach a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Dispatch the call, returning the raw response body.
    pub async fn send(self) -> Result<String> {
        self.client
            .execute(
                self.method,
                &self.endpoint,
                &self.query,
                &self.headers,
                self.body.as_deref(),
            )
            .await
    }

    /// Dispatch the call and decode the JSON response body into `R`.
    pub async fn send_decode<R: DeserializeOwned>(self) -> Result<R> {
        let endpoint = self.endpoint.clone();
        let body = self.send().await?;
        serde_json::from_str(&body).map_err(|e| {
            OcmError::TransportError(format!(
                "failed to decode response from {}: {}",
                endpoint, e
            ))
        })
    }
}

/// Build `/{endpoint}?{query}` with url-encoded parameter values.
fn build_path(endpoint: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return format!("/{}", endpoint);
    }
    let mut encoded = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in query {
        encoded.append_pair(name, value);
    }
    format!("/{}?{}", endpoint, encoded.finish())
}

/// Extract the numeric status code from an HTTP/1.x status line.
fn parse_status_line(head: &str) -> Result<u16> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let proto = parts.next().unwrap_or_default();
    if !proto.starts_with("HTTP/1.") {
        return Err(OcmError::TransportError(format!(
            "malformed status line: '{}'",
            status_line
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| {
            OcmError::TransportError(format!("malformed status line: '{}'", status_line))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_path_no_query() {
        assert_eq!(build_path("healthz", &[]), "/healthz");
    }

    #[test]
    fn test_build_path_encodes_values() {
        let query = vec![
            ("name".to_string(), "test-component".to_string()),
            ("identity".to_string(), "eyJhIjoiYis9In0=".to_string()),
        ];
        let path = build_path("component-version/download", &query);
        assert!(path.starts_with("/component-version/download?"));
        assert!(path.contains("name=test-component"));
        // '=' and '+' in base64 survive as percent escapes
        assert!(path.contains("identity=eyJhIjoiYis9In0%3D"));
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK").unwrap(), 200);
        assert_eq!(parse_status_line("HTTP/1.0 404 Not Found").unwrap(), 404);
        assert!(parse_status_line("garbage").is_err());
    }

    #[test]
    fn test_tcp_base_normalization() {
        let client = PluginClient::tcp("127.0.0.1:8080");
        assert_eq!(client.connection_type(), ConnectionType::Tcp);
        let client = PluginClient::tcp("http://127.0.0.1:8080/");
        assert_eq!(client.connection_type(), ConnectionType::Tcp);
    }

    #[test]
    fn test_connection_type_wire_form() {
        let json = serde_json::to_string(&ConnectionType::UnixSocket).unwrap();
        assert_eq!(json, "\"unix-socket\"");
        let back: ConnectionType = serde_json::from_str("\"tcp\"").unwrap();
        assert_eq!(back, ConnectionType::Tcp);
    }

    #[tokio::test]
    async fn test_unix_call_nonexistent_socket() {
        let client = PluginClient::unix("/tmp/nonexistent-ocmr-test.sock");
        let result = client.healthz().await;
        assert!(matches!(result, Err(OcmError::TransportError(_))));
    }

    #[tokio::test]
    async fn test_call_times_out_on_silent_server() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("silent.sock");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
        // Accepts the connection, reads the request, never answers.
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let client = PluginClient::unix(&socket_path)
            .with_call_timeout(Duration::from_millis(100));
        let result = client.healthz().await;
        assert!(matches!(result, Err(OcmError::TimeoutError(_))));
    }
}

//! Real HTTP transports that cassettes sit in front of
//!
//! Two shapes of client are supported: a [`Transport`] sends a whole request
//! and returns the response, a [`Connection`] is bound to one host and splits
//! the exchange into `request` and `get_response` calls.

use std::time::Duration;

use bytes::Buf;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::ext::ReasonPhrase;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Request, StatusCode, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::fingerprint::{RequestParts, Scheme};
use crate::response::RawResponse;
use crate::{CassetteError, Result};

/// Outgoing request as seen by the interception layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Protocol namespace
    pub scheme: Scheme,
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
    /// HTTP method
    pub method: String,
    /// Request target: path, query and fragment
    pub url: String,
    /// Request headers, `None` when the caller sent none
    pub headers: Option<Vec<(String, String)>>,
    /// Request body, `None` when the caller sent none
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Create a request without headers or body
    pub fn new(
        scheme: Scheme,
        method: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        url: impl Into<String>,
    ) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            method: method.into(),
            url: url.into(),
            headers: None,
            body: None,
        }
    }

    /// Plain HTTP `GET` on the default port
    pub fn get(host: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(Scheme::Http, "GET", host, Scheme::Http.default_port(), url)
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Borrowed view used for fingerprinting
    pub fn parts(&self) -> RequestParts<'_> {
        RequestParts {
            scheme: self.scheme,
            method: &self.method,
            host: &self.host,
            port: self.port,
            url: &self.url,
            headers: self.headers.as_deref(),
            body: self.body.as_deref(),
        }
    }

    /// Absolute URI without the fragment, which never goes on the wire
    pub fn uri(&self) -> String {
        let target = self.url.split('#').next().unwrap_or_default();
        let target = if target.starts_with('/') {
            target.to_string()
        } else {
            format!("/{target}")
        };
        format!("{}://{}:{}{target}", self.scheme, self.host, self.port)
    }
}

/// Client that performs a whole request in one call
pub trait Transport: Send {
    /// Send `request` and return the response with its body unread
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying client fails with
    fn send(&mut self, request: &HttpRequest) -> Result<RawResponse>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, request: &HttpRequest) -> Result<RawResponse> {
        (**self).send(request)
    }
}

/// Client bound to one host that sends a request and reads the reply separately
pub trait Connection {
    /// Protocol of the connection
    fn scheme(&self) -> Scheme;

    /// Host the connection talks to
    fn host(&self) -> &str;

    /// Port the connection talks to
    fn port(&self) -> u16;

    /// Send a request
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent
    fn request(
        &mut self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: Option<&[(String, String)]>,
    ) -> Result<()>;

    /// Read the response to the last request
    ///
    /// # Errors
    ///
    /// Returns error if no request was sent or the response cannot be read
    fn get_response(&mut self) -> Result<RawResponse>;
}

/// [`Connection`] that hands each request to a [`Transport`]
pub struct TransportConnection<T> {
    scheme: Scheme,
    host: String,
    port: u16,
    transport: T,
    pending: Option<HttpRequest>,
}

impl<T: Transport> TransportConnection<T> {
    /// Bind `transport` to a host
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16, transport: T) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            transport,
            pending: None,
        }
    }

    /// The wrapped transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Connection for TransportConnection<T> {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn request(
        &mut self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: Option<&[(String, String)]>,
    ) -> Result<()> {
        let mut request = HttpRequest::new(self.scheme, method, &self.host, self.port, url);
        request.headers = headers.map(<[_]>::to_vec);
        request.body = body.map(<[u8]>::to_vec);
        self.pending = Some(request);
        Ok(())
    }

    fn get_response(&mut self) -> Result<RawResponse> {
        let request = self
            .pending
            .take()
            .ok_or_else(|| CassetteError::Transport("No request was sent".to_string()))?;
        self.transport.send(&request)
    }
}

/// Blocking HTTP/1 transport over a pooled hyper client
///
/// Runs its own current-thread tokio runtime, so it must not be used from
/// inside another runtime. Only plain `http` is supported.
pub struct HyperTransport {
    runtime: tokio::runtime::Runtime,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HyperTransport {
    /// Create a transport with its own runtime
    ///
    /// # Errors
    ///
    /// Returns error if the runtime cannot be started
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Ok(Self { runtime, client })
    }

    async fn execute(
        client: &Client<HttpConnector, Full<Bytes>>,
        request: Request<Full<Bytes>>,
    ) -> Result<RawResponse> {
        let response = client.request(request).await.map_err(|e| {
            warn!("Request failed: {e}");
            CassetteError::Transport(format!("Request failed: {e}"))
        })?;

        let status = response.status();
        let version = if response.version() == Version::HTTP_10 {
            10
        } else if response.version() == Version::HTTP_2 {
            20
        } else {
            11
        };
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), header_text(name, value)))
            .collect();
        let reason = reason_phrase(status, response.extensions().get::<ReasonPhrase>());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| CassetteError::Transport(format!("Failed to read response body: {e}")))?
            .to_bytes();

        Ok(RawResponse {
            status: status.as_u16(),
            reason,
            version,
            headers,
            body: Box::new(body.reader()),
        })
    }
}

/// Reason phrase as sent by the server, canonical one when hyper kept none
fn reason_phrase(status: StatusCode, sent: Option<&ReasonPhrase>) -> String {
    match sent {
        Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    }
}

fn header_text(name: &HeaderName, value: &HeaderValue) -> String {
    match value.to_str() {
        Ok(text) => text.to_string(),
        Err(_) => {
            let text = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if text.as_bytes() != value.as_bytes() {
                warn!("Header '{}' is not valid UTF-8, recorded as '{}'", name, text);
            }
            text
        }
    }
}

impl Transport for HyperTransport {
    fn send(&mut self, request: &HttpRequest) -> Result<RawResponse> {
        if request.scheme == Scheme::Https {
            return Err(CassetteError::Transport(format!(
                "HTTPS is not supported by HyperTransport: {}",
                request.uri()
            )));
        }

        let uri = request
            .uri()
            .parse::<Uri>()
            .map_err(|e| CassetteError::Transport(format!("Invalid URI '{}': {e}", request.uri())))?;
        let method = request.method.parse::<Method>().map_err(|e| {
            CassetteError::Transport(format!("Invalid HTTP method '{}': {e}", request.method))
        })?;

        debug!("Sending {} {}", method, uri);

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in request.headers.iter().flatten() {
            builder = builder.header(name, value);
        }
        let http_request = builder
            .body(Full::new(Bytes::from(request.body.clone().unwrap_or_default())))
            .map_err(|e| CassetteError::Transport(format!("Failed to build request: {e}")))?;

        let client = &self.client;
        self.runtime.block_on(Self::execute(client, http_request))
    }
}

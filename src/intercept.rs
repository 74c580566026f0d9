//! Interception layer: replay recorded responses, record the rest
//!
//! One [`Interceptor`] is shared by every client wrapper of a session, so the
//! low-level [`CassetteConnection`] and the pooled [`CassetteClient`] see the
//! same fixture store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::Mode;
use crate::fingerprint::{Fingerprint, Scheme};
use crate::response::{RawResponse, StoredResponse};
use crate::store::{FixtureStore, StoreStats};
use crate::transport::{Connection, HttpRequest, Transport};
use crate::{CassetteError, Result};

/// Fixture store shared between client wrappers
pub type SharedStore = Arc<Mutex<Box<dyn FixtureStore>>>;

/// How a request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the cassette without a real call
    Replayed,
    /// Sent to the real transport and captured
    Recorded,
}

/// Resolved request
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Fingerprint the request was looked up under
    pub fingerprint: Fingerprint,
    /// How it was resolved
    pub outcome: Outcome,
    /// Response handed to the caller
    pub response: StoredResponse,
}

/// Result of looking a request up in the cassette
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A recorded response exists
    Hit(Fingerprint, StoredResponse),
    /// Nothing is recorded; the request may go to the network
    Miss(Fingerprint),
}

/// Session-wide interception logic
#[derive(Clone)]
pub struct Interceptor {
    store: SharedStore,
    mode: Mode,
}

impl Interceptor {
    /// Wrap a store
    pub fn new(store: Box<dyn FixtureStore>, mode: Mode) -> Self {
        Self::from_shared(Arc::new(Mutex::new(store)), mode)
    }

    /// Share an already wrapped store
    pub fn from_shared(store: SharedStore, mode: Mode) -> Self {
        Self { store, mode }
    }

    /// Interception mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The shared store
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Lock the store; a panic in another holder does not make it unusable
    pub fn lock_store(&self) -> MutexGuard<'_, Box<dyn FixtureStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lookup counters of the store
    pub fn stats(&self) -> StoreStats {
        self.lock_store().stats()
    }

    /// Fingerprint `request` with the store's layout
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the request has no method or host
    pub fn fingerprint(&self, request: &HttpRequest) -> Result<Fingerprint> {
        let options = self.lock_store().fingerprint_options();
        Fingerprint::from_request(&request.parts(), &options)
    }

    /// Look `request` up in the cassette
    ///
    /// A miss in [`Mode::NoNetwork`] is an error, so callers never reach the
    /// real transport in that mode.
    ///
    /// # Errors
    ///
    /// Returns [`CassetteError::AttemptedConnection`] for a miss without
    /// network, or any store error
    pub fn lookup(&self, request: &HttpRequest) -> Result<Lookup> {
        let mut store = self.lock_store();
        let fingerprint = Fingerprint::from_request(&request.parts(), &store.fingerprint_options())?;

        if store.contains(&fingerprint)? {
            match store.get(&fingerprint) {
                Ok(response) => return Ok(Lookup::Hit(fingerprint, response)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        match self.mode {
            Mode::Record => {
                warn!("Making external HTTP request: {}", fingerprint);
                Ok(Lookup::Miss(fingerprint))
            }
            Mode::NoNetwork => Err(CassetteError::AttemptedConnection(format!(
                "Attempted to connect to {}:{} with no real network: {fingerprint}",
                request.host, request.port
            ))),
        }
    }

    /// Capture a real response under `fingerprint`
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be read
    pub fn record(&self, fingerprint: Fingerprint, raw: RawResponse) -> Result<StoredResponse> {
        debug!("Recording '{}'", fingerprint);
        self.lock_store().put(fingerprint, raw)
    }

    /// Resolve `request`, calling `forward` only when it must go to the network
    ///
    /// The store is not locked while `forward` runs.
    ///
    /// # Errors
    ///
    /// Returns lookup errors, and errors from `forward` unchanged
    pub fn intercept<F>(&self, request: &HttpRequest, forward: F) -> Result<Exchange>
    where
        F: FnOnce(&HttpRequest) -> Result<RawResponse>,
    {
        match self.lookup(request)? {
            Lookup::Hit(fingerprint, response) => Ok(Exchange {
                fingerprint,
                outcome: Outcome::Replayed,
                response,
            }),
            Lookup::Miss(fingerprint) => {
                let raw = forward(request)?;
                let response = self.record(fingerprint.clone(), raw)?;
                Ok(Exchange {
                    fingerprint,
                    outcome: Outcome::Recorded,
                    response,
                })
            }
        }
    }
}

/// Pooled client wrapper: a [`Transport`] that goes through the cassette
pub struct CassetteClient<T> {
    interceptor: Interceptor,
    inner: T,
}

impl<T: Transport> CassetteClient<T> {
    /// Put `inner` behind `interceptor`
    pub fn new(interceptor: Interceptor, inner: T) -> Self {
        Self { interceptor, inner }
    }

    /// Resolve `request` and report how
    ///
    /// # Errors
    ///
    /// Returns interception errors and real transport errors unchanged
    pub fn exchange(&mut self, request: &HttpRequest) -> Result<Exchange> {
        let inner = &mut self.inner;
        self.interceptor
            .intercept(request, |request| inner.send(request))
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for CassetteClient<T> {
    fn send(&mut self, request: &HttpRequest) -> Result<RawResponse> {
        Ok(self.exchange(request)?.response.to_raw())
    }
}

enum Pending {
    Replay(StoredResponse),
    Record(Fingerprint),
}

/// Low-level connection wrapper
///
/// `request` decides between replay and a real call; on a miss the request
/// is sent on the wrapped connection at once and `get_response` captures
/// its reply.
pub struct CassetteConnection<C> {
    interceptor: Interceptor,
    inner: C,
    pending: Option<Pending>,
}

impl<C: Connection> CassetteConnection<C> {
    /// Put `inner` behind `interceptor`
    pub fn new(interceptor: Interceptor, inner: C) -> Self {
        Self {
            interceptor,
            inner,
            pending: None,
        }
    }

    /// The wrapped connection
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Connection> Connection for CassetteConnection<C> {
    fn scheme(&self) -> Scheme {
        self.inner.scheme()
    }

    fn host(&self) -> &str {
        self.inner.host()
    }

    fn port(&self) -> u16 {
        self.inner.port()
    }

    fn request(
        &mut self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        headers: Option<&[(String, String)]>,
    ) -> Result<()> {
        let mut request = HttpRequest::new(self.scheme(), method, self.host(), self.port(), url);
        request.headers = headers.map(<[_]>::to_vec);
        request.body = body.map(<[u8]>::to_vec);

        self.pending = None;
        match self.interceptor.lookup(&request)? {
            Lookup::Hit(_, response) => {
                self.pending = Some(Pending::Replay(response));
            }
            Lookup::Miss(fingerprint) => {
                self.inner.request(method, url, body, headers)?;
                self.pending = Some(Pending::Record(fingerprint));
            }
        }
        Ok(())
    }

    fn get_response(&mut self) -> Result<RawResponse> {
        match self.pending.take() {
            Some(Pending::Replay(response)) => Ok(response.to_raw()),
            Some(Pending::Record(fingerprint)) => {
                let raw = self.inner.get_response()?;
                Ok(self.interceptor.record(fingerprint, raw)?.to_raw())
            }
            None => Err(CassetteError::Transport("No request was sent".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ContentCache;
    use crate::codec::Format;
    use crate::fingerprint::FingerprintOptions;
    use crate::store::DirectoryStore;
    use crate::transport::TransportConnection;
    use std::io::Read;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counting {
        calls: usize,
    }

    impl Transport for Counting {
        fn send(&mut self, request: &HttpRequest) -> Result<RawResponse> {
            self.calls += 1;
            let status = if request.url == "/missing" { 404 } else { 200 };
            Ok(RawResponse::from_bytes(
                status,
                "",
                vec![("Content-Type".to_string(), "text/plain".to_string())],
                format!("call {}", self.calls),
            ))
        }
    }

    fn interceptor(temp_dir: &TempDir, mode: Mode) -> Interceptor {
        let store = DirectoryStore::new(
            temp_dir.path().join("cassette"),
            Format::Json,
            FingerprintOptions::HASHED,
            Arc::new(ContentCache::new()),
            false,
        );
        Interceptor::new(Box::new(store), mode)
    }

    fn read(mut raw: RawResponse) -> String {
        let mut body = String::new();
        raw.body.read_to_string(&mut body).unwrap();
        body
    }

    #[test]
    fn test_miss_records_then_hit_replays() {
        let temp_dir = TempDir::new().unwrap();
        let mut client = CassetteClient::new(interceptor(&temp_dir, Mode::Record), Counting::default());
        let request = HttpRequest::get("example.com", "/index");

        let first = client.exchange(&request).unwrap();
        assert_eq!(first.outcome, Outcome::Recorded);

        let second = client.exchange(&request).unwrap();
        assert_eq!(second.outcome, Outcome::Replayed);
        assert_eq!(second.response, first.response);
        assert_eq!(client.inner().calls, 1);
    }

    #[test]
    fn test_fingerprint_uses_store_layout() {
        let temp_dir = TempDir::new().unwrap();
        let interceptor = interceptor(&temp_dir, Mode::Record);
        let request = HttpRequest::get("example.com", "/search?q=1");

        let fingerprint = interceptor.fingerprint(&request).unwrap();
        assert!(fingerprint.as_str().starts_with("http:GET example.com:80/search "));
        assert!(!fingerprint.as_str().contains("q=1"));
    }

    #[test]
    fn test_no_network_miss() {
        let temp_dir = TempDir::new().unwrap();
        let interceptor = interceptor(&temp_dir, Mode::NoNetwork);
        let mut client = CassetteClient::new(interceptor.clone(), Counting::default());

        let result = client.send(&HttpRequest::get("example.com", "/index"));

        assert!(matches!(result, Err(CassetteError::AttemptedConnection(_))));
        assert_eq!(client.inner().calls, 0);
        assert!(!interceptor.lock_store().is_dirty());
    }

    #[test]
    fn test_error_status_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let mut client = CassetteClient::new(interceptor(&temp_dir, Mode::Record), Counting::default());
        let request = HttpRequest::get("example.com", "/missing");

        assert_eq!(client.send(&request).unwrap().status, 404);
        assert_eq!(client.send(&request).unwrap().status, 404);
        assert_eq!(client.inner().calls, 1);
    }

    #[test]
    fn test_forward_error_is_not_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let interceptor = interceptor(&temp_dir, Mode::Record);

        let result = interceptor.intercept(&HttpRequest::get("example.com", "/"), |_| {
            Err(CassetteError::Transport("connection refused".to_string()))
        });

        assert!(matches!(result, Err(CassetteError::Transport(_))));
        assert!(!interceptor.lock_store().is_dirty());
    }

    #[test]
    fn test_connection_and_client_share_store() {
        let temp_dir = TempDir::new().unwrap();
        let interceptor = interceptor(&temp_dir, Mode::Record);

        let mut connection = CassetteConnection::new(
            interceptor.clone(),
            TransportConnection::new(Scheme::Http, "example.com", 80, Counting::default()),
        );
        connection.request("GET", "/index", None, None).unwrap();
        assert_eq!(read(connection.get_response().unwrap()), "call 1");

        let mut client = CassetteClient::new(interceptor.clone(), Counting::default());
        let raw = client.send(&HttpRequest::get("example.com", "/index")).unwrap();

        assert_eq!(read(raw), "call 1");
        assert_eq!(client.inner().calls, 0);
        assert_eq!(connection.inner().transport().calls, 1);
        assert_eq!(interceptor.stats(), StoreStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_connection_no_network_skips_inner_request() {
        let temp_dir = TempDir::new().unwrap();
        let mut connection = CassetteConnection::new(
            interceptor(&temp_dir, Mode::NoNetwork),
            TransportConnection::new(Scheme::Http, "example.com", 80, Counting::default()),
        );

        let result = connection.request("GET", "/index", None, None);

        assert!(matches!(result, Err(CassetteError::AttemptedConnection(_))));
        assert!(connection.get_response().is_err());
        assert_eq!(connection.inner().transport().calls, 0);
    }
}

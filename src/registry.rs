//! Process-wide cassette registry
//!
//! Application code that cannot be handed an [`Interceptor`] wraps its
//! transport in [`Intercepted`], which consults whatever cassette is
//! installed here. At most one cassette is installed at a time.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::intercept::Interceptor;
use crate::response::RawResponse;
use crate::transport::{HttpRequest, Transport};
use crate::{CassetteError, Result};

static ACTIVE: Mutex<Option<Interceptor>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Interceptor>> {
    ACTIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof of installation; dropping it uninstalls the cassette
#[must_use = "dropping the token uninstalls the cassette immediately"]
#[derive(Debug)]
pub struct InstallToken {
    _private: (),
}

impl Drop for InstallToken {
    fn drop(&mut self) {
        debug!("Uninstalling cassette");
        slot().take();
    }
}

/// Install `interceptor` for the whole process
///
/// # Errors
///
/// Returns a configuration error if a cassette is already installed
pub fn install(interceptor: Interceptor) -> Result<InstallToken> {
    let mut active = slot();
    if active.is_some() {
        return Err(CassetteError::Config(
            "A cassette is already installed".to_string(),
        ));
    }

    debug!("Installing cassette ({:?})", interceptor.mode());
    *active = Some(interceptor);
    Ok(InstallToken { _private: () })
}

/// The installed interceptor, if any
pub fn active() -> Option<Interceptor> {
    slot().clone()
}

/// Whether a cassette is installed
pub fn is_installed() -> bool {
    slot().is_some()
}

/// Transport that goes through the installed cassette, or straight to the
/// network when none is installed
pub struct Intercepted<T> {
    inner: T,
}

impl<T: Transport> Intercepted<T> {
    /// Wrap `inner`
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwrap
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for Intercepted<T> {
    fn send(&mut self, request: &HttpRequest) -> Result<RawResponse> {
        // The registry lock is released before any network call.
        match active() {
            Some(interceptor) => {
                let inner = &mut self.inner;
                let exchange = interceptor.intercept(request, |request| inner.send(request))?;
                Ok(exchange.response.to_raw())
            }
            None => self.inner.send(request),
        }
    }
}

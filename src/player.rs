//! Session control: insert a cassette, play it, eject it
//!
//! A [`PlayGuard`] owns the session. Ejecting it, explicitly or by dropping
//! it, uninstalls the cassette from the registry and flushes the store if
//! anything was recorded.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::cache::ContentCache;
use crate::config::{Mode, PlayerConfig};
use crate::intercept::{CassetteClient, Interceptor};
use crate::registry::{self, InstallToken};
use crate::store::{self, StoreStats};
use crate::transport::Transport;
use crate::Result;

/// Plays one cassette path
#[derive(Debug, Clone)]
pub struct Player {
    path: PathBuf,
    config: PlayerConfig,
    cache: Arc<ContentCache>,
}

impl Player {
    /// Create a player backed by the process-wide content cache
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid
    pub fn new(path: impl Into<PathBuf>, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            path: path.into(),
            config,
            cache: ContentCache::global(),
        })
    }

    /// Use `cache` instead of the process-wide one
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Cassette path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Player configuration
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Start a session; requests go through [`PlayGuard::interceptor`]
    ///
    /// `only_recorded` in the configuration turns any mode into
    /// [`Mode::NoNetwork`].
    ///
    /// # Errors
    ///
    /// Returns store construction errors
    pub fn play(&self, mode: Mode) -> Result<PlayGuard> {
        let store = store::open(&self.path, &self.config, Arc::clone(&self.cache))?;
        let mode = self.config.effective_mode(mode);
        info!("Playing cassette '{}' ({:?})", store.path().display(), mode);

        Ok(PlayGuard {
            interceptor: Interceptor::new(store, mode),
            token: None,
            ejected: false,
        })
    }

    /// Start a session and install it in the process-wide registry
    ///
    /// # Errors
    ///
    /// Returns store construction errors, or a configuration error if
    /// another cassette is installed
    pub fn play_global(&self, mode: Mode) -> Result<PlayGuard> {
        let mut guard = self.play(mode)?;
        guard.token = Some(registry::install(guard.interceptor.clone())?);
        Ok(guard)
    }
}

/// A playing session
#[must_use = "dropping the guard ejects the cassette"]
pub struct PlayGuard {
    interceptor: Interceptor,
    token: Option<InstallToken>,
    ejected: bool,
}

impl PlayGuard {
    /// Interceptor to hand to client wrappers
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Wrap a transport so it goes through this session
    pub fn client<T: Transport>(&self, transport: T) -> CassetteClient<T> {
        CassetteClient::new(self.interceptor.clone(), transport)
    }

    /// Lookup counters so far
    pub fn stats(&self) -> StoreStats {
        self.interceptor.stats()
    }

    /// Write the recorded entries never looked up, one per line
    ///
    /// Writes nothing unless `log_cassette_used` is enabled.
    ///
    /// # Errors
    ///
    /// Returns error if the cassette cannot be listed or `out` fails
    pub fn report_unused(&self, out: &mut impl Write) -> Result<()> {
        let unused = self.interceptor.lock_store().unused()?;
        out.write_all(unused.join("\n").as_bytes())?;
        Ok(())
    }

    /// End the session and flush the store if it is dirty
    ///
    /// # Errors
    ///
    /// Returns flush errors unchanged
    pub fn eject(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.ejected {
            return Ok(());
        }
        self.ejected = true;
        self.token.take();

        let mut store = self.interceptor.lock_store();
        if store.is_dirty() {
            store.flush()?;
        }
        Ok(())
    }
}

impl Drop for PlayGuard {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("Failed to save cassette: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::serial;
    use crate::response::RawResponse;
    use crate::transport::HttpRequest;
    use crate::CassetteError;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Counting {
        calls: usize,
    }

    impl Transport for Counting {
        fn send(&mut self, _request: &HttpRequest) -> Result<RawResponse> {
            self.calls += 1;
            Ok(RawResponse::from_bytes(200, "OK", vec![], "hello world"))
        }
    }

    fn player(path: PathBuf, config: PlayerConfig) -> Player {
        Player::new(path, config)
            .unwrap()
            .with_cache(Arc::new(ContentCache::new()))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PlayerConfig {
            file_format: Some("xml".to_string()),
            ..PlayerConfig::default()
        };
        assert!(matches!(
            Player::new("cassette", config),
            Err(CassetteError::Config(_))
        ));
    }

    #[test]
    fn test_eject_flushes_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cassette.yaml");
        let player = player(path.clone(), PlayerConfig::default());

        let guard = player.play(Mode::Record).unwrap();
        guard
            .client(Counting::default())
            .send(&HttpRequest::get("example.com", "/index"))
            .unwrap();
        assert!(!path.exists());

        guard.eject().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_drop_flushes_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("cassette");
        let player = player(dir.clone(), PlayerConfig::default());

        {
            let guard = player.play(Mode::Record).unwrap();
            guard
                .client(Counting::default())
                .send(&HttpRequest::get("example.com", "/index"))
                .unwrap();
        }

        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
    }

    #[test]
    fn test_replay_only_session_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cassette.json");
        let player = player(path.clone(), PlayerConfig::default());

        let guard = player.play(Mode::NoNetwork).unwrap();
        let result = guard
            .client(Counting::default())
            .send(&HttpRequest::get("example.com", "/index"));
        assert!(matches!(result, Err(CassetteError::AttemptedConnection(_))));
        guard.eject().unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn test_only_recorded_forces_no_network() {
        let temp_dir = TempDir::new().unwrap();
        let config = PlayerConfig {
            only_recorded: true,
            ..PlayerConfig::default()
        };
        let player = player(temp_dir.path().join("cassette"), config);

        let guard = player.play(Mode::Record).unwrap();
        assert_eq!(guard.interceptor().mode(), Mode::NoNetwork);
    }

    #[test]
    fn test_play_global_installs_until_eject() {
        let _serial = serial();
        let temp_dir = TempDir::new().unwrap();
        let player = player(temp_dir.path().join("cassette"), PlayerConfig::default());

        let guard = player.play_global(Mode::Record).unwrap();
        assert!(registry::is_installed());
        assert!(player.play_global(Mode::Record).is_err());

        guard.eject().unwrap();
        assert!(!registry::is_installed());
    }

    #[test]
    fn test_report_unused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cassette.json");
        let config = PlayerConfig {
            log_cassette_used: true,
            ..PlayerConfig::default()
        };
        let player = player(path, config);

        let guard = player.play(Mode::Record).unwrap();
        let mut client = guard.client(Counting::default());
        client.send(&HttpRequest::get("example.com", "/used")).unwrap();
        client.send(&HttpRequest::get("example.com", "/unused")).unwrap();
        guard.eject().unwrap();

        let guard = player.play(Mode::NoNetwork).unwrap();
        guard
            .client(Counting::default())
            .send(&HttpRequest::get("example.com", "/used"))
            .unwrap();

        let mut report = Vec::new();
        guard.report_unused(&mut report).unwrap();
        assert_eq!(
            String::from_utf8(report).unwrap(),
            "http:GET example.com:80/unused"
        );
    }
}

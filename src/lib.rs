//! Cassette - record and replay HTTP responses for deterministic tests
//!
//! The first run of a test performs real HTTP requests and stores the
//! responses in a cassette, either one file or a directory of fixture files.
//! Later runs replay them without touching the network.
//!
//! ```no_run
//! use cassette::{HttpRequest, HyperTransport, Mode, Player, PlayerConfig, Transport};
//!
//! # fn main() -> cassette::Result<()> {
//! let player = Player::new("tests/fixtures/responses", PlayerConfig::default())?;
//! let session = player.play(Mode::Record)?;
//! let mut client = session.client(HyperTransport::new()?);
//! let response = client.send(&HttpRequest::get("localhost", "/index"))?;
//! assert_eq!(response.status, 200);
//! session.eject()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod intercept;
pub mod player;
pub mod registry;
pub mod response;
pub mod store;
pub mod transport;

pub use cache::ContentCache;
pub use codec::Format;
pub use config::{Mode, PlayerConfig};
pub use error::{CassetteError, Result};
pub use fingerprint::{Fingerprint, FingerprintOptions, Scheme};
pub use intercept::{CassetteClient, CassetteConnection, Interceptor, Outcome};
pub use player::{PlayGuard, Player};
pub use response::{RawResponse, StoredResponse};
pub use store::{FixtureStore, StoreStats};
pub use transport::{Connection, HttpRequest, HyperTransport, Transport};

//! Pluggable service discovery.
//!
//! A [`NameService`] maps a service name to the set of provider addresses
//! registered for it. Registration is additive; lookup returns one address
//! picked by a [`SelectionStrategy`] (uniformly at random by default).
//!
//! Variants are chosen by URI scheme:
//!
//! | Scheme    | Variant                  | Backing store                  |
//! |-----------|--------------------------|--------------------------------|
//! | `sqlite:` | [`SqliteNameService`]    | SQLite file or `sqlite::memory:` |
//! | `memory:` | [`MemoryNameService`]    | process-local map              |

pub mod memory;
pub mod sqlite;

pub use memory::MemoryNameService;
pub use sqlite::SqliteNameService;

use crate::{Result, RpcError};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use url::Url;

/// Directory of service name to provider addresses.
#[async_trait]
pub trait NameService: Send + Sync {
    /// URI schemes this variant accepts in [`connect`](NameService::connect).
    fn supported_schemes(&self) -> &[&'static str];

    /// Open the backing store, running any one-time initialization.
    ///
    /// Connecting again replaces the previous connection.
    async fn connect(&self, uri: &Url) -> Result<()>;

    /// Add `address` to the providers of `name`. Re-registering the same
    /// pair is a no-op.
    async fn register_service(&self, name: &str, address: &Url) -> Result<()>;

    /// Every address registered for `name` (possibly empty).
    async fn lookup_all(&self, name: &str) -> Result<Vec<Url>>;

    /// One registered address for `name`, or [`RpcError::NameNotFound`].
    async fn lookup_service(&self, name: &str) -> Result<Url>;

    /// Remove one registration. Returns whether it existed.
    async fn unregister_service(&self, name: &str, address: &Url) -> Result<bool>;

    /// Release the backing store. Safe to call repeatedly.
    async fn close(&self);

    fn supports(&self, uri: &Url) -> bool {
        self.supported_schemes().contains(&uri.scheme())
    }
}

/// Picks one address among the providers of a name.
pub trait SelectionStrategy: Send + Sync {
    fn select<'a>(&self, name: &str, candidates: &'a [Url]) -> Option<&'a Url>;
}

/// Uniform, stateless random choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelection;

impl SelectionStrategy for RandomSelection {
    fn select<'a>(&self, _name: &str, candidates: &'a [Url]) -> Option<&'a Url> {
        candidates.choose(&mut rand::rng())
    }
}

/// Apply `strategy` to `candidates`, failing with `NameNotFound` when empty.
pub(crate) fn select_address(
    strategy: &dyn SelectionStrategy,
    name: &str,
    candidates: &[Url],
) -> Result<Url> {
    strategy
        .select(name, candidates)
        .cloned()
        .ok_or_else(|| RpcError::NameNotFound {
            name: name.to_string(),
        })
}

/// Reject URIs whose scheme `service` does not handle.
pub(crate) fn check_scheme(service: &dyn NameService, uri: &Url) -> Result<()> {
    if service.supports(uri) {
        Ok(())
    } else {
        Err(RpcError::UnsupportedScheme {
            uri: uri.to_string(),
        })
    }
}

//! Component loader.
//!
//! A [`ComponentContext`] is an explicit registration table from an abstract
//! component kind (a trait object type such as `dyn NameService`, or a
//! concrete type such as [`ServiceProviderRegistry`]) to the implementations
//! available for it. Whoever composes an [`AccessPoint`](crate::AccessPoint)
//! passes the context in; there is no global registry.
//!
//! # Example
//!
//! ```rust
//! use minirpc::components::{ComponentContext, Lifecycle};
//! use minirpc::nameservice::{MemoryNameService, NameService};
//! use std::sync::Arc;
//!
//! let mut context = ComponentContext::new();
//! context.register::<dyn NameService>("memory", Lifecycle::Singleton, || {
//!     Arc::new(MemoryNameService::new())
//! });
//!
//! let a = context.load::<dyn NameService>().unwrap();
//! let b = context.load::<dyn NameService>().unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```

use crate::client::{DynamicStubFactory, StubFactory};
use crate::nameservice::{MemoryNameService, NameService, SqliteNameService};
use crate::server::ServiceProviderRegistry;
use crate::transport::{TcpTransportClient, TcpTransportServer, TransportClient, TransportServer};
use crate::{Result, RpcError};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// How often an implementation is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// A new instance per load.
    Fresh,
    /// One instance per implementation, shared by every load.
    Singleton,
}

type Factory<K> = Arc<dyn Fn() -> Arc<K> + Send + Sync>;

struct Registration {
    implementation: &'static str,
    lifecycle: Lifecycle,
    /// A `Factory<K>` for the kind this registration is filed under.
    factory: Box<dyn Any + Send + Sync>,
}

/// Registration table of component implementations.
#[derive(Default)]
pub struct ComponentContext {
    registrations: HashMap<TypeId, Vec<Registration>>,
    singletons: Mutex<HashMap<(TypeId, &'static str), Box<dyn Any + Send + Sync>>>,
}

impl ComponentContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with the built-in implementations:
    ///
    /// | Kind                      | Implementation | Lifecycle |
    /// |---------------------------|----------------|-----------|
    /// | `dyn TransportClient`     | `tcp`          | singleton |
    /// | `dyn TransportServer`     | `tcp`          | fresh     |
    /// | `dyn StubFactory`         | `dynamic`      | singleton |
    /// | `ServiceProviderRegistry` | `default`      | singleton |
    /// | `dyn NameService`         | `sqlite`       | fresh     |
    /// | `dyn NameService`         | `memory`       | singleton |
    pub fn with_defaults() -> Self {
        let mut context = Self::new();
        context
            .register::<dyn TransportClient>("tcp", Lifecycle::Singleton, || {
                Arc::new(TcpTransportClient::new())
            })
            .register::<dyn TransportServer>("tcp", Lifecycle::Fresh, || {
                Arc::new(TcpTransportServer::new())
            })
            .register::<dyn StubFactory>("dynamic", Lifecycle::Singleton, || {
                Arc::new(DynamicStubFactory::new())
            })
            .register::<ServiceProviderRegistry>("default", Lifecycle::Singleton, || {
                Arc::new(ServiceProviderRegistry::new())
            })
            .register::<dyn NameService>("sqlite", Lifecycle::Fresh, || {
                Arc::new(SqliteNameService::new())
            })
            .register::<dyn NameService>("memory", Lifecycle::Singleton, || {
                Arc::new(MemoryNameService::new())
            });
        context
    }

    /// Register `implementation` for kind `K`.
    ///
    /// Registering the same implementation name again replaces the earlier
    /// registration and forgets its cached singleton.
    pub fn register<K>(
        &mut self,
        implementation: &'static str,
        lifecycle: Lifecycle,
        factory: impl Fn() -> Arc<K> + Send + Sync + 'static,
    ) -> &mut Self
    where
        K: ?Sized + Send + Sync + 'static,
    {
        let kind = TypeId::of::<K>();
        let factory: Factory<K> = Arc::new(factory);

        let registrations = self.registrations.entry(kind).or_default();
        registrations.retain(|r| r.implementation != implementation);
        registrations.push(Registration {
            implementation,
            lifecycle,
            factory: Box::new(factory),
        });

        self.singletons
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(kind, implementation));
        self
    }

    /// Names of the implementations registered for `K`, in registration order.
    pub fn implementations<K>(&self) -> Vec<&'static str>
    where
        K: ?Sized + 'static,
    {
        self.registered::<K>()
            .iter()
            .map(|r| r.implementation)
            .collect()
    }

    /// The single implementation registered for `K`.
    ///
    /// Fails with [`RpcError::ComponentNotFound`] when there is none and with
    /// [`RpcError::ComponentConflict`] when there are several.
    pub fn load<K>(&self) -> Result<Arc<K>>
    where
        K: ?Sized + Send + Sync + 'static,
    {
        match self.registered::<K>() {
            [] => Err(RpcError::ComponentNotFound {
                kind: type_name::<K>().to_string(),
            }),
            [registration] => self.instantiate::<K>(registration),
            many => Err(RpcError::ComponentConflict {
                kind: type_name::<K>().to_string(),
                implementations: many.iter().map(|r| r.implementation.to_string()).collect(),
            }),
        }
    }

    /// Every implementation registered for `K` (possibly none).
    pub fn load_all<K>(&self) -> Result<Vec<Arc<K>>>
    where
        K: ?Sized + Send + Sync + 'static,
    {
        self.registered::<K>()
            .iter()
            .map(|r| self.instantiate::<K>(r))
            .collect()
    }

    fn registered<K: ?Sized + 'static>(&self) -> &[Registration] {
        self.registrations
            .get(&TypeId::of::<K>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn instantiate<K>(&self, registration: &Registration) -> Result<Arc<K>>
    where
        K: ?Sized + Send + Sync + 'static,
    {
        let factory = registration
            .factory
            .downcast_ref::<Factory<K>>()
            .ok_or_else(|| {
                RpcError::other(format!(
                    "Factory for {} has the wrong type",
                    registration.implementation
                ))
            })?;

        match registration.lifecycle {
            Lifecycle::Fresh => Ok(factory()),
            Lifecycle::Singleton => {
                let key = (TypeId::of::<K>(), registration.implementation);
                let mut singletons = self
                    .singletons
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                if let Some(existing) = singletons.get(&key).and_then(|s| s.downcast_ref::<Arc<K>>()) {
                    return Ok(existing.clone());
                }

                debug!(
                    "Creating singleton {} for {}",
                    registration.implementation,
                    type_name::<K>()
                );
                let instance = factory();
                singletons.insert(key, Box::new(instance.clone()));
                Ok(instance)
            }
        }
    }
}

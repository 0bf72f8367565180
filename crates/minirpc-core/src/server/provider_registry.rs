//! Interface name to provider instance.

use crate::{Result, RpcError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// An object answering calls for one service interface.
///
/// Usually produced by [`ProviderAdapter`](crate::service::ProviderAdapter)
/// from a type implementing an `rpc_service!` trait.
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Interface identity, e.g. `minirpc.hello.HelloService`.
    fn interface(&self) -> &str;

    /// Every method the interface declares.
    fn methods(&self) -> &[&'static str];

    /// Invoke `method` with JSON-encoded `args`.
    async fn invoke(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value>;
}

/// At most one provider per interface per process.
#[derive(Default)]
pub struct ServiceProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ServiceProvider>>>,
}

impl ServiceProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its interface identity.
    ///
    /// A second provider for the same interface is rejected with
    /// [`RpcError::ProviderConflict`]; the first stays in place.
    pub fn add_service_provider(&self, provider: Arc<dyn ServiceProvider>) -> Result<()> {
        let interface = provider.interface().to_string();
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if providers.contains_key(&interface) {
            return Err(RpcError::ProviderConflict { interface });
        }

        info!("Registered service provider for {}", interface);
        providers.insert(interface, provider);
        Ok(())
    }

    /// Find the provider answering `interface.method`.
    pub fn resolve(&self, interface: &str, method: &str) -> Result<Arc<dyn ServiceProvider>> {
        let provider = self
            .get(interface)
            .ok_or_else(|| RpcError::ServiceNotFound {
                interface: interface.to_string(),
            })?;

        if !provider.methods().contains(&method) {
            return Err(RpcError::MethodNotFound {
                interface: interface.to_string(),
                method: method.to_string(),
            });
        }
        Ok(provider)
    }

    pub fn get(&self, interface: &str) -> Option<Arc<dyn ServiceProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(interface)
            .cloned()
    }

    /// Registered interface identities, sorted.
    pub fn interfaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    struct Counter {
        name: &'static str,
    }

    #[async_trait]
    impl ServiceProvider for Counter {
        fn interface(&self) -> &str {
            "test.Counter"
        }

        fn methods(&self) -> &[&'static str] {
            &["count"]
        }

        async fn invoke(&self, _method: &str, _args: Value) -> Result<Value> {
            Ok(json!(self.name))
        }
    }

    #[test]
    fn test_add_and_resolve() {
        let registry = ServiceProviderRegistry::new();
        registry
            .add_service_provider(Arc::new(Counter { name: "first" }))
            .unwrap();

        assert!(registry.resolve("test.Counter", "count").is_ok());
        assert_eq!(registry.interfaces(), vec!["test.Counter".to_string()]);
    }

    #[tokio::test]
    async fn test_reregistration_rejected_and_first_kept() {
        let registry = ServiceProviderRegistry::new();
        registry
            .add_service_provider(Arc::new(Counter { name: "first" }))
            .unwrap();

        let result = registry.add_service_provider(Arc::new(Counter { name: "second" }));
        assert!(matches!(result, Err(RpcError::ProviderConflict { .. })));

        let provider = registry.resolve("test.Counter", "count").unwrap();
        assert_eq!(provider.invoke("count", Value::Null).await.unwrap(), json!("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_interface_and_method() {
        let registry = ServiceProviderRegistry::new();
        assert!(matches!(
            registry.resolve("test.Missing", "count"),
            Err(RpcError::ServiceNotFound { .. })
        ));

        registry
            .add_service_provider(Arc::new(Counter { name: "first" }))
            .unwrap();
        assert!(matches!(
            registry.resolve("test.Counter", "reset"),
            Err(RpcError::MethodNotFound { .. })
        ));
    }
}

//! Access point: the per-process entry point.
//!
//! Composes the transport client and server, the stub factory, the service
//! provider registry and the name services loaded from a
//! [`ComponentContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! let access_point = AccessPoint::builder().port(0).build()?;
//! let _server = access_point.start_server().await?;
//! let uri = access_point.add_service_provider::<dyn HelloService>(Arc::new(HelloImpl))?;
//!
//! let names = access_point.name_service(&"sqlite::memory:".parse()?).await?;
//! names.register_service(<dyn HelloService as ServiceInterface>::NAME, &uri).await?;
//!
//! let hello = access_point.get_remote_service::<dyn HelloService>(&uri).await?;
//! println!("{}", hello.hello("world".into()).await?);
//! ```

use crate::client::StubFactory;
use crate::components::ComponentContext;
use crate::config::{AccessPointConfig, ProtocolConfig};
use crate::nameservice::NameService;
use crate::server::{RequestHandlerRegistry, RpcRequestHandler, ServiceProviderRegistry};
use crate::service::{ProviderAdapter, ServiceInterface};
use crate::transport::{Transport, TransportClient, TransportServer};
use crate::{Result, RpcError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

type TransportSlot = Arc<OnceCell<Arc<dyn Transport>>>;

/// Running server started by [`AccessPoint::start_server`].
///
/// Dropping the handle stops the server.
pub struct ServerHandle {
    server: Arc<dyn TransportServer>,
    addr: SocketAddr,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.server.stop();
    }
}

/// One process's view of the RPC system.
pub struct AccessPoint {
    config: AccessPointConfig,
    context: Arc<ComponentContext>,
    client: Arc<dyn TransportClient>,
    stub_factory: Arc<dyn StubFactory>,
    providers: Arc<ServiceProviderRegistry>,
    handlers: Arc<RequestHandlerRegistry>,
    transports: Mutex<HashMap<SocketAddr, TransportSlot>>,
    server: Mutex<Option<Arc<dyn TransportServer>>>,
    starting: tokio::sync::Mutex<()>,
}

impl AccessPoint {
    /// An access point with default configuration and built-in components.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> AccessPointBuilder {
        AccessPointBuilder::new()
    }

    fn from_parts(config: AccessPointConfig, context: Arc<ComponentContext>) -> Result<Self> {
        let client = context.load::<dyn TransportClient>()?;
        let stub_factory = context.load::<dyn StubFactory>()?;
        let providers = context.load::<ServiceProviderRegistry>()?;

        let mut handlers = RequestHandlerRegistry::new();
        handlers.register(Arc::new(RpcRequestHandler::new(providers.clone())))?;

        Ok(Self {
            config,
            context,
            client,
            stub_factory,
            providers,
            handlers: Arc::new(handlers),
            transports: Mutex::new(HashMap::new()),
            server: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AccessPointConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ComponentContext> {
        &self.context
    }

    pub fn providers(&self) -> &Arc<ServiceProviderRegistry> {
        &self.providers
    }

    fn server(&self) -> MutexGuard<'_, Option<Arc<dyn TransportServer>>> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transports(&self) -> MutexGuard<'_, HashMap<SocketAddr, TransportSlot>> {
        self.transports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Typed stub for interface `I` served at `uri` (`rpc://host:port`).
    ///
    /// All stubs for one remote address share one transport. Stubs get the
    /// configured request timeout unless the stub factory already set one.
    pub async fn get_remote_service<I>(&self, uri: &Url) -> Result<I::Stub>
    where
        I: ?Sized + ServiceInterface,
    {
        let addr = resolve_uri(uri).await?;
        let transport = self.transport_for(addr).await?;
        let stub = self.stub_factory.create_stub(transport, I::NAME);
        let stub = match stub.timeout() {
            Some(_) => stub,
            None => stub.with_timeout(self.config.request_timeout),
        };
        Ok(I::bind(stub))
    }

    /// Cached transport for `addr`, connecting on first use.
    ///
    /// Concurrent first users share one connection attempt. A cached
    /// transport found closed is replaced once.
    pub async fn transport_for(&self, addr: SocketAddr) -> Result<Arc<dyn Transport>> {
        for _ in 0..2 {
            let slot = self
                .transports()
                .entry(addr)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let transport = slot
                .get_or_try_init(|| async {
                    debug!("Opening transport to {}", addr);
                    self.client
                        .create_transport(addr, self.config.connect_timeout)
                        .await
                })
                .await?
                .clone();

            if !transport.is_closed() {
                return Ok(transport);
            }

            let mut transports = self.transports();
            if transports
                .get(&addr)
                .is_some_and(|cached| Arc::ptr_eq(cached, &slot))
            {
                debug!("Cached transport to {} is closed, reconnecting", addr);
                transports.remove(&addr);
            }
        }

        Err(RpcError::ConnectionClosed(addr.to_string()))
    }

    /// Number of live cached transports.
    pub fn cached_transport_count(&self) -> usize {
        self.transports()
            .values()
            .filter(|slot| slot.get().is_some_and(|t| !t.is_closed()))
            .count()
    }

    /// Register `provider` as the implementation of `I` and return the
    /// address under which this process serves it.
    pub fn add_service_provider<I>(&self, provider: Arc<I>) -> Result<Url>
    where
        I: ?Sized + ServiceInterface,
    {
        self.providers
            .add_service_provider(Arc::new(ProviderAdapter::new(provider)))?;
        self.local_uri()
    }

    /// `rpc://host:port` of this process: the bound port once the server
    /// runs, the configured one before.
    pub fn local_uri(&self) -> Result<Url> {
        let port = self
            .server()
            .as_ref()
            .and_then(|server| server.local_addr())
            .map(|addr| addr.port())
            .unwrap_or(self.config.port);

        let raw = format!(
            "{}://{}:{}",
            ProtocolConfig::URI_SCHEME,
            self.config.host,
            port
        );
        Url::parse(&raw).map_err(|e| RpcError::InvalidAddress {
            address: raw,
            message: e.to_string(),
        })
    }

    /// Start serving registered providers on the configured host and port.
    pub async fn start_server(&self) -> Result<ServerHandle> {
        let _starting = self.starting.lock().await;
        let running = self.server().as_ref().and_then(|s| s.local_addr());
        if let Some(addr) = running {
            return Err(RpcError::ServerAlreadyRunning {
                addr: addr.to_string(),
            });
        }

        let bind_addr = resolve_host(&self.config.host, self.config.port).await?;
        let server = self.context.load::<dyn TransportServer>()?;
        let addr = server.start(self.handlers.clone(), bind_addr).await?;
        *self.server() = Some(server.clone());

        info!("Access point serving on {}", addr);
        Ok(ServerHandle { server, addr })
    }

    /// Connect the name service variant handling `uri`'s scheme.
    pub async fn name_service(&self, uri: &Url) -> Result<Arc<dyn NameService>> {
        let mut matching: Vec<Arc<dyn NameService>> = self
            .context
            .load_all::<dyn NameService>()?
            .into_iter()
            .filter(|ns| ns.supports(uri))
            .collect();

        let name_service = match matching.len() {
            0 => {
                return Err(RpcError::UnsupportedScheme {
                    uri: uri.to_string(),
                })
            }
            1 => matching.remove(0),
            _ => {
                return Err(RpcError::ComponentConflict {
                    kind: format!("name service for scheme {}", uri.scheme()),
                    implementations: self
                        .context
                        .implementations::<dyn NameService>()
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                })
            }
        };

        name_service.connect(uri).await?;
        Ok(name_service)
    }

    /// Stop the server, if any, and close every cached transport.
    pub async fn close(&self) {
        let server = self.server().take();
        if let Some(server) = server {
            server.stop();
        }

        let slots: Vec<TransportSlot> = self.transports().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(transport) = slot.get() {
                transport.close().await;
            }
        }
        debug!("Access point closed");
    }
}

/// Builder for [`AccessPoint`].
pub struct AccessPointBuilder {
    config: AccessPointConfig,
    context: Option<Arc<ComponentContext>>,
}

impl AccessPointBuilder {
    pub fn new() -> Self {
        Self {
            config: AccessPointConfig::default(),
            context: None,
        }
    }

    /// Host bound by the server and advertised in provider addresses.
    ///
    /// Default: `localhost`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Server port; `0` lets the OS pick one.
    ///
    /// Default: `9999`
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Default: 30 s
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Per-call timeout of stubs created by this access point.
    ///
    /// Default: 10 s
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn config(mut self, config: AccessPointConfig) -> Self {
        self.config = config;
        self
    }

    /// Components to load from. Default: [`ComponentContext::with_defaults`].
    pub fn context(mut self, context: Arc<ComponentContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<AccessPoint> {
        let context = self
            .context
            .unwrap_or_else(|| Arc::new(ComponentContext::with_defaults()));
        AccessPoint::from_parts(self.config, context)
    }
}

impl Default for AccessPointBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn resolve_host(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| RpcError::InvalidAddress {
            address: format!("{}:{}", host, port),
            message: e.to_string(),
        })?
        .next()
        .ok_or_else(|| RpcError::InvalidAddress {
            address: format!("{}:{}", host, port),
            message: "host resolved to no address".to_string(),
        })
}

/// Socket address of an `rpc://host:port` URI.
async fn resolve_uri(uri: &Url) -> Result<SocketAddr> {
    if uri.scheme() != ProtocolConfig::URI_SCHEME {
        return Err(RpcError::UnsupportedScheme {
            uri: uri.to_string(),
        });
    }
    let host = uri.host_str().ok_or_else(|| RpcError::InvalidAddress {
        address: uri.to_string(),
        message: "missing host".to_string(),
    })?;
    let port = uri.port().ok_or_else(|| RpcError::InvalidAddress {
        address: uri.to_string(),
        message: "missing port".to_string(),
    })?;
    resolve_host(host, port).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_uri_requires_rpc_scheme_and_port() {
        assert!(matches!(
            resolve_uri(&uri("http://127.0.0.1:80")).await,
            Err(RpcError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            resolve_uri(&uri("rpc://127.0.0.1")).await,
            Err(RpcError::InvalidAddress { .. })
        ));
        assert_eq!(
            resolve_uri(&uri("rpc://127.0.0.1:9999")).await.unwrap(),
            "127.0.0.1:9999".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_local_uri_before_and_after_start() {
        let access_point = AccessPoint::builder()
            .host("127.0.0.1")
            .port(0)
            .build()
            .unwrap();
        assert_eq!(access_point.local_uri().unwrap().as_str(), "rpc://127.0.0.1:0");

        let handle = access_point.start_server().await.unwrap();
        let local = access_point.local_uri().unwrap();
        assert_eq!(local.port(), Some(handle.addr().port()));

        assert!(matches!(
            access_point.start_server().await,
            Err(RpcError::ServerAlreadyRunning { .. })
        ));
        access_point.close().await;
    }

    #[tokio::test]
    async fn test_name_service_selected_by_scheme() {
        let access_point = AccessPoint::new().unwrap();

        let memory = access_point.name_service(&uri("memory:")).await.unwrap();
        assert_eq!(memory.supported_schemes(), &["memory"]);

        let sqlite = access_point
            .name_service(&uri("sqlite::memory:"))
            .await
            .unwrap();
        assert_eq!(sqlite.supported_schemes(), &["sqlite"]);

        assert!(matches!(
            access_point.name_service(&uri("zookeeper://localhost:2181")).await,
            Err(RpcError::UnsupportedScheme { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_not_cached() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let access_point = AccessPoint::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let err = access_point.transport_for(addr).await.err().unwrap();
        assert!(err.is_transport_failure());
        assert_eq!(access_point.cached_transport_count(), 0);
    }
}

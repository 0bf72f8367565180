//! Service definition macro.
//!
//! [`rpc_service!`] turns one trait declaration into everything both ends of
//! a call need:
//!
//! - the service trait itself (every method returns [`crate::Result`]),
//! - a typed client stub with the same methods,
//! - a [`ServiceInterface`](crate::service::ServiceInterface) implementation
//!   for `dyn Trait` whose dispatch table covers exactly the declared methods.
//!
//! Arguments travel as a JSON array (the argument tuple), results as plain
//! JSON values.

/// Define an RPC service.
///
/// # Example
///
/// ```rust
/// use minirpc::rpc_service;
///
/// rpc_service! {
///     /// Greets people.
///     pub trait Greeter as "demo.Greeter", stub GreeterStub {
///         /// Return a greeting for `name`.
///         async fn greet(&self, name: String) -> String;
///         async fn count(&self) -> u64;
///     }
/// }
///
/// struct English;
///
/// #[minirpc::async_trait]
/// impl Greeter for English {
///     async fn greet(&self, name: String) -> minirpc::Result<String> {
///         Ok(format!("Hello, {}", name))
///     }
///
///     async fn count(&self) -> minirpc::Result<u64> {
///         Ok(1)
///     }
/// }
/// ```
#[macro_export]
macro_rules! rpc_service {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident as $iface:literal, stub $stub:ident {
            $(
                $(#[$method_meta:meta])*
                async fn $method:ident(&self $(, $arg:ident : $arg_ty:ty)*) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::__private::async_trait]
        $vis trait $name: Send + Sync {
            $(
                $(#[$method_meta])*
                async fn $method(&self $(, $arg: $arg_ty)*) -> $crate::Result<$ret>;
            )*
        }

        #[doc = concat!("Client stub for `", $iface, "`.")]
        #[derive(Debug, Clone)]
        $vis struct $stub {
            inner: $crate::client::Stub,
        }

        impl $stub {
            pub fn new(inner: $crate::client::Stub) -> Self {
                Self { inner }
            }

            pub fn inner(&self) -> &$crate::client::Stub {
                &self.inner
            }

            $(
                $(#[$method_meta])*
                pub async fn $method(&self $(, $arg: $arg_ty)*) -> $crate::Result<$ret> {
                    self.inner.invoke(stringify!($method), ($($arg,)*)).await
                }
            )*
        }

        #[$crate::__private::async_trait]
        impl $crate::service::ServiceInterface for dyn $name {
            const NAME: &'static str = $iface;
            const METHODS: &'static [&'static str] = &[$(stringify!($method)),*];
            type Stub = $stub;

            fn bind(stub: $crate::client::Stub) -> $stub {
                $stub::new(stub)
            }

            async fn dispatch(
                &self,
                method: &str,
                args: $crate::__private::serde_json::Value,
            ) -> $crate::Result<$crate::__private::serde_json::Value> {
                match method {
                    $(
                        stringify!($method) => {
                            #[allow(clippy::let_unit_value)]
                            let ($($arg,)*): ($($arg_ty,)*) =
                                $crate::__private::serde_json::from_value(args).map_err(|e| {
                                    $crate::RpcError::InvalidArguments {
                                        method: format!("{}.{}", $iface, method),
                                        message: e.to_string(),
                                    }
                                })?;
                            let value = self.$method($($arg),*).await?;
                            Ok($crate::__private::serde_json::to_value(value)?)
                        }
                    )*
                    _ => Err($crate::RpcError::MethodNotFound {
                        interface: $iface.to_string(),
                        method: method.to_string(),
                    }),
                }
            }
        }
    };
}

//! Declarative typed clients.

/// Declare a typed client for a remote service.
///
/// Each declared method becomes an `async fn` that sends its parameters as
/// positional arguments and decodes the result into the declared return type.
///
/// ```
/// ef_rpc::service_client! {
///     /// Typed handle for the remote calculator.
///     pub struct CalculatorClient("Calculator") {
///         fn add(a: i64, b: i64) -> i64;
///         fn divide(a: f64, b: f64) -> f64;
///         fn reset() -> ();
///     }
/// }
///
/// # async fn demo(client: &ef_rpc::RpcClient) -> ef_rpc::Result<()> {
/// let calculator = CalculatorClient::new(client)?;
/// let sum = calculator.add(10, 20).await?;
/// # Ok(())
/// # }
/// ```
///
/// The generated type is `Clone` and exposes `SERVICE_NAME`, `new(&RpcClient)`,
/// `from_proxy(Arc<ServiceProxy>)` and `proxy()`.
#[macro_export]
macro_rules! service_client {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($service:literal) {
            $(
                $(#[$fmeta:meta])*
                fn $method:ident($($arg:ident : $ty:ty),* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        $vis struct $name {
            proxy: ::std::sync::Arc<$crate::ServiceProxy>,
        }

        impl $name {
            /// Name the remote service is registered under.
            pub const SERVICE_NAME: &'static str = $service;

            /// Bind to the service through a started client.
            pub fn new(client: &$crate::RpcClient) -> $crate::Result<Self> {
                Ok(Self::from_proxy(client.create_service(Self::SERVICE_NAME)?))
            }

            pub fn from_proxy(proxy: ::std::sync::Arc<$crate::ServiceProxy>) -> Self {
                Self { proxy }
            }

            pub fn proxy(&self) -> &::std::sync::Arc<$crate::ServiceProxy> {
                &self.proxy
            }

            $(
                $(#[$fmeta])*
                pub async fn $method(&self, $($arg: $ty),*) -> $crate::Result<$ret> {
                    self.proxy
                        .method(stringify!($method))
                        .call(($($arg,)*))
                        .await
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    // ---
    use crate::{create_memory_transport_with_hub, MemoryHub, RpcClient, RpcConfig};

    crate::service_client! {
        struct EchoClient("Echo") {
            fn echo(text: String) -> String;
            fn ping() -> ();
        }
    }

    #[tokio::test]
    async fn test_generated_client_binds_named_service() {
        // ---
        let transport = create_memory_transport_with_hub("macro-client", MemoryHub::new());
        let client = RpcClient::new(transport, RpcConfig::default()).unwrap();
        client.start().await.unwrap();

        let echo = EchoClient::new(&client).unwrap();
        assert_eq!(EchoClient::SERVICE_NAME, "Echo");
        assert_eq!(echo.proxy().name(), "Echo");
        assert!(std::sync::Arc::ptr_eq(
            echo.proxy(),
            &client.create_service("Echo").unwrap()
        ));
    }
}

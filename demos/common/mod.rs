//! Calculator service shared by the math demos.
//!
//! Both sides agree on the service name and method signatures: the server
//! builds the service from closures, the client declares the same methods
//! with `service_client!`.
#![allow(dead_code)]

use ef_rpc::{CallArgs, FnService, MethodError, ServiceBuilder};

pub const SERVICE_NAME: &str = "Calculator";

ef_rpc::service_client! {
    /// Typed client for the calculator.
    pub struct CalculatorClient("Calculator") {
        fn add(a: i64, b: i64) -> i64;
        fn subtract(a: i64, b: i64) -> i64;
        fn divide(a: f64, b: f64) -> f64;
    }
}

/// Build the calculator service.
pub fn calculator() -> FnService {
    // ---
    ServiceBuilder::new(SERVICE_NAME)
        .method("add", |args: CallArgs| async move {
            let (a, b): (i64, i64) = args.positional()?;
            Ok(a + b)
        })
        .method("subtract", |args: CallArgs| async move {
            let (a, b): (i64, i64) = args.positional()?;
            Ok(a - b)
        })
        .method("divide", |args: CallArgs| async move {
            let (a, b): (f64, f64) = args.positional()?;
            if b == 0.0 {
                return Err(MethodError::failed("division by zero"));
            }
            Ok(a / b)
        })
        .build()
}

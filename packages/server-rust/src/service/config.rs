use std::collections::HashSet;
use std::time::Duration;

use super::router::methods;

/// Pipeline configuration: deadlines, concurrency limit and protected methods.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Deadline given to every call that does not carry a tighter one.
    pub default_call_timeout: Duration,
    /// Maximum number of concurrent calls before load shedding.
    pub max_concurrent_calls: u32,
    /// Methods that require a valid bearer token. Matching is exact.
    pub protected_methods: HashSet<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_call_timeout: Duration::from_secs(30),
            max_concurrent_calls: 1000,
            protected_methods: [
                methods::GET_CUSTOMER_PROFILE,
                methods::GET_SUPPLIER_PROFILE,
                methods::GET_SUPPLIER_DASHBOARD,
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

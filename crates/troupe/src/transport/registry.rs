use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::Transport;
use crate::errors::{Result, TroupeError};

/// Scheme to transport mapping, resolved at call time.
#[derive(Default)]
pub struct TransportRegistry {
    transports: RwLock<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` for `scheme`, replacing any previous one.
    pub fn register(&self, scheme: impl Into<String>, transport: Arc<dyn Transport>) {
        let scheme = scheme.into();
        debug!("Registering transport for scheme '{}'", scheme);
        self.transports
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(scheme, transport);
    }

    pub fn get(&self, scheme: &str) -> Result<Arc<dyn Transport>> {
        self.transports
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(scheme)
            .cloned()
            .ok_or_else(|| TroupeError::NoProviderForScheme(scheme.to_string()))
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .transports
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InvocationRequest, Transport};
    use futures::future::BoxFuture;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    struct Echo;

    impl Transport for Echo {
        fn invoke(
            &self,
            request: InvocationRequest,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<Option<Value>>> {
            Box::pin(async move { Ok(Some(json!(request.method))) })
        }
    }

    #[test]
    fn test_unknown_scheme_is_reported() {
        let registry = TransportRegistry::new();
        registry.register("echo", Arc::new(Echo));
        assert!(registry.get("echo").is_ok());
        let err = registry.get("sqs").err().unwrap();
        assert!(matches!(err, TroupeError::NoProviderForScheme(ref s) if s == "sqs"));
        assert_eq!(registry.schemes(), vec!["echo".to_string()]);
    }
}

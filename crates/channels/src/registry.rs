use std::{collections::BTreeMap, sync::Arc};

use tracing::debug;

use crate::{Error, Result, plugin::Backend};

/// Settings handed to every backend constructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    /// Emit protocol-level traces (raw lines, sync batches).
    pub debug: bool,
}

/// Builds one backend instance from its name and protocol-specific config.
pub type BackendFactory =
    Box<dyn Fn(&str, serde_json::Value, &BackendOptions) -> Result<Arc<dyn Backend>> + Send + Sync>;

/// Explicit map of backend type (e.g. `"irc"`) to constructor.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend_type: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(backend_type.into(), factory);
    }

    /// Builder-style [`BackendRegistry::register`].
    #[must_use]
    pub fn with(mut self, backend_type: impl Into<String>, factory: BackendFactory) -> Self {
        self.register(backend_type, factory);
        self
    }

    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, backend_type: &str) -> bool {
        self.factories.contains_key(backend_type)
    }

    pub fn build(
        &self,
        backend_type: &str,
        name: &str,
        config: serde_json::Value,
        options: &BackendOptions,
    ) -> Result<Arc<dyn Backend>> {
        let factory = self
            .factories
            .get(backend_type)
            .ok_or_else(|| Error::UnknownBackendType {
                backend_type: backend_type.to_string(),
            })?;
        debug!(backend_type, backend = name, "building backend");
        factory(name, config, options)
    }

    /// Build every configured instance, ordered by type then name.
    pub fn build_all(
        &self,
        servers: &BTreeMap<String, BTreeMap<String, serde_json::Value>>,
        options: &BackendOptions,
    ) -> Result<Vec<Arc<dyn Backend>>> {
        let mut backends = Vec::new();
        for (backend_type, instances) in servers {
            for (name, config) in instances {
                backends.push(self.build(backend_type, name, config.clone(), options)?);
            }
        }
        Ok(backends)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            message::MessageEnvelope,
            plugin::InboundSender,
            state::{BackendBase, BackendState},
        },
        async_trait::async_trait,
        relaybot_routing::Target,
        tokio_util::sync::CancellationToken,
    };

    struct NullBackend {
        base: BackendBase,
    }

    #[async_trait]
    impl Backend for NullBackend {
        fn name(&self) -> &str {
            self.base.name()
        }

        async fn connect(&self) -> Result<()> {
            self.base.transition(BackendState::Connecting)?;
            self.base.transition(BackendState::Connected)?;
            Ok(())
        }

        async fn set_targets(&self, targets: Vec<Target>) -> Result<()> {
            self.base.set_targets(targets);
            Ok(())
        }

        async fn read(&self, cancel: CancellationToken, _inbound: InboundSender) -> Result<()> {
            cancel.cancelled().await;
            Err(Error::Cancelled)
        }

        async fn write(&self, _msg: &MessageEnvelope) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.base.transition(BackendState::Closed)?;
            Ok(())
        }
    }

    fn null_factory() -> BackendFactory {
        Box::new(|name: &str, config: serde_json::Value, _options: &BackendOptions| {
            if !config.is_object() {
                return Err(Error::invalid_config("expected a table"));
            }
            Ok(Arc::new(NullBackend {
                base: BackendBase::new(name),
            }) as Arc<dyn Backend>)
        })
    }

    #[test]
    fn build_unknown_type_fails() {
        let registry = BackendRegistry::new().with("null", null_factory());
        let err = registry
            .build("xmpp", "x1", serde_json::json!({}), &BackendOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownBackendType { ref backend_type } if backend_type == "xmpp"));
    }

    #[test]
    fn build_rejects_malformed_config() {
        let registry = BackendRegistry::new().with("null", null_factory());
        assert!(registry.contains("null"));
        assert_eq!(registry.types(), vec!["null"]);

        let opts = BackendOptions { debug: true };
        let err = registry
            .build("null", "n1", serde_json::json!(42), &opts)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn build_all_is_ordered() {
        let registry = BackendRegistry::new()
            .with("null", null_factory())
            .with("other", null_factory());

        let mut servers = BTreeMap::new();
        servers.insert(
            "other".to_string(),
            BTreeMap::from([("o1".to_string(), serde_json::json!({}))]),
        );
        servers.insert(
            "null".to_string(),
            BTreeMap::from([
                ("n2".to_string(), serde_json::json!({})),
                ("n1".to_string(), serde_json::json!({})),
            ]),
        );

        let backends = registry
            .build_all(&servers, &BackendOptions::default())
            .unwrap();
        let names: Vec<_> = backends.iter().map(|b| b.name().to_string()).collect();
        assert_eq!(names, vec!["n1", "n2", "o1"]);
    }

    #[tokio::test]
    async fn built_backend_is_usable_through_trait() {
        let registry = BackendRegistry::new().with("null", null_factory());
        let backend = registry
            .build("null", "n1", serde_json::json!({}), &BackendOptions { debug: true })
            .unwrap();
        backend.connect().await.unwrap();
        backend.disconnect().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = crate::plugin::inbound_queue(1);
        assert!(backend.read(cancel, tx).await.unwrap_err().is_cancelled());
    }
}

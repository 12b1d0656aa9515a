//! Provider registry
//!
//! Keeps registered providers in registration order, keyed by name. The
//! order is the failover priority among providers of the same kind, so it
//! has to be stable; a `HashMap` would not do.

use std::sync::Arc;

use super::InferenceProvider;

/// Ordered registry of inference providers
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn InferenceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider.
    ///
    /// A provider with the same name replaces the previous entry in place
    /// and the replaced instance is returned.
    pub fn register(
        &mut self,
        provider: Arc<dyn InferenceProvider>,
    ) -> Option<Arc<dyn InferenceProvider>> {
        match self
            .providers
            .iter_mut()
            .find(|existing| existing.name() == provider.name())
        {
            Some(slot) => Some(std::mem::replace(slot, provider)),
            None => {
                self.providers.push(provider);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// All providers in registration order
    pub fn providers(&self) -> &[Arc<dyn InferenceProvider>] {
        &self.providers
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::{ProviderConfig, SessionConfig};
    use crate::provider::ProviderError;
    use crate::stream::TextStream;
    use crate::types::{
        Availability, ChunkSemantics, ProviderDescriptor, ProviderKind, ProviderState, Session,
    };

    struct NamedProvider {
        descriptor: ProviderDescriptor,
    }

    impl NamedProvider {
        fn new(name: &str, description: &str) -> Arc<dyn InferenceProvider> {
            Arc::new(Self {
                descriptor: ProviderDescriptor {
                    name: name.to_string(),
                    kind: ProviderKind::Local,
                    description: description.to_string(),
                    native_chunking: ChunkSemantics::Delta,
                },
            })
        }
    }

    #[async_trait]
    impl InferenceProvider for NamedProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }
        async fn check_availability(&self) -> Availability {
            Availability::ready()
        }
        async fn initialize(&self, _config: &ProviderConfig) -> Result<(), ProviderError> {
            Ok(())
        }
        fn state(&self) -> ProviderState {
            ProviderState::Uninitialized
        }
        async fn dispose(&self) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn create_session(&self, _config: &SessionConfig) -> Result<Session, ProviderError> {
            Err(ProviderError::Session("not supported".into()))
        }
        async fn prompt_streaming(
            &self,
            _session: &Session,
            _text: &str,
            _cancel: CancellationToken,
        ) -> Result<TextStream, ProviderError> {
            Err(ProviderError::Streaming("not supported".into()))
        }
        async fn destroy_session(&self, _session: &Session) {}
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("native", ""));
        registry.register(NamedProvider::new("local-gpu", ""));
        registry.register(NamedProvider::new("remote", ""));

        assert_eq!(registry.names(), vec!["native", "local-gpu", "remote"]);
    }

    #[test]
    fn test_same_name_replaces_in_place() {
        let mut registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("native", "first"));
        registry.register(NamedProvider::new("remote", ""));
        let replaced = registry.register(NamedProvider::new("native", "second"));

        assert!(replaced.is_some());
        assert_eq!(registry.providers().len(), 2);
        assert_eq!(registry.names(), vec!["native", "remote"]);
        assert_eq!(registry.get("native").unwrap().descriptor().description, "second");
    }

    #[test]
    fn test_unknown_name() {
        let registry = ProviderRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.providers().is_empty());
    }
}

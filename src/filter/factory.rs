//! Filter factories and the type-name registry used at startup.
//!
//! # Responsibilities
//! - Map `[[filters]]` type names to constructors
//! - Resolve the configured filter list once, into a shared chain factory
//! - Stamp out a fresh chain for each accepted connection

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use super::api_versions::ApiVersionsFilter;
use super::broker_address::BrokerAddressFilter;
use super::transform::{FetchResponseTransformation, ProduceRequestTransformation};
use super::{FilterChain, ProtocolFilter};
use crate::config::FilterDefinition;

/// Free-form per-filter configuration.
pub type FilterConfig = toml::Table;

/// Proxy facts a filter may need at construction.
#[derive(Debug, Clone)]
pub struct FilterSetup {
    /// Host clients use to reach the proxy.
    pub proxy_host: String,
    /// Port clients use to reach the proxy.
    pub proxy_port: u16,
}

#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("unknown filter type `{0}`")]
    UnknownType(String),

    #[error("invalid configuration for filter `{filter}`: {source}")]
    InvalidConfig {
        filter: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("filter `{filter}` names unknown transformation `{transformation}`")]
    UnknownTransformation { filter: String, transformation: String },
}

/// Creates one filter instance per connection.
pub trait FilterFactory: Send + Sync {
    fn create_filter(&self) -> Box<dyn ProtocolFilter>;
}

impl<F> FilterFactory for F
where
    F: Fn() -> Box<dyn ProtocolFilter> + Send + Sync,
{
    fn create_filter(&self) -> Box<dyn ProtocolFilter> {
        self()
    }
}

type Constructor =
    Box<dyn Fn(&FilterConfig, &FilterSetup) -> Result<Arc<dyn FilterFactory>, FilterConfigError> + Send + Sync>;

/// Deserialize a filter's `config` table into its typed form.
pub fn typed_config<T: DeserializeOwned>(filter: &str, config: &FilterConfig) -> Result<T, FilterConfigError> {
    toml::Value::Table(config.clone())
        .try_into()
        .map_err(|source| FilterConfigError::InvalidConfig {
            filter: filter.to_string(),
            source,
        })
}

/// Maps filter type names to constructors.
pub struct FilterRegistry {
    constructors: HashMap<String, Constructor>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry holding every filter shipped with the proxy.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ApiVersions", ApiVersionsFilter::factory);
        registry.register("BrokerAddress", BrokerAddressFilter::factory);
        registry.register("ProduceRequestTransformation", ProduceRequestTransformation::factory);
        registry.register("FetchResponseTransformation", FetchResponseTransformation::factory);
        registry
    }

    /// Register a constructor, replacing any previous one with the same name.
    pub fn register<C>(&mut self, name: &str, constructor: C)
    where
        C: Fn(&FilterConfig, &FilterSetup) -> Result<Arc<dyn FilterFactory>, FilterConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(name.to_string(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn resolve(
        &self,
        definition: &FilterDefinition,
        setup: &FilterSetup,
    ) -> Result<Arc<dyn FilterFactory>, FilterConfigError> {
        let constructor = self
            .constructors
            .get(&definition.filter_type)
            .ok_or_else(|| FilterConfigError::UnknownType(definition.filter_type.clone()))?;
        constructor(&definition.config, setup)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Immutable list of filter factories, shared by every event loop.
#[derive(Clone, Default)]
pub struct FilterChainFactory {
    factories: Vec<Arc<dyn FilterFactory>>,
}

impl FilterChainFactory {
    pub fn new(factories: Vec<Arc<dyn FilterFactory>>) -> Self {
        Self { factories }
    }

    /// Resolve every configured filter, failing on the first bad definition.
    pub fn from_config(
        definitions: &[FilterDefinition],
        registry: &FilterRegistry,
        setup: &FilterSetup,
    ) -> Result<Self, FilterConfigError> {
        let factories = definitions
            .iter()
            .map(|definition| registry.resolve(definition, setup))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { factories })
    }

    pub fn create_chain(&self) -> FilterChain {
        FilterChain::new(self.factories.iter().map(|f| f.create_filter()).collect())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

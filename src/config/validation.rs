//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (watermarks, frame size, thread counts)
//! - Check that exactly one cluster is targeted
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use super::schema::{HostPort, HostPortError, ProxyConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxy.address: {0}")]
    ListenAddress(HostPortError),

    #[error("exactly one cluster must be configured, found {0}")]
    ClusterCount(usize),

    #[error("cluster `{0}` has no bootstrap servers")]
    NoBootstrapServers(String),

    #[error("cluster `{cluster}`: {source}")]
    BootstrapServer {
        cluster: String,
        #[source]
        source: HostPortError,
    },

    #[error("write_buffer watermarks must satisfy 0 < low ({low}) <= high ({high})")]
    Watermarks { low: usize, high: usize },

    #[error("proxy.max_frame_size must be greater than zero")]
    MaxFrameSize,

    #[error("proxy.worker_threads must be greater than zero")]
    WorkerThreads,

    #[error("proxy.key_password is set without proxy.key_store_file")]
    PasswordWithoutKeyStore,

    #[error("filter #{0} has an empty type")]
    EmptyFilterType(usize),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let proxy = &config.proxy;

    if let Err(e) = proxy.address.parse::<HostPort>() {
        errors.push(ValidationError::ListenAddress(e));
    }

    if config.clusters.len() != 1 {
        errors.push(ValidationError::ClusterCount(config.clusters.len()));
    }
    for (name, cluster) in &config.clusters {
        match cluster.bootstrap_addresses() {
            Ok(addresses) if addresses.is_empty() => {
                errors.push(ValidationError::NoBootstrapServers(name.clone()));
            }
            Ok(_) => {}
            Err(source) => errors.push(ValidationError::BootstrapServer {
                cluster: name.clone(),
                source,
            }),
        }
    }

    let buffer = proxy.write_buffer;
    if buffer.low_watermark == 0 || buffer.low_watermark > buffer.high_watermark {
        errors.push(ValidationError::Watermarks {
            low: buffer.low_watermark,
            high: buffer.high_watermark,
        });
    }

    if proxy.max_frame_size == 0 {
        errors.push(ValidationError::MaxFrameSize);
    }
    if proxy.worker_threads == Some(0) {
        errors.push(ValidationError::WorkerThreads);
    }
    if proxy.key_password.is_some() && proxy.key_store_file.is_none() {
        errors.push(ValidationError::PasswordWithoutKeyStore);
    }

    for (index, filter) in config.filters.iter().enumerate() {
        if filter.filter_type.trim().is_empty() {
            errors.push(ValidationError::EmptyFilterType(index));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterConfig, FilterDefinition};

    fn valid() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.clusters.insert(
            "demo".into(),
            ClusterConfig {
                bootstrap_servers: "localhost:9092".into(),
            },
        );
        config
    }

    #[test]
    fn defaults_with_one_cluster_are_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn every_problem_is_reported() {
        let mut config = valid();
        config.proxy.address = "nope".into();
        config.proxy.write_buffer.low_watermark = 0;
        config.proxy.max_frame_size = 0;
        config.proxy.worker_threads = Some(0);
        config.proxy.key_password = Some("secret".into());
        config.filters.push(FilterDefinition {
            filter_type: " ".into(),
            config: toml::Table::new(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 6);
        assert!(errors.contains(&ValidationError::MaxFrameSize));
        assert!(errors.contains(&ValidationError::WorkerThreads));
        assert!(errors.contains(&ValidationError::PasswordWithoutKeyStore));
        assert!(errors.contains(&ValidationError::EmptyFilterType(0)));
    }

    #[test]
    fn cluster_rules() {
        let mut config = valid();
        config.clusters.clear();
        assert_eq!(validate_config(&config), Err(vec![ValidationError::ClusterCount(0)]));

        let mut config = valid();
        config.clusters.insert("other".into(), ClusterConfig::default());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ClusterCount(2)));
        assert!(errors.contains(&ValidationError::NoBootstrapServers("other".into())));
    }

    #[test]
    fn inverted_watermarks_are_rejected() {
        let mut config = valid();
        config.proxy.write_buffer.low_watermark = 100;
        config.proxy.write_buffer.high_watermark = 10;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::Watermarks { low: 100, high: 10 }])
        );
    }
}

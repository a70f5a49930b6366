use std::net::SocketAddr;

use crate::{
    config::models::{GatewayConfig, NamespaceConfig, PluginRef},
    core::{
        mux::ParsedPattern,
        pattern::{Pattern, generate_patterns, should_skip},
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid route '{pattern}' in namespace '{namespace}': {message}")]
    InvalidRoute {
        namespace: String,
        pattern: String,
        message: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator.
///
/// Only checks what can be decided without building plugins; plugin configuration is
/// validated by each plugin's setup when the router is built.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem found.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.servers.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "servers".to_string(),
            });
        }
        for server in &config.servers {
            if let Err(e) = Self::validate_listen_address(&server.addr) {
                errors.push(e);
            }
        }

        if config.gateway.logger.level.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "gateway.logger.level".to_string(),
                message: "Log level must not be empty".to_string(),
            });
        }

        for (name, namespace) in &config.namespaces {
            errors.extend(Self::validate_namespace(name, namespace));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_namespace(name: &str, namespace: &NamespaceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if name.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "namespaces".to_string(),
                message: "Namespace names must not be empty".to_string(),
            });
        }

        for mount in &namespace.mounts {
            if mount.contains('{') {
                errors.push(ValidationError::InvalidField {
                    field: format!("namespace '{name}' mount '{mount}'"),
                    message: "Mounts cannot contain path variables".to_string(),
                });
            }
        }

        let field = format!("namespace '{name}'");
        Self::validate_plugin_refs(&field, "hooks", &namespace.hooks, &mut errors);
        Self::validate_plugin_refs(&field, "middlewares", &namespace.middlewares, &mut errors);
        Self::validate_plugin_refs(
            &field,
            "request_modifiers",
            &namespace.request_modifiers,
            &mut errors,
        );

        let mounts: Vec<&str> = if namespace.mounts.is_empty() {
            vec![""]
        } else {
            namespace.mounts.iter().map(String::as_str).collect()
        };

        for (route, route_config) in &namespace.routes {
            let field = format!("namespace '{name}' route '{route}'");
            Self::validate_plugin_refs(&field, "middlewares", &route_config.middlewares, &mut errors);
            Self::validate_plugin_refs(
                &field,
                "request_modifiers",
                &route_config.request_modifiers,
                &mut errors,
            );

            for mount in &mounts {
                if mount.contains('{') {
                    continue;
                }
                for pattern in generate_patterns(route, &route_config.methods) {
                    if should_skip(&pattern, mount) {
                        continue;
                    }
                    let merged = match Pattern::merge(mount, &pattern) {
                        Ok(merged) => merged.to_string(),
                        Err(e) => {
                            errors.push(ValidationError::InvalidRoute {
                                namespace: name.to_string(),
                                pattern,
                                message: e.to_string(),
                            });
                            continue;
                        }
                    };
                    if let Err(message) = ParsedPattern::parse(&merged) {
                        errors.push(ValidationError::InvalidRoute {
                            namespace: name.to_string(),
                            pattern: merged,
                            message,
                        });
                    }
                }
            }
        }

        errors
    }

    fn validate_plugin_refs(
        owner: &str,
        list: &str,
        refs: &[PluginRef],
        errors: &mut Vec<ValidationError>,
    ) {
        for (i, plugin) in refs.iter().enumerate() {
            if plugin.name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("{owner} {list}[{i}].name"),
                });
            }
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

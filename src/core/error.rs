use thiserror::Error;

use crate::{
    core::{pattern::PatternError, teardown::TeardownError},
    ports::{plugin::Capability, problem::BoxError},
};

/// Errors raised while building the router. None of them are retried.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("plugin {name:?} not found")]
    PluginNotFound { name: String },

    #[error("plugin {plugin:?} is not a {capability}")]
    MissingCapability {
        plugin: String,
        capability: Capability,
    },

    #[error("impossible route: {0}")]
    ImpossibleRoute(#[from] PatternError),

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pattern {pattern:?} conflicts with {existing:?}")]
    PatternConflict { pattern: String, existing: String },

    #[error("failed to create plugin {plugin:?}: {source}")]
    PluginCreate {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to set up plugin {plugin:?}: {source}")]
    PluginSetup {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("transport hook {plugin:?} failed: {source}")]
    TransportHook {
        plugin: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to build transport: {0}")]
    Transport(String),

    #[error("route registration failed: {0}")]
    Registrar(String),

    #[error("namespace {namespace:?}: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: Box<BuildError>,
    },

    /// A build failure whose cleanup failed as well.
    #[error("{error}\n{teardown}")]
    Joined {
        error: Box<BuildError>,
        teardown: TeardownError,
    },
}

impl BuildError {
    pub(crate) fn in_namespace(self, namespace: &str) -> Self {
        BuildError::Namespace {
            namespace: namespace.to_string(),
            source: Box::new(self),
        }
    }

    /// Join a build failure with the outcome of tearing down what was built.
    pub(crate) fn with_teardown(self, teardown: Result<(), TeardownError>) -> Self {
        match teardown {
            Ok(()) => self,
            Err(teardown) => BuildError::Joined {
                error: Box::new(self),
                teardown,
            },
        }
    }

    /// The failure that started it all, without namespace or teardown wrapping.
    pub fn root(&self) -> &BuildError {
        match self {
            BuildError::Namespace { source, .. } => source.root(),
            BuildError::Joined { error, .. } => error.root(),
            other => other,
        }
    }
}

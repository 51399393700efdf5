//! Addon system error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddonError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("unknown method: {plugin}.{method}")]
    UnknownMethod { plugin: String, method: String },

    #[error("malformed argument '{argument}': {reason}")]
    MalformedArgument { argument: String, reason: String },

    #[error("hook error: {0}")]
    Hook(String),

    #[error("panic in {0}")]
    Panicked(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl AddonError {
    /// Wrap any displayable failure raised inside addon code.
    pub fn hook(err: impl std::fmt::Display) -> Self {
        Self::Hook(err.to_string())
    }

    /// True for the failures an RPC caller is expected to handle.
    pub fn is_rpc_failure(&self) -> bool {
        matches!(
            self,
            Self::UnknownPlugin(_) | Self::UnknownMethod { .. } | Self::MalformedArgument { .. }
        )
    }
}

pub type AddonResult<T = ()> = Result<T, AddonError>;

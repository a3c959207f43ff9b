use crate::error::PtResult;
use serde::{Deserialize, Serialize};

/// Process-wide configuration for the core. Loading this from the
/// environment or command line belongs to the packaging layer; the core
/// only consumes the parsed struct, passed by reference through the depot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// recorded as the creator of artifacts, versions and save points
    pub user: String,
    /// name given to a project's root history
    pub main_history: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { user: "anonymous".to_owned(), main_history: "main".to_owned() }
    }
}

impl CoreConfig {
    pub fn from_toml_str(s: &str) -> PtResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn with_user(user: impl Into<String>) -> Self {
        Self { user: user.into(), ..Self::default() }
    }
}

use serde::{Deserialize, Serialize};

/// Status a discovery check reports before its first probe completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    #[default]
    Warning,
    Critical,
}

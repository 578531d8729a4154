//! Access-evaluation contract.

use serde::{Deserialize, Serialize};

use crate::error::WardenResult;

/// Outcome of evaluating a user's access to one permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub granted: bool,
    /// Why access was denied. `None` when granted.
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn granted() -> Self {
        Self {
            granted: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
        }
    }
}

/// The access-evaluation primitive: does `user_id` hold a currently valid
/// grant for `permission_system_name`?
///
/// `context` is an opaque JSON document forwarded to restriction
/// evaluation. Restrictions are currently recorded but not enforced.
pub trait AccessEvaluator: Send + Sync {
    fn evaluate_access(
        &self,
        user_id: &str,
        permission_system_name: &str,
        context: Option<&serde_json::Value>,
    ) -> impl Future<Output = WardenResult<AccessDecision>> + Send;
}

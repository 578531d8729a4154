//! Endpoint-to-permission mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "Operation (controller + action + method + route) requires permission P."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEndpoint {
    pub id: Uuid,
    pub permission_id: Uuid,
    pub controller: String,
    pub action: String,
    /// Always stored upper-case (`GET`, `POST`, ...).
    pub http_method: String,
    pub route: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEndpoint {
    pub controller: String,
    pub action: String,
    pub http_method: String,
    pub route: String,
}

impl PermissionEndpoint {
    pub fn new(permission_id: Uuid, input: CreateEndpoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            permission_id,
            controller: input.controller,
            action: input.action,
            http_method: normalize_method(&input.http_method),
            route: input.route,
            created_at: Utc::now(),
        }
    }

    pub fn matches(&self, controller: &str, action: &str, http_method: &str) -> bool {
        self.controller == controller
            && self.action == action
            && self.http_method == normalize_method(http_method)
    }
}

pub fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

//! Domain events raised by entity mutators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    PermissionCreated {
        permission_id: Uuid,
        system_name: String,
    },
    PermissionUpdated {
        permission_id: Uuid,
        system_name: String,
    },
    PermissionClaimsChanged {
        permission_id: Uuid,
        system_name: String,
        required_claims: Option<String>,
    },
    PermissionDeleted {
        permission_id: Uuid,
        system_name: String,
    },
    GrantCreated {
        grant_id: Uuid,
        user_id: String,
        permission_id: Uuid,
    },
    GrantUpdated {
        grant_id: Uuid,
        user_id: String,
        permission_id: Uuid,
    },
    GrantDeactivated {
        grant_id: Uuid,
        user_id: String,
        permission_id: Uuid,
    },
    EndpointAdded {
        permission_id: Uuid,
        controller: String,
        action: String,
        http_method: String,
    },
    EndpointRemoved {
        permission_id: Uuid,
        controller: String,
        action: String,
        http_method: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionCreated { .. } => "permission_created",
            Self::PermissionUpdated { .. } => "permission_updated",
            Self::PermissionClaimsChanged { .. } => "permission_claims_changed",
            Self::PermissionDeleted { .. } => "permission_deleted",
            Self::GrantCreated { .. } => "grant_created",
            Self::GrantUpdated { .. } => "grant_updated",
            Self::GrantDeactivated { .. } => "grant_deactivated",
            Self::EndpointAdded { .. } => "endpoint_added",
            Self::EndpointRemoved { .. } => "endpoint_removed",
        }
    }
}

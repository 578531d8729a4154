//! Permission aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::endpoint::{CreateEndpoint, PermissionEndpoint};
use super::event::DomainEvent;
use super::grant::PermissionGrant;

/// A named, grantable capability.
///
/// Construct new permissions with [`Permission::create`]; fields are public
/// for reading and for storage adapters rehydrating rows, but mutations go
/// through the methods below so that each one records its domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Canonical lookup key, e.g. `Users.View`.
    pub system_name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_system_permission: bool,
    /// Comma-delimited system names the grantee must already hold.
    pub required_claims: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    /// Populated only when loaded with the endpoints include hint.
    #[serde(default)]
    pub endpoints: Vec<PermissionEndpoint>,
    /// Populated only when loaded with the grants include hint.
    #[serde(default)]
    pub grants: Vec<PermissionGrant>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermission {
    pub name: String,
    pub system_name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_system_permission: bool,
    pub required_claims: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePermission {
    pub name: Option<String>,
    pub system_name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
    /// `Some(None)` clears the required claims.
    pub required_claims: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl UpdatePermission {
    /// Whether this update touches anything a system permission protects.
    pub fn edits_protected_fields(&self, current: &Permission) -> bool {
        self.name.as_ref().is_some_and(|n| n.trim() != current.name)
            || self
                .system_name
                .as_ref()
                .is_some_and(|s| s.trim() != current.system_name)
            || self
                .description
                .as_ref()
                .is_some_and(|d| *d != current.description)
            || self
                .category
                .as_ref()
                .is_some_and(|c| *c != current.category)
            || self
                .required_claims
                .as_ref()
                .is_some_and(|c| normalize_claims(c.as_deref()) != current.required_claims)
    }
}

impl Permission {
    /// Factory: the only way to create a new permission.
    pub fn create(input: CreatePermission, actor: Option<&str>) -> Self {
        let mut permission = Self {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            system_name: input.system_name.trim().to_string(),
            description: input.description,
            category: input.category,
            is_system_permission: input.is_system_permission,
            required_claims: normalize_claims(input.required_claims.as_deref()),
            is_active: true,
            is_deleted: false,
            created_at: Utc::now(),
            created_by: actor.map(str::to_string),
            updated_at: None,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
            endpoints: Vec::new(),
            grants: Vec::new(),
            events: Vec::new(),
        };
        permission.record(DomainEvent::PermissionCreated {
            permission_id: permission.id,
            system_name: permission.system_name.clone(),
        });
        permission
    }

    /// Rebuild a persisted permission without raising events. Storage
    /// adapters fill the remaining public fields afterwards.
    pub fn restore(id: Uuid, name: String, system_name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            system_name,
            description: None,
            category: None,
            is_system_permission: false,
            required_claims: None,
            is_active: true,
            is_deleted: false,
            created_at,
            created_by: None,
            updated_at: None,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
            endpoints: Vec::new(),
            grants: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Rename, redescribe and/or recategorize. Raises `PermissionUpdated`
    /// when anything actually changed.
    pub fn update_details(
        &mut self,
        name: Option<String>,
        system_name: Option<String>,
        description: Option<Option<String>>,
        category: Option<Option<String>>,
        actor: Option<&str>,
    ) {
        let mut changed = false;
        if let Some(name) = name.map(|n| n.trim().to_string()) {
            changed |= name != self.name;
            self.name = name;
        }
        if let Some(system_name) = system_name.map(|s| s.trim().to_string()) {
            changed |= system_name != self.system_name;
            self.system_name = system_name;
        }
        if let Some(description) = description {
            changed |= description != self.description;
            self.description = description;
        }
        if let Some(category) = category {
            changed |= category != self.category;
            self.category = category;
        }
        if changed {
            self.touch(actor);
            self.record(DomainEvent::PermissionUpdated {
                permission_id: self.id,
                system_name: self.system_name.clone(),
            });
        }
    }

    pub fn set_required_claims(&mut self, claims: Option<String>, actor: Option<&str>) {
        let claims = normalize_claims(claims.as_deref());
        if claims == self.required_claims {
            return;
        }
        self.required_claims = claims;
        self.touch(actor);
        self.record(DomainEvent::PermissionClaimsChanged {
            permission_id: self.id,
            system_name: self.system_name.clone(),
            required_claims: self.required_claims.clone(),
        });
    }

    pub fn set_active(&mut self, active: bool, actor: Option<&str>) {
        if self.is_active == active {
            return;
        }
        self.is_active = active;
        self.touch(actor);
        self.record(DomainEvent::PermissionUpdated {
            permission_id: self.id,
            system_name: self.system_name.clone(),
        });
    }

    /// Soft delete. Idempotent.
    pub fn mark_deleted(&mut self, actor: Option<&str>) {
        if self.is_deleted {
            return;
        }
        let now = Utc::now();
        self.is_deleted = true;
        self.is_active = false;
        self.deleted_at = Some(now);
        self.deleted_by = actor.map(str::to_string);
        self.record(DomainEvent::PermissionDeleted {
            permission_id: self.id,
            system_name: self.system_name.clone(),
        });
    }

    pub fn add_endpoint(&mut self, input: CreateEndpoint) -> PermissionEndpoint {
        let endpoint = PermissionEndpoint::new(self.id, input);
        self.endpoints.push(endpoint.clone());
        self.record(DomainEvent::EndpointAdded {
            permission_id: self.id,
            controller: endpoint.controller.clone(),
            action: endpoint.action.clone(),
            http_method: endpoint.http_method.clone(),
        });
        endpoint
    }

    /// Requires the endpoints to be loaded. Returns `None` if the endpoint
    /// does not belong to this permission.
    pub fn remove_endpoint(&mut self, endpoint_id: Uuid) -> Option<PermissionEndpoint> {
        let index = self.endpoints.iter().position(|e| e.id == endpoint_id)?;
        let endpoint = self.endpoints.remove(index);
        self.record(DomainEvent::EndpointRemoved {
            permission_id: self.id,
            controller: endpoint.controller.clone(),
            action: endpoint.action.clone(),
            http_method: endpoint.http_method.clone(),
        });
        Some(endpoint)
    }

    /// Trimmed, non-empty claim tokens.
    pub fn required_claim_list(&self) -> Vec<&str> {
        split_claims(self.required_claims.as_deref())
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    /// Drain the queued events for publication.
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn touch(&mut self, actor: Option<&str>) {
        self.updated_at = Some(Utc::now());
        self.updated_by = actor.map(str::to_string);
    }

    fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }
}

pub fn split_claims(claims: Option<&str>) -> Vec<&str> {
    claims
        .map(|c| {
            c.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Canonical form: tokens trimmed and re-joined with `,`; empty becomes `None`.
pub fn normalize_claims(claims: Option<&str>) -> Option<String> {
    let tokens = split_claims(claims);
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(","))
    }
}

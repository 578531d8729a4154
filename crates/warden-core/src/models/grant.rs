//! Permission grant: "user U holds permission P", optionally scoped.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::DomainEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub id: Uuid,
    /// Opaque identity-subsystem user id.
    pub user_id: String,
    pub permission_id: Uuid,
    /// Opaque JSON document; validated for well-formedness only.
    pub restrictions: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    /// Populated only when loaded with the permission include hint.
    #[serde(default)]
    pub permission_system_name: Option<String>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGrant {
    pub user_id: String,
    pub permission_id: Uuid,
    pub restrictions: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

/// `Some(None)` clears a field, `None` leaves it untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateGrant {
    pub restrictions: Option<Option<String>>,
    pub valid_from: Option<Option<String>>,
    pub valid_to: Option<Option<String>>,
}

/// Where a grant stands relative to its validity window at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantWindow {
    Open,
    NotYetValid,
    Expired,
    /// A stored bound could not be parsed.
    Malformed,
}

impl PermissionGrant {
    pub fn create(input: CreateGrant, actor: Option<&str>) -> Self {
        let mut grant = Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            permission_id: input.permission_id,
            restrictions: non_blank(input.restrictions),
            valid_from: non_blank(input.valid_from),
            valid_to: non_blank(input.valid_to),
            is_active: true,
            is_deleted: false,
            created_at: Utc::now(),
            created_by: actor.map(str::to_string),
            updated_at: None,
            updated_by: None,
            permission_system_name: None,
            events: Vec::new(),
        };
        grant.events.push(DomainEvent::GrantCreated {
            grant_id: grant.id,
            user_id: grant.user_id.clone(),
            permission_id: grant.permission_id,
        });
        grant
    }

    /// Rebuild a persisted grant without raising events.
    pub fn restore(
        id: Uuid,
        user_id: String,
        permission_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            permission_id,
            restrictions: None,
            valid_from: None,
            valid_to: None,
            is_active: true,
            is_deleted: false,
            created_at,
            created_by: None,
            updated_at: None,
            updated_by: None,
            permission_system_name: None,
            events: Vec::new(),
        }
    }

    /// Apply restriction/validity changes in place.
    pub fn update(&mut self, input: UpdateGrant, actor: Option<&str>) {
        let mut changed = false;
        if let Some(restrictions) = input.restrictions.map(non_blank) {
            changed |= restrictions != self.restrictions;
            self.restrictions = restrictions;
        }
        if let Some(valid_from) = input.valid_from.map(non_blank) {
            changed |= valid_from != self.valid_from;
            self.valid_from = valid_from;
        }
        if let Some(valid_to) = input.valid_to.map(non_blank) {
            changed |= valid_to != self.valid_to;
            self.valid_to = valid_to;
        }
        if changed {
            self.touch(actor);
            self.events.push(DomainEvent::GrantUpdated {
                grant_id: self.id,
                user_id: self.user_id.clone(),
                permission_id: self.permission_id,
            });
        }
    }

    /// Idempotent. Returns `true` only on the active → inactive transition,
    /// which is also the only time `GrantDeactivated` is raised.
    pub fn deactivate(&mut self, actor: Option<&str>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.touch(actor);
        self.events.push(DomainEvent::GrantDeactivated {
            grant_id: self.id,
            user_id: self.user_id.clone(),
            permission_id: self.permission_id,
        });
        true
    }

    pub fn mark_deleted(&mut self, actor: Option<&str>) {
        self.deactivate(actor);
        self.is_deleted = true;
    }

    pub fn window_at(&self, now: DateTime<Utc>) -> GrantWindow {
        let from = match self.valid_from.as_deref().map(parse_grant_timestamp) {
            Some(None) => return GrantWindow::Malformed,
            Some(Some(ts)) => Some(ts),
            None => None,
        };
        let to = match self.valid_to.as_deref().map(parse_grant_timestamp) {
            Some(None) => return GrantWindow::Malformed,
            Some(Some(ts)) => Some(ts),
            None => None,
        };
        if from.is_some_and(|from| now < from) {
            GrantWindow::NotYetValid
        } else if to.is_some_and(|to| now >= to) {
            GrantWindow::Expired
        } else {
            GrantWindow::Open
        }
    }

    /// Earliest parsable validity bound strictly after `now`, i.e. the
    /// next instant at which [`window_at`](Self::window_at) can change.
    pub fn next_boundary_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        [self.valid_from.as_deref(), self.valid_to.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(parse_grant_timestamp)
            .filter(|ts| *ts > now)
            .min()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_deleted && self.window_at(now) == GrantWindow::Open
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn touch(&mut self, actor: Option<&str>) {
        self.updated_at = Some(Utc::now());
        self.updated_by = actor.map(str::to_string);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a grant validity bound. Accepts RFC 3339, naive date-times
/// (`T` or space separated, taken as UTC) and bare dates (midnight UTC).
pub fn parse_grant_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

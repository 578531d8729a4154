//! Business rules guarding every mutation.
//!
//! Each rule is an independently evaluable predicate over already-loaded
//! state (or a read-only repository query). Rules never mutate anything.
//! Mutation flows run them in order through [`check_rule`], which stops at
//! the first broken rule.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::access::AccessEvaluator;
use crate::error::{WardenError, WardenResult};
use crate::models::grant::parse_grant_timestamp;
use crate::models::permission::{Permission, split_claims};
use crate::repository::{GrantRepository, PermissionRepository};
use crate::specification::active_grants_for_pair;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Satisfied,
    Broken(String),
}

pub trait BusinessRule: Send + Sync {
    /// Machine-readable rule name.
    fn name(&self) -> &'static str;
    fn evaluate(&self) -> impl Future<Output = WardenResult<RuleOutcome>> + Send;
}

/// Evaluate a rule, turning a broken outcome into a
/// [`WardenError::BusinessRule`].
pub async fn check_rule<R: BusinessRule>(rule: R) -> WardenResult<()> {
    match rule.evaluate().await? {
        RuleOutcome::Satisfied => Ok(()),
        RuleOutcome::Broken(detail) => Err(WardenError::BusinessRule {
            rule: rule.name().into(),
            detail,
        }),
    }
}

/// Like [`check_rule`] but reports a [`WardenError::Validation`]; used for
/// malformed input that is rejected before any other rule runs.
pub async fn validate_with<R: BusinessRule>(rule: R) -> WardenResult<()> {
    match rule.evaluate().await? {
        RuleOutcome::Satisfied => Ok(()),
        RuleOutcome::Broken(message) => Err(WardenError::Validation { message }),
    }
}

// ---------------------------------------------------------------------------
// Permission rules
// ---------------------------------------------------------------------------

pub struct SystemNameMustBeUnique<'a, P: PermissionRepository> {
    pub permissions: &'a P,
    pub system_name: &'a str,
    /// The permission being updated, if any.
    pub exclude_id: Option<Uuid>,
}

impl<P: PermissionRepository> BusinessRule for SystemNameMustBeUnique<'_, P> {
    fn name(&self) -> &'static str {
        "SystemNameMustBeUnique"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        let taken = self
            .permissions
            .exists_by_system_name(self.system_name.trim(), self.exclude_id)
            .await?;
        Ok(if taken {
            RuleOutcome::Broken(format!(
                "a permission with system name '{}' already exists",
                self.system_name.trim()
            ))
        } else {
            RuleOutcome::Satisfied
        })
    }
}

/// Protected operations on a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOperation {
    Edit,
    ChangeClaims,
    Delete,
}

impl PermissionOperation {
    fn verb(self) -> &'static str {
        match self {
            Self::Edit => "modified",
            Self::ChangeClaims => "have its required claims changed",
            Self::Delete => "deleted",
        }
    }
}

pub struct SystemPermissionIsImmutable<'a> {
    pub permission: &'a Permission,
    pub operation: PermissionOperation,
}

impl BusinessRule for SystemPermissionIsImmutable<'_> {
    fn name(&self) -> &'static str {
        "SystemPermissionIsImmutable"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        Ok(if self.permission.is_system_permission {
            RuleOutcome::Broken(format!(
                "system permission '{}' cannot be {}",
                self.permission.system_name,
                self.operation.verb()
            ))
        } else {
            RuleOutcome::Satisfied
        })
    }
}

pub struct PermissionMustBeActive<'a> {
    pub permission: &'a Permission,
}

impl BusinessRule for PermissionMustBeActive<'_> {
    fn name(&self) -> &'static str {
        "PermissionMustBeActive"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        Ok(if self.permission.is_active && !self.permission.is_deleted {
            RuleOutcome::Satisfied
        } else {
            RuleOutcome::Broken(format!(
                "permission '{}' is not active",
                self.permission.system_name
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Grant rules
// ---------------------------------------------------------------------------

/// Absent bounds are always valid (open-ended grant).
pub struct GrantDatesMustBeValid<'a> {
    pub valid_from: Option<&'a str>,
    pub valid_to: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl BusinessRule for GrantDatesMustBeValid<'_> {
    fn name(&self) -> &'static str {
        "GrantDatesMustBeValid"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        let parse = |raw: Option<&str>, label: &str| -> Result<Option<DateTime<Utc>>, String> {
            match raw.map(str::trim).filter(|r| !r.is_empty()) {
                None => Ok(None),
                Some(raw) => parse_grant_timestamp(raw)
                    .map(Some)
                    .ok_or_else(|| format!("{label} '{raw}' is not a valid timestamp")),
            }
        };

        let from = match parse(self.valid_from, "validFrom") {
            Ok(from) => from,
            Err(detail) => return Ok(RuleOutcome::Broken(detail)),
        };
        let to = match parse(self.valid_to, "validTo") {
            Ok(to) => to,
            Err(detail) => return Ok(RuleOutcome::Broken(detail)),
        };

        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                return Ok(RuleOutcome::Broken(
                    "validFrom must be earlier than validTo".into(),
                ));
            }
        }
        if to.is_some_and(|to| to <= self.now) {
            return Ok(RuleOutcome::Broken("validTo is already in the past".into()));
        }
        Ok(RuleOutcome::Satisfied)
    }
}

/// At most one active grant per (user, permission).
///
/// This is check-then-act against the store, not a storage constraint: two
/// concurrent creations for the same pair can both pass. The race is
/// accepted; the rule narrows it to the time between check and insert.
pub struct NoDuplicateActiveGrant<'a, G: GrantRepository> {
    pub grants: &'a G,
    pub user_id: &'a str,
    pub permission_id: Uuid,
    /// The grant being updated, if any.
    pub exclude_grant_id: Option<Uuid>,
}

impl<G: GrantRepository> BusinessRule for NoDuplicateActiveGrant<'_, G> {
    fn name(&self) -> &'static str {
        "NoDuplicateActiveGrant"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        let spec = active_grants_for_pair(self.user_id, self.permission_id, self.exclude_grant_id);
        Ok(if self.grants.exists(&spec).await? {
            RuleOutcome::Broken(format!(
                "user '{}' already holds an active grant for permission {}",
                self.user_id, self.permission_id
            ))
        } else {
            RuleOutcome::Satisfied
        })
    }
}

/// Every token in the permission's `required_claims` must already be held
/// (validly) by the user. Fails on the first missing claim.
pub struct RequiredClaimsPresent<'a, E: AccessEvaluator> {
    pub evaluator: &'a E,
    pub user_id: &'a str,
    pub required_claims: Option<&'a str>,
}

impl<E: AccessEvaluator> BusinessRule for RequiredClaimsPresent<'_, E> {
    fn name(&self) -> &'static str {
        "RequiredClaimsPresent"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        for claim in split_claims(self.required_claims) {
            let decision = self
                .evaluator
                .evaluate_access(self.user_id, claim, None)
                .await?;
            if !decision.granted {
                return Ok(RuleOutcome::Broken(format!(
                    "user '{}' is missing required claim '{claim}'",
                    self.user_id
                )));
            }
        }
        Ok(RuleOutcome::Satisfied)
    }
}

/// Non-empty restrictions must be well-formed JSON.
pub struct RestrictionsMustBeWellFormed<'a> {
    pub restrictions: Option<&'a str>,
}

impl BusinessRule for RestrictionsMustBeWellFormed<'_> {
    fn name(&self) -> &'static str {
        "RestrictionsMustBeWellFormed"
    }

    async fn evaluate(&self) -> WardenResult<RuleOutcome> {
        let Some(raw) = self.restrictions.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(RuleOutcome::Satisfied);
        };
        Ok(match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(_) => RuleOutcome::Satisfied,
            Err(e) => RuleOutcome::Broken(format!("restrictions are not well-formed JSON: {e}")),
        })
    }
}

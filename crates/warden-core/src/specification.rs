//! Storage-agnostic query specifications.
//!
//! A [`Specification`] describes *what* to fetch: AND-composed criteria,
//! eager-load hints, at most one sort key and an optional page window.
//! Storage adapters translate it into an actual query.
//!
//! Soft-delete filtering is an explicit criterion rather than adapter
//! magic: every specification starts with [`Criterion::not_deleted`] and
//! only [`Specification::with_deleted`] removes it (audit-trail reads).

use uuid::Uuid;

/// Criterion types know how to express the non-deleted predicate.
pub trait Criterion: Clone + PartialEq {
    fn not_deleted() -> Self;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder<K> {
    Ascending(K),
    Descending(K),
}

/// Offset/limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub take: u64,
}

impl Page {
    pub fn new(skip: u64, take: u64) -> Self {
        Self { skip, take }
    }

    /// 1-based page number helper.
    pub fn number(page: u64, size: u64) -> Self {
        Self {
            skip: page.saturating_sub(1).saturating_mul(size),
            take: size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Specification<C, I, K> {
    criteria: Vec<C>,
    includes: Vec<I>,
    order: Option<SortOrder<K>>,
    page: Option<Page>,
}

impl<C: Criterion, I: PartialEq, K> Default for Specification<C, I, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Criterion, I: PartialEq, K> Specification<C, I, K> {
    pub fn new() -> Self {
        Self {
            criteria: vec![C::not_deleted()],
            includes: Vec::new(),
            order: None,
            page: None,
        }
    }

    /// Add a criterion (logical AND).
    pub fn filter(mut self, criterion: C) -> Self {
        if !self.criteria.contains(&criterion) {
            self.criteria.push(criterion);
        }
        self
    }

    pub fn filter_if(self, condition: bool, criterion: C) -> Self {
        if condition { self.filter(criterion) } else { self }
    }

    /// Logical AND of two specifications. Criteria and includes are
    /// merged; `other`'s sort key and page window win when set.
    pub fn and(mut self, other: Self) -> Self {
        for criterion in other.criteria {
            self = self.filter(criterion);
        }
        for include in other.includes {
            self = self.include(include);
        }
        if other.order.is_some() {
            self.order = other.order;
        }
        if other.page.is_some() {
            self.page = other.page;
        }
        self
    }

    pub fn include(mut self, include: I) -> Self {
        if !self.includes.contains(&include) {
            self.includes.push(include);
        }
        self
    }

    /// Replaces any previous sort key.
    pub fn order_by(mut self, key: K) -> Self {
        self.order = Some(SortOrder::Ascending(key));
        self
    }

    /// Replaces any previous sort key.
    pub fn order_by_descending(mut self, key: K) -> Self {
        self.order = Some(SortOrder::Descending(key));
        self
    }

    pub fn paged(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    /// Drop the implicit non-deleted predicate.
    pub fn with_deleted(mut self) -> Self {
        let not_deleted = C::not_deleted();
        self.criteria.retain(|c| *c != not_deleted);
        self
    }

    pub fn has_include(&self, include: &I) -> bool {
        self.includes.contains(include)
    }
}

/// Read-only accessors for storage adapters.
impl<C, I, K> Specification<C, I, K> {
    pub fn criteria(&self) -> &[C] {
        &self.criteria
    }

    pub fn includes(&self) -> &[I] {
        &self.includes
    }

    pub fn order(&self) -> Option<&SortOrder<K>> {
        self.order.as_ref()
    }

    pub fn page(&self) -> Option<Page> {
        self.page
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCriterion {
    NotDeleted,
    ActiveOnly,
    /// Case-insensitive substring match on name, system name or description.
    SearchTerm(String),
    Category(String),
    SystemName(String),
    IdNot(Uuid),
}

impl Criterion for PermissionCriterion {
    fn not_deleted() -> Self {
        Self::NotDeleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionInclude {
    Endpoints,
    Grants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionSortKey {
    Name,
    SystemName,
    CreatedAt,
}

pub type PermissionSpec = Specification<PermissionCriterion, PermissionInclude, PermissionSortKey>;

/// Free-text permission search with active/category filters and paging,
/// ordered by name.
pub fn search_permissions(
    term: Option<&str>,
    include_inactive: bool,
    category: Option<&str>,
    page: Page,
) -> PermissionSpec {
    let term = term.map(str::trim).filter(|t| !t.is_empty());
    let category = category.map(str::trim).filter(|c| !c.is_empty());

    let mut spec = PermissionSpec::new().filter_if(!include_inactive, PermissionCriterion::ActiveOnly);
    if let Some(term) = term {
        spec = spec.filter(PermissionCriterion::SearchTerm(term.to_lowercase()));
    }
    if let Some(category) = category {
        spec = spec.filter(PermissionCriterion::Category(category.to_string()));
    }
    spec.order_by(PermissionSortKey::Name).paged(page)
}

pub fn permission_by_system_name(system_name: &str) -> PermissionSpec {
    PermissionSpec::new().filter(PermissionCriterion::SystemName(system_name.trim().to_string()))
}

// ---------------------------------------------------------------------------
// Grants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantCriterion {
    NotDeleted,
    ActiveOnly,
    User(String),
    Permission(Uuid),
    /// The referenced permission has this system name and is active and
    /// not deleted.
    ActivePermissionNamed(String),
    /// The referenced permission is active and not deleted.
    PermissionActive,
    IdNot(Uuid),
}

impl Criterion for GrantCriterion {
    fn not_deleted() -> Self {
        Self::NotDeleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantInclude {
    Permission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantSortKey {
    CreatedAt,
    ValidTo,
}

pub type GrantSpec = Specification<GrantCriterion, GrantInclude, GrantSortKey>;

/// Grants by user and/or permission, newest first.
pub fn search_grants(
    user_id: Option<&str>,
    permission_id: Option<Uuid>,
    include_inactive: bool,
    page: Page,
) -> GrantSpec {
    let mut spec = GrantSpec::new().filter_if(!include_inactive, GrantCriterion::ActiveOnly);
    if let Some(user_id) = user_id {
        spec = spec.filter(GrantCriterion::User(user_id.to_string()));
    }
    if let Some(permission_id) = permission_id {
        spec = spec.filter(GrantCriterion::Permission(permission_id));
    }
    spec.order_by_descending(GrantSortKey::CreatedAt).paged(page)
}

/// Candidate grants for an access decision: active grant on an active
/// permission. The validity window is checked by the caller because the
/// bounds are opaque strings.
pub fn valid_grants_for(user_id: &str, permission_system_name: &str) -> GrantSpec {
    GrantSpec::new()
        .filter(GrantCriterion::ActiveOnly)
        .filter(GrantCriterion::User(user_id.to_string()))
        .filter(GrantCriterion::ActivePermissionNamed(
            permission_system_name.trim().to_string(),
        ))
}

/// All candidate grants of a user, with the permission's system name.
pub fn valid_grants_of_user(user_id: &str) -> GrantSpec {
    GrantSpec::new()
        .filter(GrantCriterion::ActiveOnly)
        .filter(GrantCriterion::User(user_id.to_string()))
        .filter(GrantCriterion::PermissionActive)
        .include(GrantInclude::Permission)
}

/// Other active grants for the same (user, permission) pair.
pub fn active_grants_for_pair(user_id: &str, permission_id: Uuid, exclude: Option<Uuid>) -> GrantSpec {
    let mut spec = GrantSpec::new()
        .filter(GrantCriterion::ActiveOnly)
        .filter(GrantCriterion::User(user_id.to_string()))
        .filter(GrantCriterion::Permission(permission_id));
    if let Some(id) = exclude {
        spec = spec.filter(GrantCriterion::IdNot(id));
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_starts_not_deleted() {
        let spec = PermissionSpec::new();
        assert_eq!(spec.criteria(), &[PermissionCriterion::NotDeleted]);
        let audit = spec.with_deleted();
        assert!(audit.criteria().is_empty());
    }

    #[test]
    fn search_composes_filters() {
        let spec = search_permissions(Some("  Report "), false, Some("Reports"), Page::new(10, 5));
        assert_eq!(
            spec.criteria(),
            &[
                PermissionCriterion::NotDeleted,
                PermissionCriterion::ActiveOnly,
                PermissionCriterion::SearchTerm("report".into()),
                PermissionCriterion::Category("Reports".into()),
            ]
        );
        assert_eq!(spec.order(), Some(&SortOrder::Ascending(PermissionSortKey::Name)));
        assert_eq!(spec.page(), Some(Page::new(10, 5)));
    }

    #[test]
    fn blank_search_inputs_are_ignored() {
        let spec = search_permissions(Some("   "), true, Some(""), Page::new(0, 20));
        assert_eq!(spec.criteria(), &[PermissionCriterion::NotDeleted]);
    }

    #[test]
    fn sort_keys_are_mutually_exclusive() {
        let spec = GrantSpec::new()
            .order_by(GrantSortKey::ValidTo)
            .order_by_descending(GrantSortKey::CreatedAt);
        assert_eq!(spec.order(), Some(&SortOrder::Descending(GrantSortKey::CreatedAt)));
    }

    #[test]
    fn and_merges_without_duplicates() {
        let left = GrantSpec::new().filter(GrantCriterion::ActiveOnly);
        let right = GrantSpec::new()
            .filter(GrantCriterion::User("u-1".into()))
            .include(GrantInclude::Permission)
            .paged(Page::new(0, 10));
        let spec = left.and(right);
        assert_eq!(
            spec.criteria(),
            &[
                GrantCriterion::NotDeleted,
                GrantCriterion::ActiveOnly,
                GrantCriterion::User("u-1".into()),
            ]
        );
        assert!(spec.has_include(&GrantInclude::Permission));
        assert_eq!(spec.page(), Some(Page::new(0, 10)));
    }

    #[test]
    fn pair_lookup_excludes_given_grant() {
        let id = Uuid::new_v4();
        let pid = Uuid::new_v4();
        let spec = active_grants_for_pair("u-1", pid, Some(id));
        assert!(spec.criteria().contains(&GrantCriterion::IdNot(id)));
        assert!(spec.criteria().contains(&GrantCriterion::Permission(pid)));
    }

    #[test]
    fn page_numbers() {
        assert_eq!(Page::number(1, 20), Page::new(0, 20));
        assert_eq!(Page::number(3, 20), Page::new(40, 20));
        assert_eq!(Page::number(0, 20), Page::new(0, 20));
    }
}

//! Translation of storage-agnostic specifications into SurrealQL.

use serde_json::Value;
use warden_core::specification::{
    GrantCriterion, GrantSortKey, PermissionCriterion, PermissionSortKey, SortOrder,
    Specification,
};

use crate::error::DbError;

/// Positional parameter names; a specification may bind at most this many
/// values.
const PARAMS: [&str; 12] = [
    "p0", "p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8", "p9", "p10", "p11",
];

/// A specification compiled to SurrealQL clauses plus bound values.
#[derive(Debug, Default)]
pub(crate) struct CompiledQuery {
    /// Empty or `WHERE ...`.
    pub where_clause: String,
    /// Empty or `ORDER BY ...`.
    pub order_clause: String,
    /// Empty or `LIMIT $limit START $start`.
    pub page_clause: String,
    pub bindings: Vec<(&'static str, Value)>,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl CompiledQuery {
    pub fn select(&self, table: &str) -> String {
        format!(
            "SELECT meta::id(id) AS record_id, * FROM {table} {} {} {}",
            self.where_clause, self.order_clause, self.page_clause
        )
    }

    pub fn count(&self, table: &str) -> String {
        format!(
            "SELECT count() AS total FROM {table} {} GROUP ALL",
            self.where_clause
        )
    }
}

#[derive(Default)]
struct Binder {
    bindings: Vec<(&'static str, Value)>,
}

impl Binder {
    fn bind(&mut self, value: impl Into<Value>) -> Result<&'static str, DbError> {
        let name = PARAMS
            .get(self.bindings.len())
            .copied()
            .ok_or_else(|| DbError::Query("too many criteria in specification".into()))?;
        self.bindings.push((name, value.into()));
        Ok(name)
    }
}

trait ToSurrealQl {
    fn to_condition(&self, binder: &mut Binder) -> Result<String, DbError>;
}

trait SortColumn {
    fn column(&self) -> &'static str;
}

impl ToSurrealQl for PermissionCriterion {
    fn to_condition(&self, binder: &mut Binder) -> Result<String, DbError> {
        Ok(match self {
            Self::NotDeleted => "is_deleted = false".into(),
            Self::ActiveOnly => "is_active = true".into(),
            Self::SearchTerm(term) => {
                let p = binder.bind(term.to_lowercase())?;
                format!(
                    "(string::contains(string::lowercase(name), ${p}) \
                     OR string::contains(string::lowercase(system_name), ${p}) \
                     OR string::contains(string::lowercase(description ?? ''), ${p}))"
                )
            }
            Self::Category(category) => {
                let p = binder.bind(category.as_str())?;
                format!("category = ${p}")
            }
            Self::SystemName(name) => {
                let p = binder.bind(name.as_str())?;
                format!("system_name = ${p}")
            }
            Self::IdNot(id) => {
                let p = binder.bind(id.to_string())?;
                format!("id != type::record('permission', ${p})")
            }
        })
    }
}

impl ToSurrealQl for GrantCriterion {
    fn to_condition(&self, binder: &mut Binder) -> Result<String, DbError> {
        Ok(match self {
            Self::NotDeleted => "is_deleted = false".into(),
            Self::ActiveOnly => "is_active = true".into(),
            Self::User(user_id) => {
                let p = binder.bind(user_id.as_str())?;
                format!("user_id = ${p}")
            }
            Self::Permission(permission_id) => {
                let p = binder.bind(permission_id.to_string())?;
                format!("permission_id = ${p}")
            }
            Self::ActivePermissionNamed(system_name) => {
                let p = binder.bind(system_name.as_str())?;
                format!(
                    "permission_id IN (SELECT VALUE meta::id(id) FROM permission \
                     WHERE system_name = ${p} AND is_active = true AND is_deleted = false)"
                )
            }
            Self::PermissionActive => "permission_id IN (SELECT VALUE meta::id(id) \
                 FROM permission WHERE is_active = true AND is_deleted = false)"
                .into(),
            Self::IdNot(id) => {
                let p = binder.bind(id.to_string())?;
                format!("id != type::record('permission_grant', ${p})")
            }
        })
    }
}

impl SortColumn for PermissionSortKey {
    fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::SystemName => "system_name",
            Self::CreatedAt => "created_at",
        }
    }
}

impl SortColumn for GrantSortKey {
    fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::ValidTo => "valid_to",
        }
    }
}

fn compile<C, I, K>(spec: &Specification<C, I, K>) -> Result<CompiledQuery, DbError>
where
    C: ToSurrealQl,
    K: SortColumn,
{
    let mut binder = Binder::default();
    let conditions = spec
        .criteria()
        .iter()
        .map(|c| c.to_condition(&mut binder))
        .collect::<Result<Vec<_>, _>>()?;

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let order_clause = match spec.order() {
        Some(SortOrder::Ascending(key)) => format!("ORDER BY {} ASC", key.column()),
        Some(SortOrder::Descending(key)) => format!("ORDER BY {} DESC", key.column()),
        None => String::new(),
    };

    let mut bindings = binder.bindings;
    let (page_clause, offset, limit) = match spec.page() {
        Some(page) => {
            bindings.push(("limit", Value::from(page.take)));
            bindings.push(("start", Value::from(page.skip)));
            ("LIMIT $limit START $start".to_string(), page.skip, Some(page.take))
        }
        None => (String::new(), 0, None),
    };

    Ok(CompiledQuery {
        where_clause,
        order_clause,
        page_clause,
        bindings,
        offset,
        limit,
    })
}

pub(crate) fn compile_permission_spec<I>(
    spec: &Specification<PermissionCriterion, I, PermissionSortKey>,
) -> Result<CompiledQuery, DbError> {
    compile(spec)
}

pub(crate) fn compile_grant_spec<I>(
    spec: &Specification<GrantCriterion, I, GrantSortKey>,
) -> Result<CompiledQuery, DbError> {
    compile(spec)
}

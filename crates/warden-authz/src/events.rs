//! Domain-event dispatch and the cache-invalidation handlers.
//!
//! Entities queue [`DomainEvent`]s as they mutate. After a write commits,
//! the authorization repository drains the queue and hands it to the
//! [`EventDispatcher`], which awaits every interested handler before the
//! write call returns. Readers therefore never see a pre-write cache entry
//! once the write has been acknowledged.
//!
//! Handlers only invalidate and log. They must not call back into the
//! service or storage.

use async_trait::async_trait;
use tracing::{debug, info};
use warden_core::cache::CacheStore;
use warden_core::models::event::DomainEvent;

use crate::cache::AuthzCache;

#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, event: &DomainEvent) -> bool;

    /// Must be idempotent.
    async fn handle(&self, event: &DomainEvent);
}

/// Synchronous, in-order delivery of committed events to registered
/// handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn DomainEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher wired with the standard cache-invalidation handlers.
    /// `policy_prefix` names the resolved-policy entries to drop when a
    /// permission changes.
    pub fn with_cache_invalidation<C: CacheStore + 'static>(
        cache: AuthzCache<C>,
        policy_prefix: &str,
    ) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(PermissionCreatedHandler {
            cache: cache.clone(),
        });
        dispatcher.register(PermissionChangedHandler {
            cache: cache.clone(),
            policy_prefix: policy_prefix.to_string(),
        });
        dispatcher.register(GrantChangedHandler {
            cache: cache.clone(),
        });
        dispatcher.register(EndpointChangedHandler { cache });
        dispatcher
    }

    pub fn register(&mut self, handler: impl DomainEventHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub async fn publish(&self, event: &DomainEvent) {
        for handler in self.handlers.iter().filter(|h| h.handles(event)) {
            debug!(event = event.kind(), handler = handler.name(), "Dispatching event");
            handler.handle(event).await;
        }
    }

    pub async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in &events {
            self.publish(event).await;
        }
    }
}

/// A new permission can appear in any cached permission-name snapshot.
struct PermissionCreatedHandler<C> {
    cache: AuthzCache<C>,
}

#[async_trait]
impl<C: CacheStore + 'static> DomainEventHandler for PermissionCreatedHandler<C> {
    fn name(&self) -> &'static str {
        "permission_created_invalidation"
    }

    fn handles(&self, event: &DomainEvent) -> bool {
        matches!(event, DomainEvent::PermissionCreated { .. })
    }

    async fn handle(&self, event: &DomainEvent) {
        let DomainEvent::PermissionCreated {
            permission_id,
            system_name,
        } = event
        else {
            return;
        };
        self.cache.invalidate_all_permission_caches().await;
        info!(%permission_id, %system_name, "Permission created");
    }
}

/// Update, claims change and delete drop the id-scoped entry and the
/// resolved policy for the permission's current name.
struct PermissionChangedHandler<C> {
    cache: AuthzCache<C>,
    policy_prefix: String,
}

#[async_trait]
impl<C: CacheStore + 'static> DomainEventHandler for PermissionChangedHandler<C> {
    fn name(&self) -> &'static str {
        "permission_changed_invalidation"
    }

    fn handles(&self, event: &DomainEvent) -> bool {
        matches!(
            event,
            DomainEvent::PermissionUpdated { .. }
                | DomainEvent::PermissionClaimsChanged { .. }
                | DomainEvent::PermissionDeleted { .. }
        )
    }

    async fn handle(&self, event: &DomainEvent) {
        let (permission_id, system_name) = match event {
            DomainEvent::PermissionUpdated {
                permission_id,
                system_name,
            }
            | DomainEvent::PermissionDeleted {
                permission_id,
                system_name,
            } => (permission_id, system_name),
            DomainEvent::PermissionClaimsChanged {
                permission_id,
                system_name,
                required_claims,
            } => {
                info!(
                    %permission_id,
                    %system_name,
                    required_claims = required_claims.as_deref().unwrap_or(""),
                    "Permission required claims changed"
                );
                (permission_id, system_name)
            }
            _ => return,
        };

        self.cache.invalidate_permission_id(*permission_id).await;
        self.cache
            .invalidate_policy(&format!("{}{system_name}", self.policy_prefix))
            .await;
        info!(
            event = event.kind(),
            %permission_id,
            %system_name,
            "Permission cache invalidated"
        );
    }
}

struct GrantChangedHandler<C> {
    cache: AuthzCache<C>,
}

#[async_trait]
impl<C: CacheStore + 'static> DomainEventHandler for GrantChangedHandler<C> {
    fn name(&self) -> &'static str {
        "grant_changed_invalidation"
    }

    fn handles(&self, event: &DomainEvent) -> bool {
        matches!(
            event,
            DomainEvent::GrantCreated { .. }
                | DomainEvent::GrantUpdated { .. }
                | DomainEvent::GrantDeactivated { .. }
        )
    }

    async fn handle(&self, event: &DomainEvent) {
        let (DomainEvent::GrantCreated {
            grant_id,
            user_id,
            permission_id,
        }
        | DomainEvent::GrantUpdated {
            grant_id,
            user_id,
            permission_id,
        }
        | DomainEvent::GrantDeactivated {
            grant_id,
            user_id,
            permission_id,
        }) = event
        else {
            return;
        };

        self.cache.invalidate_user(user_id).await;
        info!(
            event = event.kind(),
            %grant_id,
            %user_id,
            %permission_id,
            "User permission cache invalidated"
        );
    }
}

struct EndpointChangedHandler<C> {
    cache: AuthzCache<C>,
}

#[async_trait]
impl<C: CacheStore + 'static> DomainEventHandler for EndpointChangedHandler<C> {
    fn name(&self) -> &'static str {
        "endpoint_changed_invalidation"
    }

    fn handles(&self, event: &DomainEvent) -> bool {
        matches!(
            event,
            DomainEvent::EndpointAdded { .. } | DomainEvent::EndpointRemoved { .. }
        )
    }

    async fn handle(&self, event: &DomainEvent) {
        let (DomainEvent::EndpointAdded {
            permission_id,
            controller,
            action,
            http_method,
        }
        | DomainEvent::EndpointRemoved {
            permission_id,
            controller,
            action,
            http_method,
        }) = event
        else {
            return;
        };

        self.cache
            .invalidate_endpoint(controller, action, http_method)
            .await;
        info!(
            event = event.kind(),
            %permission_id,
            %controller,
            %action,
            %http_method,
            "Endpoint cache invalidated"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::cache::{MemoryCache, keys};

    async fn seeded() -> (MemoryCache, EventDispatcher) {
        let store = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        for key in [
            keys::user_permissions("u-1"),
            keys::has_permission("u-1", "Reports.Export"),
            keys::user_permissions("u-2"),
            keys::endpoint("ReportsController", "Export", "POST"),
            keys::policy("Permission_Reports.Export"),
        ] {
            store.set(&key, b"[]".to_vec(), ttl).await.unwrap();
        }
        let dispatcher =
            EventDispatcher::with_cache_invalidation(AuthzCache::new(Arc::new(store.clone())), "Permission_");
        (store, dispatcher)
    }

    #[tokio::test]
    async fn grant_events_only_touch_the_grantee() {
        let (store, dispatcher) = seeded().await;
        dispatcher
            .publish(&DomainEvent::GrantDeactivated {
                grant_id: Uuid::new_v4(),
                user_id: "u-1".into(),
                permission_id: Uuid::new_v4(),
            })
            .await;

        assert!(!store.contains(&keys::user_permissions("u-1")));
        assert!(!store.contains(&keys::has_permission("u-1", "Reports.Export")));
        assert!(store.contains(&keys::user_permissions("u-2")));
        assert!(store.contains(&keys::endpoint("ReportsController", "Export", "POST")));
    }

    #[tokio::test]
    async fn endpoint_events_drop_one_entry() {
        let (store, dispatcher) = seeded().await;
        dispatcher
            .publish(&DomainEvent::EndpointRemoved {
                permission_id: Uuid::new_v4(),
                controller: "ReportsController".into(),
                action: "Export".into(),
                http_method: "post".into(),
            })
            .await;

        assert!(!store.contains(&keys::endpoint("ReportsController", "Export", "POST")));
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn permission_created_sweeps_auth_keys() {
        let (store, dispatcher) = seeded().await;
        dispatcher
            .publish_all(vec![DomainEvent::PermissionCreated {
                permission_id: Uuid::new_v4(),
                system_name: "Reports.Audit".into(),
            }])
            .await;

        assert_eq!(store.len(), 1);
        assert!(store.contains(&keys::policy("Permission_Reports.Export")));
    }

    #[tokio::test]
    async fn permission_update_drops_policy() {
        let (store, dispatcher) = seeded().await;
        dispatcher
            .publish(&DomainEvent::PermissionUpdated {
                permission_id: Uuid::new_v4(),
                system_name: "Reports.Export".into(),
            })
            .await;

        assert!(!store.contains(&keys::policy("Permission_Reports.Export")));
        assert!(store.contains(&keys::user_permissions("u-1")));
    }

    #[tokio::test]
    async fn handlers_are_idempotent() {
        let (store, dispatcher) = seeded().await;
        let event = DomainEvent::GrantCreated {
            grant_id: Uuid::new_v4(),
            user_id: "u-2".into(),
            permission_id: Uuid::new_v4(),
        };
        dispatcher.publish(&event).await;
        dispatcher.publish(&event).await;
        assert_eq!(store.len(), 4);
    }
}

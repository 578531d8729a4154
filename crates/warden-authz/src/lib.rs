//! Warden authorization engine: cache-aside reads over the permission
//! store, rule-guarded mutations, event-driven cache invalidation and
//! dynamic policy resolution.

pub mod cache;
pub mod config;
pub mod context;
pub mod events;
pub mod policy;
pub mod repository;
pub mod service;

pub use cache::{AuthzCache, MemoryCache};
pub use config::AuthzConfig;
pub use context::OperationContext;
pub use events::{DomainEventHandler, EventDispatcher};
pub use policy::{DynamicPolicyResolver, PermissionPolicy, PermissionRequirement, PolicyDecision};
pub use repository::AuthorizationRepository;
pub use service::{AuthorizationService, GrantQuery, PermissionQuery};

//! Domain models for Warden.
//!
//! Permission is the aggregate root for endpoint mappings; grants reference
//! a permission by id but have their own lifecycle. Every mutator records a
//! [`event::DomainEvent`] that is published after the change is persisted.

pub mod endpoint;
pub mod event;
pub mod grant;
pub mod permission;

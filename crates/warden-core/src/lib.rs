//! Warden Core: domain model, business rules, query specifications and
//! the storage/cache/access contracts shared by the other crates.

pub mod access;
pub mod cache;
pub mod error;
pub mod models;
pub mod repository;
pub mod rules;
pub mod specification;

//! Audit chain persistence.

pub mod jsonl_audit_store;

pub use jsonl_audit_store::JsonlAuditStore;

//! Warehouse-management-system glue: token fetch and bulk item import.

pub mod auth;
pub mod import;

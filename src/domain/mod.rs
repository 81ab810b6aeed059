//! Core domain types shared by every component of the order lifecycle
//! engine, one module per bounded concept, scoped to what spec §3 names.

pub mod basket;
pub mod money;
pub mod order;
pub mod product;
pub mod route;

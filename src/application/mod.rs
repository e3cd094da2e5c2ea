//! Application services and the ports they depend on.

pub mod engagement;
pub mod error;
pub mod repos;

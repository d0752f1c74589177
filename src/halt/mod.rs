//! Halt authority
//!
//! [`decide`] is the pure halt rule; [`HaltManager`] is the only writer of
//! the persisted [`crate::domain::HaltState`].

pub mod manager;

pub use manager::*;

//! # Utilities

pub mod layout;

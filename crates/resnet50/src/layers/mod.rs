//! Common low-level modules for adding layers and operations in Burn.
pub mod conv_norm;
pub mod padding;

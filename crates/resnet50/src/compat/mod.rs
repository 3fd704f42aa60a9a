//! # Compat
//!
//! Shape arithmetic which `burn` computes internally but does not expose.

pub mod conv_shape;

#![warn(missing_docs)]
//!# resnet50 - ResNet-50 for Burn
//!
//! ## Notable Components
//!
//! * [`compat`] - shape arithmetic shared by layers and graph summaries.
//!   * [`compat::conv_shape`] - conv / pool output size prediction.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::conv_norm`] - ``Conv2d + BatchNorm2d`` block with layer names.
//!   * [`layers::padding`] - TensorFlow-style ``SAME`` and explicit zero padding.
//! * [`models`] - complete models.
//!   * [`models::resnet50`] - `ResNet-50`, its blocks, stages, and graphs.
//! * [`utility`] - misc tensor helpers.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;
pub mod layers;
pub mod models;
pub mod utility;

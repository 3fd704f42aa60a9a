//! # Model Families

pub mod resnet50;

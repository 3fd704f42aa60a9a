//! # Layer Naming
//!
//! Layer names follow the published Keras `ResNet50`:
//!
//! ```text
//! res{stage}{block}_branch{branch}   (conv)
//! bn{stage}{block}_branch{branch}    (batch norm)
//! ```
//!
//! where `branch` is `1` for the projection shortcut and `2a`, `2b`, `2c`
//! for the three main-path units.

use serde::{Deserialize, Serialize};

/// Name of the stem conv.
pub const STEM_CONV_NAME: &str = "conv1";

/// Name of the stem batch norm.
pub const STEM_NORM_NAME: &str = "bn_conv1";

/// A branch of a residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
    /// Projection shortcut.
    Shortcut,

    /// First (1x1) main-path unit.
    MainA,

    /// Second (fxf) main-path unit.
    MainB,

    /// Third (1x1) main-path unit.
    MainC,
}

impl Branch {
    /// The main path units, in order.
    pub const MAIN: [Branch; 3] = [Branch::MainA, Branch::MainB, Branch::MainC];

    /// Branch suffix.
    pub fn suffix(&self) -> &'static str {
        match self {
            Branch::Shortcut => "1",
            Branch::MainA => "2a",
            Branch::MainB => "2b",
            Branch::MainC => "2c",
        }
    }
}

/// Block letter for the `index`-th block of a stage: `a`, `b`, `c`, ...
///
/// # Panics
///
/// If `index >= 26`.
pub fn block_letter(index: usize) -> char {
    assert!(index < 26, "block index {index} has no letter");
    (b'a' + index as u8) as char
}

/// Inverse of [`block_letter`].
pub fn block_index(block: char) -> Option<usize> {
    if block.is_ascii_lowercase() {
        Some((block as u8 - b'a') as usize)
    } else {
        None
    }
}

/// Naming basis of a residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockNames {
    /// Stage number.
    pub stage: usize,

    /// Block letter.
    pub block: char,
}

impl BlockNames {
    /// Create a naming basis.
    pub fn new(
        stage: usize,
        block: char,
    ) -> Self {
        Self { stage, block }
    }

    /// Conv layer name for a branch.
    pub fn conv(
        &self,
        branch: Branch,
    ) -> String {
        format!("res{}{}_branch{}", self.stage, self.block, branch.suffix())
    }

    /// Batch norm layer name for a branch.
    pub fn norm(
        &self,
        branch: Branch,
    ) -> String {
        format!("bn{}{}_branch{}", self.stage, self.block, branch.suffix())
    }
}

/// Name of the fully-connected classifier.
pub fn fc_name(num_classes: usize) -> String {
    format!("fc{num_classes}")
}

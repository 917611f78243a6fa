use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::memory::Pointer;

/// Bounds and tracking scope of one monitor. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum number of live items on any single byte's borrow stack.
    pub max_stack_depth: usize,
    /// Width of the borrow id space, in bits (`1..=64`).
    pub id_bits: u32,
    /// Track the borrow stack of this byte only. Every other byte behaves as if
    /// unmonitored: pushes are skipped and validations pass.
    pub focus: Option<Pointer>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 32,
            id_bits: 32,
            focus: None,
        }
    }
}

impl MonitorConfig {
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn with_id_bits(mut self, bits: u32) -> Self {
        self.id_bits = bits;
        self
    }

    pub fn with_focus(mut self, focus: Pointer) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_stack_depth == 0 {
            return Err(Error::Config("max_stack_depth must be at least 1".into()));
        }
        if !(1..=64).contains(&self.id_bits) {
            return Err(Error::Config(format!(
                "id_bits must be between 1 and 64, got {}",
                self.id_bits
            )));
        }
        Ok(())
    }

    /// Whether the stack of `ptr` is tracked under this configuration.
    pub fn tracks(&self, ptr: Pointer) -> bool {
        self.focus.is_none_or(|focus| focus == ptr)
    }
}

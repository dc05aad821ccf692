// id.rs: Stable arena handles for the stencil IR
//
// Apply regions, temporaries and external buffers live in per-function arenas
// and reference each other through these integer handles. Handles are never
// reused within a function: deleting an apply region leaves a tombstone, so a
// stale handle resolves to `None` instead of aliasing a newer operator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle of an apply region within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplyId(pub u32);

/// Handle of a temporary within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempId(pub u32);

/// Handle of an external (non-stencil) input buffer within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

/// SSA value inside an apply body: the index of the defining op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl ApplyId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TempId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BufferId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

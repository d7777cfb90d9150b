// src/retention.rs

use crate::config::FolderPolicy;

/// Outcome of checking one folder snapshot against its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within bounds.
    Keep,
    /// Over a bound with more than one image left: evict the oldest.
    Evict,
    /// Over a bound, but deleting would remove the last remaining image.
    Stuck,
}

/// Pure retention check. Either threshold alone triggers cleanup, but a
/// folder holding one image or fewer is never shrunk further.
pub fn evaluate(policy: &FolderPolicy, current_size_gib: f64, image_count: usize) -> Decision {
    let over_size = current_size_gib > policy.max_size_gib;
    let over_count = image_count > policy.max_count;

    if !(over_size || over_count) {
        return Decision::Keep;
    }
    if image_count <= 1 {
        return Decision::Stuck;
    }
    Decision::Evict
}

pub fn needs_cleanup(policy: &FolderPolicy, current_size_gib: f64, image_count: usize) -> bool {
    evaluate(policy, current_size_gib, image_count) == Decision::Evict
}

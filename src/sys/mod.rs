// Filesystem-facing managers. Contracts live in `traits`, implementations beside them.

pub mod traits;     // Global contracts
pub mod catalog;    // Image discovery & ordering
pub mod deleter;    // Eviction & orphan sweep
pub mod usage;      // Folder size & disk statistics
pub mod manifest;   // Surviving images for the menu renderer

#[cfg(test)]
pub mod fixtures;

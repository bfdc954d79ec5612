//! Data layer: core types, metadata loading and the unmatched-path policy.
//!
//! Architecture:
//! ```text
//!  HAM10000_metadata.csv      HAM10000_images_part_*/*.jpg
//!        │                              │
//!        ▼                              ▼
//!   ┌──────────┐                 ┌─────────────────┐
//!   │  loader   │ read_metadata   │ discover_images │  stem → path
//!   └──────────┘                 └─────────────────┘
//!        │          attach_paths + impute_missing_age
//!        ▼
//!   ┌──────────┐
//!   │  filter   │  UnmatchedPolicy: drop + warn, or fail
//!   └──────────┘
//!        │
//!        ▼
//!     Vec<Record>
//! ```
pub mod filter;
pub mod loader;
pub mod model;

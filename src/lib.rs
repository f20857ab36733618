//! volmerge: consolidation of two legacy volumes into one
//!
//! A phased, resumable pipeline that overlays the `UNOE` and `DOSE` source
//! trees onto the `UNO` destination under a declarative taxonomy, resolves
//! content conflicts by a strict newer/larger policy with keep-both
//! fallback, records per-file provenance keyed by SHA-256, verifies content
//! preservation across hardlink deduplication with a conflict-biased hash
//! sample, and emits a creation-time manifest for the Windows-side restore
//! tool.
//!
//! All state between phases lives in a per-run log directory on the
//! destination volume; any phase can be re-run idempotently for the same
//! run identifier.

pub mod cli;
pub mod collision;
pub mod config;
pub mod copy;
pub mod csvio;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod phases;
pub mod provenance;
pub mod sampler;
pub mod taxonomy;
pub mod verify;

pub use error::{MergeError, Result};

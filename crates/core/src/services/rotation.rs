//! Content rotation.
//!
//! When a campaign supplies variant lists (from-names, subjects) instead of
//! fixed values, a rotation strategy picks the variant per recipient. The
//! selection policy is pluggable; round-robin by recipient index is the
//! default because it is deterministic and therefore stable across
//! pause/resume.

use rand::Rng;

/// Picks one variant for a recipient.
pub trait RotationStrategy: Send + Sync {
    /// Select a variant for the recipient at `index`. Returns `None` when
    /// the variant list is empty.
    fn select<'a>(&self, variants: &'a [String], index: u64) -> Option<&'a str>;
}

/// Deterministic round-robin by recipient index.
#[derive(Clone, Copy, Default)]
pub struct RoundRobinRotation;

impl RotationStrategy for RoundRobinRotation {
    fn select<'a>(&self, variants: &'a [String], index: u64) -> Option<&'a str> {
        if variants.is_empty() {
            return None;
        }
        variants
            .get((index % variants.len() as u64) as usize)
            .map(String::as_str)
    }
}

/// Uniform random selection. Not resume-stable; offered as an alternative.
#[derive(Clone, Copy, Default)]
pub struct UniformRandomRotation;

impl RotationStrategy for UniformRandomRotation {
    fn select<'a>(&self, variants: &'a [String], _index: u64) -> Option<&'a str> {
        if variants.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..variants.len());
        variants.get(i).map(String::as_str)
    }
}

//! Plan digests
//!
//! A digest is the SHA-256 of the canonical JSON form of a [`PlanReport`].
//! Reports list everything by display name in sorted order, so interning
//! order and worker count never leak into the digest.

use sha2::{Digest, Sha256};

use super::PlanReport;

/// Hex-encoded SHA-256 of a plan report
pub fn digest(report: &PlanReport) -> String {
    let mut hasher = Sha256::new();
    // Serializing plain structs of strings, bools and enums cannot fail
    let bytes = serde_json::to_vec(report).unwrap_or_default();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{MetadataTier, TypeReport};

    fn report(tier: MetadataTier) -> PlanReport {
        PlanReport {
            types: vec![TypeReport {
                name: "App.Thing".to_string(),
                tier,
                browsable: true,
                handle: true,
                interfaces: Vec::new(),
            }],
            ..PlanReport::default()
        }
    }

    #[test]
    fn test_digest_is_stable() {
        let a = digest(&report(MetadataTier::Full));
        assert_eq!(a, digest(&report(MetadataTier::Full)));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_digest_sees_tier_changes() {
        assert_ne!(
            digest(&report(MetadataTier::Full)),
            digest(&report(MetadataTier::NecessaryOnly))
        );
    }
}

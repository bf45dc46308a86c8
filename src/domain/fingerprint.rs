//! Content fingerprints for cache keys.
//!
//! A fingerprint is the SHA-256 of an indicator's canonical expression text,
//! its parameters in sorted order, the fingerprints of the indicators it
//! reads, and the data identity. Every component is length-prefixed so that
//! no two distinct inputs share an encoding.

use crate::domain::series::DataIdentity;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(
        canonical: &str,
        parameters: &BTreeMap<String, f64>,
        dependencies: &BTreeMap<String, Fingerprint>,
        identity: &DataIdentity,
    ) -> Fingerprint {
        let mut hasher = Sha256::new();
        field(&mut hasher, b"expr", canonical.as_bytes());

        hasher.update((parameters.len() as u64).to_le_bytes());
        for (name, value) in parameters {
            field(&mut hasher, b"param", name.as_bytes());
            // -0.0 and 0.0 select the same computation
            let value = if *value == 0.0 { 0.0f64 } else { *value };
            hasher.update(value.to_bits().to_le_bytes());
        }

        hasher.update((dependencies.len() as u64).to_le_bytes());
        for (name, fp) in dependencies {
            field(&mut hasher, b"dep", name.as_bytes());
            hasher.update(fp.0);
        }

        field(&mut hasher, b"data", identity.to_string().as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Fingerprint(out)
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

fn field(hasher: &mut Sha256, tag: &[u8], bytes: &[u8]) {
    hasher.update(tag);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(rows: usize) -> DataIdentity {
        DataIdentity {
            symbol: "BHP".into(),
            interval: "1d".into(),
            start: None,
            end: None,
            rows,
        }
    }

    fn params(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn fp(canonical: &str, p: &[(&str, f64)], rows: usize) -> Fingerprint {
        Fingerprint::compute(canonical, &params(p), &BTreeMap::new(), &identity(rows))
    }

    #[test]
    fn stable_for_identical_inputs() {
        assert_eq!(fp("close", &[("n", 3.0)], 10), fp("close", &[("n", 3.0)], 10));
    }

    #[test]
    fn each_component_changes_the_fingerprint() {
        let base = fp("close", &[("n", 3.0)], 10);
        assert_ne!(base, fp("open", &[("n", 3.0)], 10));
        assert_ne!(base, fp("close", &[("n", 4.0)], 10));
        assert_ne!(base, fp("close", &[("m", 3.0)], 10));
        assert_ne!(base, fp("close", &[("n", 3.0)], 11));
        assert_ne!(base, fp("close", &[], 10));
    }

    #[test]
    fn parameter_insertion_order_is_irrelevant() {
        let mut a = BTreeMap::new();
        a.insert("a".to_string(), 1.0);
        a.insert("b".to_string(), 2.0);
        let mut b = BTreeMap::new();
        b.insert("b".to_string(), 2.0);
        b.insert("a".to_string(), 1.0);
        let none = BTreeMap::new();
        assert_eq!(
            Fingerprint::compute("x", &a, &none, &identity(1)),
            Fingerprint::compute("x", &b, &none, &identity(1))
        );
    }

    #[test]
    fn length_prefix_prevents_concatenation_collisions() {
        assert_ne!(fp("ab", &[("c", 1.0)], 1), fp("a", &[("bc", 1.0)], 1));
    }

    #[test]
    fn dependency_fingerprints_are_folded_in() {
        let none = BTreeMap::new();
        let dep_a: BTreeMap<String, Fingerprint> = [("fast".to_string(), fp("close", &[], 1))].into();
        let dep_b: BTreeMap<String, Fingerprint> = [("fast".to_string(), fp("open", &[], 1))].into();
        let a = Fingerprint::compute("fast", &none, &dep_a, &identity(1));
        let b = Fingerprint::compute("fast", &none, &dep_b, &identity(1));
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_lower_hex() {
        let f = fp("close", &[], 1);
        let text = f.to_string();
        assert_eq!(text.len(), 64);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(text.starts_with(&f.short()));
    }
}

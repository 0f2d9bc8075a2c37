//! SKU delta computation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::aggregate::LabelCount;

/// Signed quantity change for one SKU across a door cycle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkuDelta {
    #[serde(rename = "SKU")]
    pub sku: String,
    pub delta: i64,
}

impl SkuDelta {
    pub fn new(sku: impl Into<String>, delta: i64) -> Self {
        Self {
            sku: sku.into(),
            delta,
        }
    }
}

/// Read-only mapping from detector label to SKU.
///
/// Labels without an entry map to the empty SKU rather than failing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkuMapping(HashMap<String, String>);

impl SkuMapping {
    /// Parse a JSON object of `label → SKU`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: HashMap<String, String> =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid sku mapping: {}", e))?;
        Ok(Self(entries))
    }

    /// Load the mapping file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sku mapping file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn sku(&self, label: &str) -> &str {
        self.0.get(label).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SkuMapping {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Diff two snapshots into per-SKU deltas.
///
/// Labels with equal counts produce nothing. Labels only in `baseline` are
/// fully removed, labels only in `final_count` newly appeared. Result order is
/// unspecified.
pub fn compute_delta(
    baseline: &LabelCount,
    final_count: &LabelCount,
    skus: &SkuMapping,
) -> Vec<SkuDelta> {
    let mut deltas = Vec::new();

    for (label, before) in baseline.iter() {
        match final_count.get(label) {
            Some(after) if after == before => {}
            Some(after) => deltas.push(SkuDelta::new(
                skus.sku(label),
                i64::from(after) - i64::from(before),
            )),
            None => deltas.push(SkuDelta::new(skus.sku(label), -i64::from(before))),
        }
    }

    for (label, after) in final_count.iter() {
        if baseline.get(label).is_none() {
            deltas.push(SkuDelta::new(skus.sku(label), i64::from(after)));
        }
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn counts(entries: &[(&str, u32)]) -> LabelCount {
        entries.iter().map(|(l, c)| (*l, *c)).collect()
    }

    fn skus() -> SkuMapping {
        [
            ("sprite", "4900002470"),
            ("gatorade", "4900002510"),
            ("pringles", "4900002525"),
            ("ruffles", "4900002520"),
        ]
        .into_iter()
        .collect()
    }

    fn as_set(deltas: Vec<SkuDelta>) -> HashSet<SkuDelta> {
        deltas.into_iter().collect()
    }

    #[test]
    fn door_cycle_example() {
        let baseline = counts(&[("sprite", 2), ("gatorade", 2), ("pringles", 1)]);
        let final_count = counts(&[("sprite", 1), ("gatorade", 1), ("ruffles", 2)]);

        let got = as_set(compute_delta(&baseline, &final_count, &skus()));
        let want: HashSet<_> = [
            SkuDelta::new("4900002525", -1),
            SkuDelta::new("4900002470", -1),
            SkuDelta::new("4900002510", -1),
            SkuDelta::new("4900002520", 2),
        ]
        .into_iter()
        .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let snapshot = counts(&[("sprite", 3), ("heinz", 1)]);
        assert!(compute_delta(&snapshot, &snapshot, &skus()).is_empty());
        assert!(compute_delta(&LabelCount::new(), &LabelCount::new(), &skus()).is_empty());
    }

    #[test]
    fn swapping_snapshots_negates_shared_labels() {
        let a = counts(&[("sprite", 4), ("gatorade", 1)]);
        let b = counts(&[("sprite", 1), ("gatorade", 3)]);
        let forward = compute_delta(&a, &b, &skus());
        let backward = compute_delta(&b, &a, &skus());
        for delta in &forward {
            let reverse = backward.iter().find(|d| d.sku == delta.sku).unwrap();
            assert_eq!(reverse.delta, -delta.delta);
        }
        assert_eq!(forward.len(), backward.len());
    }

    #[test]
    fn unmapped_label_passes_through_as_empty_sku() {
        let baseline = counts(&[("heinz", 1)]);
        let deltas = compute_delta(&baseline, &LabelCount::new(), &skus());
        assert_eq!(deltas, vec![SkuDelta::new("", -1)]);
    }

    #[test]
    fn serializes_with_upper_case_sku_key() {
        let json = serde_json::to_string(&[SkuDelta::new("4900002520", 2)]).unwrap();
        assert_eq!(json, r#"[{"SKU":"4900002520","delta":2}]"#);
    }

    #[test]
    fn mapping_loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skumapping.json");
        std::fs::write(&path, r#"{"sprite":"4900002470"}"#).unwrap();
        let mapping = SkuMapping::load(&path).unwrap();
        assert_eq!(mapping.sku("sprite"), "4900002470");
        assert_eq!(mapping.sku("ruffles"), "");

        assert!(SkuMapping::load(dir.path().join("missing.json")).is_err());
        assert!(SkuMapping::from_json("[1, 2]").is_err());
    }
}

//! Detection aggregation: confidence filtering and per-label counting.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::collections::BTreeMap;

use crate::detect::DetectionRecord;
use crate::overlay;

/// Labels emitted by the product detection model, indexed by label id.
pub const PRODUCT_LABELS: &[&str] = &[
    "background_label",
    "undefined",
    "sprite",
    "kool-aid",
    "extra",
    "ocelo",
    "finish",
    "mtn_dew",
    "best_foods",
    "gatorade",
    "heinz",
    "ruffles",
    "pringles",
    "del_monte",
];

/// Ordered label table of the detection model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(anyhow!("label table must not be empty"));
        }
        Ok(Self { labels })
    }

    /// Resolve a raw label id.
    ///
    /// Ids that are negative, fractional, non-finite or past the end of the
    /// table are rejected: they mean the model and the table disagree.
    pub fn name(&self, label_id: f32) -> Result<&str> {
        if !label_id.is_finite() || label_id < 0.0 || label_id.fract() != 0.0 {
            return Err(anyhow!("invalid label id {}", label_id));
        }
        self.labels
            .get(label_id as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                anyhow!(
                    "label id {} out of range for {} known labels",
                    label_id,
                    self.labels.len()
                )
            })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|known| known == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self {
            labels: PRODUCT_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Per-label product counts for one snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelCount(BTreeMap<String, u32>);

impl LabelCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, label: &str) {
        *self.0.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, label: &str) -> Option<u32> {
        self.0.get(label).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(label, count)| (label.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of counted products.
    pub fn total(&self) -> u64 {
        self.0.values().map(|c| u64::from(*c)).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for LabelCount {
    fn from_iter<T: IntoIterator<Item = (S, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(l, c)| (l.into(), c)).collect())
    }
}

/// Turns raw detector records into a `LabelCount`.
#[derive(Clone, Debug)]
pub struct Aggregator {
    threshold: f32,
    labels: LabelTable,
}

impl Aggregator {
    pub fn new(threshold: f32, labels: LabelTable) -> Self {
        Self { threshold, labels }
    }

    /// Count records whose confidence is strictly above the threshold.
    pub fn count(&self, records: &[DetectionRecord]) -> Result<LabelCount> {
        self.count_annotated(records, None)
    }

    /// Count records and draw every counted one on `frame`.
    ///
    /// Fails on the first counted record whose label id is not in the table.
    pub fn count_annotated(
        &self,
        records: &[DetectionRecord],
        mut frame: Option<&mut RgbImage>,
    ) -> Result<LabelCount> {
        let mut counts = LabelCount::new();
        for record in records.iter().filter(|r| r.confidence > self.threshold) {
            let label = self.labels.name(record.label_id)?;
            if let Some(img) = frame.as_deref_mut() {
                overlay::draw_detection(img, label, record.bbox);
            }
            counts.increment(label);
        }
        log::debug!("counted {:?}", counts);
        Ok(counts)
    }
}

//! Per-epoch training record returned by `fit`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Loss and metrics of one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based.
    pub epoch: usize,
    pub loss: f64,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub val_metrics: BTreeMap<String, f64>,
}

impl EpochRecord {
    /// Look up a value by history key: `loss`, `val_loss`, a metric name, or
    /// `val_` followed by a metric name.
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "loss" => Some(self.loss),
            "val_loss" => self.val_loss,
            _ => match key.strip_prefix("val_") {
                Some(metric) => self.val_metrics.get(metric).copied(),
                None => self.metrics.get(key).copied(),
            },
        }
    }
}

/// Per-epoch record of a `fit` call, one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    epochs: Vec<EpochRecord>,
}

impl History {
    pub(crate) fn from_records(epochs: Vec<EpochRecord>) -> Self {
        Self { epochs }
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn epochs(&self) -> &[EpochRecord] {
        &self.epochs
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Values of `key` for every epoch, or `None` if some epoch lacks it.
    pub fn series(&self, key: &str) -> Option<Vec<f64>> {
        self.epochs.iter().map(|record| record.get(key)).collect()
    }

    /// All keys present in the first epoch, Keras style.
    pub fn keys(&self) -> Vec<String> {
        let Some(first) = self.epochs.first() else {
            return Vec::new();
        };
        let mut keys = vec!["loss".to_string()];
        keys.extend(first.metrics.keys().cloned());
        if first.val_loss.is_some() {
            keys.push("val_loss".to_string());
        }
        keys.extend(first.val_metrics.keys().map(|k| format!("val_{k}")));
        keys
    }

    /// Epoch (1-based) with the lowest value of `key`.
    pub fn best_epoch(&self, key: &str) -> Option<usize> {
        self.epochs
            .iter()
            .filter_map(|record| record.get(key).map(|value| (record.epoch, value)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(epoch, _)| epoch)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, loss: f64, val_loss: Option<f64>) -> EpochRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert("accuracy".to_string(), 0.5 + epoch as f64 / 10.0);
        let val_metrics = match val_loss {
            Some(_) => metrics.clone(),
            None => BTreeMap::new(),
        };
        EpochRecord {
            epoch,
            loss,
            metrics,
            val_loss,
            val_metrics,
        }
    }

    #[test]
    fn test_series_and_keys() {
        let history = History::from_records(vec![
            record(1, 0.9, Some(1.0)),
            record(2, 0.6, Some(0.7)),
            record(3, 0.5, Some(0.8)),
        ]);
        assert_eq!(history.series("loss").unwrap(), vec![0.9, 0.6, 0.5]);
        assert_eq!(history.series("val_loss").unwrap(), vec![1.0, 0.7, 0.8]);
        assert_eq!(history.series("val_accuracy").unwrap().len(), 3);
        assert!(history.series("mae").is_none());
        assert_eq!(
            history.keys(),
            vec!["loss", "accuracy", "val_loss", "val_accuracy"]
        );
        assert_eq!(history.best_epoch("val_loss"), Some(2));
    }

    #[test]
    fn test_no_validation() {
        let history = History::from_records(vec![record(1, 0.4, None)]);
        assert!(history.series("val_loss").is_none());
        assert_eq!(history.keys(), vec!["loss", "accuracy"]);
    }

    #[test]
    fn test_json_roundtrip() {
        let history = History::from_records(vec![record(1, 0.4, Some(0.5))]);
        let json = history.to_json().unwrap();
        let parsed: History = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, history);
    }
}

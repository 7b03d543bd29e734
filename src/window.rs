//! Sliding window aggregation
//!
//! This module keeps the last `window_seconds * fps` frame snapshots and
//! summarizes them once per elapsed window. AU channels are summarized by
//! their 95th percentile; meta signals come from the newest frame.

use crate::types::{ActionUnits, MetaSignals};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Occupancy required before a window may be summarized
pub const AGGREGATION_FILL_RATIO: f64 = 0.8;
/// Occupancy at which frame results are reported stable
pub const STABLE_FILL_RATIO: f64 = 0.3;
/// Samples needed before timing classification
const MIN_TIMING_SAMPLES: usize = 10;
/// Fraction of the peak that counts as "active"
const TIMING_CUT_RATIO: f64 = 0.6;

/// One processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferEntry {
    pub aus: ActionUnits,
    pub meta: MetaSignals,
    pub timestamp: DateTime<Utc>,
}

/// Summary handed to the decision scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub aus: ActionUnits,
    pub meta: MetaSignals,
    pub frame_count: usize,
    pub ended_at: DateTime<Utc>,
}

/// Duration class of a recent expression peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionTiming {
    /// 40-500 ms and already decayed
    Micro,
    /// 40-500 ms and still above the cut level
    Pending,
    /// 500 ms or longer
    Macro,
}

/// Value at index `floor(n * 0.95)` of the ascending sort
pub fn percentile_95(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let idx = ((values.len() as f64 * 0.95).floor() as usize).min(values.len() - 1);
    values[idx]
}

#[derive(Debug, Clone)]
pub struct WindowAggregator {
    entries: VecDeque<BufferEntry>,
    capacity: usize,
    window_seconds: f64,
    fps: u32,
    /// Start of the current aggregation window; set by the first frame
    last_aggregation: Option<DateTime<Utc>>,
}

impl WindowAggregator {
    pub fn new(window_seconds: f64, fps: u32) -> Self {
        let capacity = (window_seconds * fps as f64).floor() as usize;
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            window_seconds,
            fps,
            last_aggregation: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_stable(&self) -> bool {
        self.entries.len() as f64 >= self.capacity as f64 * STABLE_FILL_RATIO
    }

    pub fn entries(&self) -> impl Iterator<Item = &BufferEntry> {
        self.entries.iter()
    }

    /// Append a frame; returns a summary when a window elapses with enough frames
    pub fn push(&mut self, entry: BufferEntry) -> Option<WindowSummary> {
        let now = entry.timestamp;
        let window_start = *self.last_aggregation.get_or_insert(now);

        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }

        let elapsed = (now - window_start).num_milliseconds() as f64 / 1000.0;
        if elapsed < self.window_seconds {
            return None;
        }

        if (self.entries.len() as f64) < self.capacity as f64 * AGGREGATION_FILL_RATIO {
            debug!(
                buffered = self.entries.len(),
                capacity = self.capacity,
                "window elapsed with too few frames, skipping aggregation"
            );
            return None;
        }

        let summary = self.summarize()?;
        self.last_aggregation = Some(now);
        Some(summary)
    }

    /// Percentile summary of the current buffer
    pub fn summarize(&self) -> Option<WindowSummary> {
        let first = self.entries.front()?;
        let last = self.entries.back()?;

        let aus = first
            .aus
            .keys()
            .map(|code| {
                let mut values: Vec<f64> = self
                    .entries
                    .iter()
                    .map(|e| e.aus.get(code).copied().unwrap_or(0.0))
                    .collect();
                (code.clone(), percentile_95(&mut values))
            })
            .collect();

        Some(WindowSummary {
            aus,
            meta: last.meta,
            frame_count: self.entries.len(),
            ended_at: last.timestamp,
        })
    }

    /// Drop all frames; the aggregation clock restarts at the next frame
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_aggregation = None;
    }

    /// Classify the most recent peak of one AU by how long it stayed active
    pub fn classify_timing(&self, au: &str, threshold: f64) -> Option<ExpressionTiming> {
        let history: Vec<f64> = self
            .entries
            .iter()
            .filter_map(|e| e.aus.get(au).copied())
            .collect();
        if history.len() < MIN_TIMING_SAMPLES {
            return None;
        }

        let peak = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if peak < threshold {
            return None;
        }

        let cut_level = peak * TIMING_CUT_RATIO;
        let active = history.iter().filter(|v| **v > cut_level).count();
        let duration_ms = active as f64 / self.fps as f64 * 1000.0;

        if duration_ms < 40.0 {
            None
        } else if duration_ms < 500.0 {
            let latest = history.last().copied().unwrap_or(0.0);
            if latest < cut_level {
                Some(ExpressionTiming::Micro)
            } else {
                Some(ExpressionTiming::Pending)
            }
        } else {
            Some(ExpressionTiming::Macro)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    fn entry(au4: f64, at: DateTime<Utc>) -> BufferEntry {
        let mut aus = ActionUnits::new();
        aus.insert("AU4".to_string(), au4);
        BufferEntry {
            aus,
            meta: MetaSignals::default(),
            timestamp: at,
        }
    }

    #[test]
    fn test_capacity_and_eviction() {
        let mut agg = WindowAggregator::new(4.0, 30);
        assert_eq!(agg.capacity(), 120);
        for i in 0..150 {
            agg.push(entry(0.0, t0() + Duration::milliseconds(i)));
        }
        assert_eq!(agg.len(), 120);
        assert!(agg.is_stable());
    }

    #[test]
    fn test_stable_from_thirty_percent_fill() {
        let mut agg = WindowAggregator::new(4.0, 30);
        for i in 0..35 {
            agg.push(entry(0.0, t0() + Duration::milliseconds(i)));
        }
        assert_eq!(agg.len(), 35);
        assert!(!agg.is_stable());

        agg.push(entry(0.0, t0() + Duration::milliseconds(35)));
        assert_eq!(agg.len(), 36);
        assert!(agg.is_stable());
    }

    #[test]
    fn test_no_aggregation_below_fill_ratio() {
        let mut agg = WindowAggregator::new(4.0, 30);
        // 100 ms per frame: the window elapses after 40 frames
        let mut fired_at = None;
        for i in 0..120 {
            let summary = agg.push(entry(0.5, t0() + Duration::milliseconds(100 * i)));
            if summary.is_some() && fired_at.is_none() {
                fired_at = Some(agg.len());
            }
        }
        assert_eq!(fired_at, Some(96));
    }

    #[test]
    fn test_clock_resets_after_aggregation() {
        let mut agg = WindowAggregator::new(1.0, 10);
        let mut fired = Vec::new();
        for i in 0..31 {
            if agg.push(entry(0.1, t0() + Duration::milliseconds(100 * i))).is_some() {
                fired.push(i);
            }
        }
        assert_eq!(fired, vec![10, 20, 30]);
    }

    #[test]
    fn test_percentile_index() {
        let mut values: Vec<f64> = (0..100).rev().map(|v| v as f64 / 100.0).collect();
        assert_eq!(percentile_95(&mut values), 0.95);

        let mut few = vec![0.3, 0.1, 0.2];
        // floor(3 * 0.95) = 2
        assert_eq!(percentile_95(&mut few), 0.3);
    }

    #[test]
    fn test_summary_uses_first_entry_keys_and_latest_meta() {
        let mut agg = WindowAggregator::new(1.0, 10);
        for i in 0..9 {
            agg.push(entry(i as f64 / 10.0, t0() + Duration::milliseconds(100 * i)));
        }
        let mut last = entry(0.0, t0() + Duration::milliseconds(900));
        last.aus.insert("AU12".to_string(), 1.0);
        last.meta.is_speaking = true;
        agg.push(last);

        let summary = agg.summarize().unwrap();
        assert_eq!(summary.aus.keys().collect::<Vec<_>>(), vec!["AU4"]);
        assert_eq!(summary.aus["AU4"], 0.8);
        assert!(summary.meta.is_speaking);
    }

    #[test]
    fn test_clear_restarts_clock() {
        let mut agg = WindowAggregator::new(1.0, 10);
        for i in 0..8 {
            agg.push(entry(0.1, t0() + Duration::milliseconds(100 * i)));
        }
        agg.clear();
        assert!(agg.is_empty());

        // A frame long after the old window start must not aggregate immediately
        let late = t0() + Duration::seconds(60);
        assert!(agg.push(entry(0.1, late)).is_none());
    }

    fn timing_agg(values: &[f64]) -> WindowAggregator {
        let mut agg = WindowAggregator::new(4.0, 30);
        for (i, v) in values.iter().enumerate() {
            agg.push(entry(*v, t0() + Duration::milliseconds(33 * i as i64)));
        }
        agg
    }

    #[test]
    fn test_classify_timing() {
        let mut micro = vec![0.0; 20];
        micro[10..14].fill(0.8);
        assert_eq!(
            timing_agg(&micro).classify_timing("AU4", 0.35),
            Some(ExpressionTiming::Micro)
        );

        let mut pending = vec![0.0; 20];
        pending[16..20].fill(0.8);
        assert_eq!(
            timing_agg(&pending).classify_timing("AU4", 0.35),
            Some(ExpressionTiming::Pending)
        );

        let mut sustained = vec![0.0; 40];
        sustained[5..25].fill(0.8);
        assert_eq!(
            timing_agg(&sustained).classify_timing("AU4", 0.35),
            Some(ExpressionTiming::Macro)
        );

        let mut glitch = vec![0.0; 20];
        glitch[3] = 0.8;
        assert_eq!(timing_agg(&glitch).classify_timing("AU4", 0.35), None);

        assert_eq!(timing_agg(&[0.2; 20]).classify_timing("AU4", 0.35), None);
        assert_eq!(timing_agg(&[0.9; 5]).classify_timing("AU4", 0.35), None);
    }
}

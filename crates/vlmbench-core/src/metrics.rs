use std::collections::BTreeMap;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::{Result, VlmBenchError};

/// Measurements from one timed run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunMetrics {
    pub run: u32,
    pub ttft_secs: f64,
    pub total_time_secs: f64,
    pub output_tokens: u32,
    pub vram_before_mb: u64,
    pub vram_used_mb: u64,
}

impl RunMetrics {
    /// Builds the metrics for a finished run. A run that never observed a
    /// content fragment has no TTFT and is rejected.
    pub fn new(
        run: u32,
        ttft_secs: Option<f64>,
        total_time_secs: f64,
        output_tokens: u32,
        vram_before_mb: u64,
        vram_used_mb: u64,
    ) -> Result<Self> {
        let ttft_secs = ttft_secs.ok_or(VlmBenchError::NoContent { run })?;
        Ok(Self {
            run,
            ttft_secs,
            total_time_secs,
            output_tokens,
            vram_before_mb,
            vram_used_mb,
        })
    }

    pub fn generation_time_secs(&self) -> f64 {
        self.total_time_secs - self.ttft_secs
    }

    /// Output tokens per second of generation, 0 when no generation time elapsed.
    pub fn throughput(&self) -> f64 {
        let generation = self.generation_time_secs();
        if generation > 0.0 {
            self.output_tokens as f64 / generation
        } else {
            0.0
        }
    }
}

/// Serialized with the derived generation time and throughput alongside the
/// measured fields.
impl Serialize for RunMetrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RunMetrics", 8)?;
        state.serialize_field("run", &self.run)?;
        state.serialize_field("ttft_secs", &self.ttft_secs)?;
        state.serialize_field("total_time_secs", &self.total_time_secs)?;
        state.serialize_field("generation_time_secs", &self.generation_time_secs())?;
        state.serialize_field("output_tokens", &self.output_tokens)?;
        state.serialize_field("throughput", &self.throughput())?;
        state.serialize_field("vram_before_mb", &self.vram_before_mb)?;
        state.serialize_field("vram_used_mb", &self.vram_used_mb)?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Ttft,
    Throughput,
    TotalTime,
    VramUsed,
    OutputTokens,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Ttft,
        Metric::Throughput,
        Metric::TotalTime,
        Metric::VramUsed,
        Metric::OutputTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Ttft => "ttft",
            Metric::Throughput => "throughput",
            Metric::TotalTime => "total_time",
            Metric::VramUsed => "vram_used",
            Metric::OutputTokens => "output_tokens",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Ttft => "TTFT",
            Metric::Throughput => "Throughput",
            Metric::TotalTime => "Total Time",
            Metric::VramUsed => "VRAM Used",
            Metric::OutputTokens => "Output Tokens",
        }
    }
}

/// Per-metric sequences of timed-run values, in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsLedger {
    values: BTreeMap<Metric, Vec<f64>>,
}

impl MetricsLedger {
    pub fn new() -> Self {
        Self {
            values: Metric::ALL.iter().map(|m| (*m, Vec::new())).collect(),
        }
    }

    pub fn record(&mut self, run: &RunMetrics) {
        self.push(Metric::Ttft, run.ttft_secs);
        self.push(Metric::Throughput, run.throughput());
        self.push(Metric::TotalTime, run.total_time_secs);
        self.push(Metric::VramUsed, run.vram_used_mb as f64);
        self.push(Metric::OutputTokens, run.output_tokens as f64);
    }

    pub(crate) fn push(&mut self, metric: Metric, value: f64) {
        self.values.entry(metric).or_default().push(value);
    }

    pub fn values(&self, metric: Metric) -> &[f64] {
        self.values.get(&metric).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of recorded runs.
    pub fn len(&self) -> usize {
        self.values(Metric::Throughput).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mean(&self, metric: Metric) -> Result<f64> {
        let values = self.values(metric);
        if values.is_empty() {
            return Err(VlmBenchError::EmptyLedger(metric.as_str()));
        }
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn averages(&self) -> Result<Averages> {
        Ok(Averages {
            ttft: self.mean(Metric::Ttft)?,
            throughput: self.mean(Metric::Throughput)?,
            total_time: self.mean(Metric::TotalTime)?,
            vram_used: self.mean(Metric::VramUsed)?,
            output_tokens: self.mean(Metric::OutputTokens)?,
        })
    }
}

impl Default for MetricsLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub ttft: f64,
    pub throughput: f64,
    pub total_time: f64,
    pub vram_used: f64,
    pub output_tokens: f64,
}

impl Averages {
    /// Metrics printed in the report, in report order.
    pub fn reported(&self) -> [(Metric, f64); 4] {
        [
            (Metric::Throughput, self.throughput),
            (Metric::TotalTime, self.total_time),
            (Metric::VramUsed, self.vram_used),
            (Metric::OutputTokens, self.output_tokens),
        ]
    }
}

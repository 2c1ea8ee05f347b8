//! Observation hooks for classifier internals.
//!
//! Sinks only watch; whatever they return never changes the classification.

use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DebugValue {
    Number(f32),
    Flag(bool),
    Unset,
}

impl From<f32> for DebugValue {
    fn from(v: f32) -> Self {
        DebugValue::Number(v)
    }
}

impl From<bool> for DebugValue {
    fn from(v: bool) -> Self {
        DebugValue::Flag(v)
    }
}

impl From<Option<f32>> for DebugValue {
    fn from(v: Option<f32>) -> Self {
        v.map_or(DebugValue::Unset, DebugValue::Number)
    }
}

/// Receives the classifier's intermediate values while a frame is evaluated.
///
/// Returned errors are logged and dropped. A sink must not panic: panics are
/// not caught and unwind through the classifier.
pub trait DebugSink {
    fn record(&mut self, label: &'static str, value: DebugValue) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DebugSink for NoopSink {
    fn record(&mut self, _label: &'static str, _value: DebugValue) -> Result<()> {
        Ok(())
    }
}

/// Collects values into a JSON object; later labels overwrite earlier ones.
#[derive(Debug, Default)]
pub struct JsonDebugSink {
    values: serde_json::Map<String, serde_json::Value>,
}

impl JsonDebugSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand back the collected values, leaving the sink empty for the next frame.
    pub fn take(&mut self) -> serde_json::Map<String, serde_json::Value> {
        std::mem::take(&mut self.values)
    }

    pub fn get(&self, label: &str) -> Option<&serde_json::Value> {
        self.values.get(label)
    }
}

impl DebugSink for JsonDebugSink {
    fn record(&mut self, label: &'static str, value: DebugValue) -> Result<()> {
        self.values
            .insert(label.to_string(), serde_json::to_value(value)?);
        Ok(())
    }
}

/// Writes every value at `trace` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDebugSink;

impl DebugSink for LogDebugSink {
    fn record(&mut self, label: &'static str, value: DebugValue) -> Result<()> {
        match value {
            DebugValue::Number(v) => log::trace!("{label} = {v:.3}"),
            DebugValue::Flag(v) => log::trace!("{label} = {v}"),
            DebugValue::Unset => log::trace!("{label} = -"),
        }
        Ok(())
    }
}

use std::collections::VecDeque;

use super::SensorSource;
use crate::error::{SensorError, SensorResult};
use crate::model::SensorReading;

/// Plays back a fixed list of read outcomes, then reports `Exhausted`.
///
/// Useful for driving the monitor deterministically, including injected
/// read failures.
#[derive(Debug, Default)]
pub struct ScriptedSensor {
    script: VecDeque<SensorResult<SensorReading>>,
    closed: bool,
}

impl ScriptedSensor {
    pub fn new(script: impl IntoIterator<Item = SensorResult<SensorReading>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            closed: false,
        }
    }

    pub fn from_readings(readings: impl IntoIterator<Item = SensorReading>) -> Self {
        Self::new(readings.into_iter().map(Ok))
    }

    pub fn push(&mut self, outcome: SensorResult<SensorReading>) {
        self.script.push_back(outcome);
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl SensorSource for ScriptedSensor {
    fn read(&mut self) -> SensorResult<SensorReading> {
        if self.closed {
            return Err(SensorError::Closed);
        }
        self.script.pop_front().unwrap_or(Err(SensorError::Exhausted))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> String {
        format!("scripted ({} outcomes)", self.script.len())
    }
}

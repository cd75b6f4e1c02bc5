//! Sensor sources.
//!
//! The monitor only needs one blocking call that yields a [`SensorReading`].
//! Hardware drivers, serial bridges, simulations and log replays all sit
//! behind [`SensorSource`].
//!
//! `read` may block. The monitor never interrupts a read, so a source that
//! can hang must enforce its own deadline and return
//! [`SensorError::Timeout`](crate::error::SensorError::Timeout).

mod replay;
mod scripted;
mod simulated;

pub use replay::ReplaySensor;
pub use scripted::ScriptedSensor;
pub use simulated::SimulatedSensor;

use crate::error::SensorResult;
use crate::model::SensorReading;

pub trait SensorSource: Send {
    /// Reads one sample.
    fn read(&mut self) -> SensorResult<SensorReading>;

    /// Releases the underlying transport. Later reads fail with `Closed`.
    fn close(&mut self) {}

    /// Short human-readable description for startup logs.
    fn describe(&self) -> String;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn read(&mut self) -> SensorResult<SensorReading> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Current wall-clock time as unix seconds.
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

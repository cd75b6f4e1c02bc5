use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{SensorSource, unix_now};
use crate::error::SensorResult;
use crate::model::SensorReading;

/// Clean-air resistance the simulation fluctuates around, in Ω.
const BASE_RESISTANCE: f64 = 50_000.0;
/// Probability that a sample contains an odor dip.
const ODOR_PROBABILITY: f64 = 0.05;

/// Synthetic cabin: ±10% noise around clean air, with an occasional 20-80%
/// resistance dip.
pub struct SimulatedSensor {
    rng: StdRng,
    seed: Option<u64>,
    samples: u64,
}

impl SimulatedSensor {
    /// Seeded source; the same seed produces the same sequence of values.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed: Some(seed),
            samples: 0,
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            seed: None,
            samples: 0,
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    fn sample(&mut self, timestamp: f64) -> SensorReading {
        let factor = if self.rng.gen_bool(ODOR_PROBABILITY) {
            self.rng.gen_range(0.2..0.8)
        } else {
            self.rng.gen_range(0.9..1.1)
        };

        self.samples += 1;
        SensorReading {
            temperature: 22.0 + self.rng.gen_range(-2.0..2.0),
            humidity: 45.0 + self.rng.gen_range(-10.0..10.0),
            pressure: 1013.25 + self.rng.gen_range(-5.0..5.0),
            gas_resistance: BASE_RESISTANCE * factor,
            timestamp,
        }
    }
}

impl SensorSource for SimulatedSensor {
    fn read(&mut self) -> SensorResult<SensorReading> {
        Ok(self.sample(unix_now()))
    }

    fn describe(&self) -> String {
        match self.seed {
            Some(seed) => format!("simulated (seed {seed})"),
            None => "simulated".to_string(),
        }
    }
}

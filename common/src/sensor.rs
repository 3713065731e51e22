use log::warn;

use crate::{error::SensorError, types::Reading};

/// Raw single-wire environmental sensor. Each call runs one bus transaction and
/// returns NaN when the device did not produce a usable value.
pub trait SensorDriver {
    fn read_temperature(&mut self) -> f32;
    fn read_humidity(&mut self) -> f32;
}

impl<D: SensorDriver + ?Sized> SensorDriver for &mut D {
    fn read_temperature(&mut self) -> f32 {
        (**self).read_temperature()
    }

    fn read_humidity(&mut self) -> f32 {
        (**self).read_humidity()
    }
}

#[derive(Debug)]
pub struct SensorReader<D> {
    driver: D,
}

impl<D: SensorDriver> SensorReader<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// One temperature read, one humidity read. No retries: the next tick retries.
    pub fn sample(&mut self, now_ms: u64) -> Result<Reading, SensorError> {
        let temperature_c = self.driver.read_temperature();
        let humidity = self.driver.read_humidity();

        if !temperature_c.is_finite() || !humidity.is_finite() {
            warn!("[DHT] invalid channel data (temp={temperature_c}, hum={humidity})");
            return Err(SensorError::InvalidData);
        }

        Ok(Reading {
            temperature_c,
            humidity,
            taken_at_ms: now_ms,
        })
    }
}

//! Sensor readings and the read contract the sample loop consumes
//!
//! A [`SensorSource`] returns one [`Reading`] per call or a [`SensorError`].
//! The default backend is [`SenseHat`], which talks to the HTS221 and LPS25H
//! chips over Linux I2C.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

pub mod sense_hat;

pub use sense_hat::SenseHat;

/// One snapshot of the four derived environmental values
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Degrees Celsius from the HTS221 humidity sensor
    pub temperature_from_humidity: f64,
    /// Degrees Celsius from the LPS25H pressure sensor
    pub temperature_from_pressure: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Barometric pressure in hPa
    pub pressure: f64,
    pub taken_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        temperature_from_humidity: f64,
        temperature_from_pressure: f64,
        humidity: f64,
        pressure: f64,
    ) -> Self {
        Self {
            temperature_from_humidity,
            temperature_from_pressure,
            humidity,
            pressure,
            taken_at: Utc::now(),
        }
    }

    pub fn value(&self, measurement: Measurement) -> f64 {
        match measurement {
            Measurement::TemperatureFromHumidity => self.temperature_from_humidity,
            Measurement::TemperatureFromPressure => self.temperature_from_pressure,
            Measurement::Humidity => self.humidity,
            Measurement::Pressure => self.pressure,
        }
    }
}

/// The logical entities a reading is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    TemperatureFromHumidity,
    TemperatureFromPressure,
    Humidity,
    Pressure,
}

impl Measurement {
    pub const ALL: [Measurement; 4] = [
        Measurement::TemperatureFromHumidity,
        Measurement::TemperatureFromPressure,
        Measurement::Humidity,
        Measurement::Pressure,
    ];

    /// Key in the JSON state payload
    pub fn key(self) -> &'static str {
        match self {
            Measurement::TemperatureFromHumidity => "temperature_from_humidity",
            Measurement::TemperatureFromPressure => "temperature_from_pressure",
            Measurement::Humidity => "humidity",
            Measurement::Pressure => "pressure",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Measurement::TemperatureFromHumidity | Measurement::TemperatureFromPressure => "°C",
            Measurement::Humidity => "%",
            Measurement::Pressure => "hPa",
        }
    }
}

/// Sensor read errors. All of them are "unavailable" from the loop's point of view.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor unavailable: {message}")]
    Unavailable { message: String },

    #[error("I2C error on {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sensor read timed out after {0:?}")]
    Timeout(Duration),
}

impl SensorError {
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Narrow read contract for the hardware behind the bridge
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Take one reading of all four values
    async fn read(&self) -> Result<Reading, SensorError>;

    /// Short name used in log lines
    fn name(&self) -> &str {
        "sensor"
    }
}

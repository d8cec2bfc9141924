//! Sense HAT environmental sensors over Linux I2C
//!
//! The HAT carries an HTS221 (humidity + temperature, address 0x5F) and an
//! LPS25H (pressure + temperature, address 0x5C). Both are driven through
//! `/dev/i2c-N` with the `I2C_SLAVE` ioctl and plain register reads.
//!
//! Devices are initialized lazily on the first read and again after any I/O
//! failure, so a missing or flaky HAT shows up as per-tick errors instead of
//! preventing startup.

use super::{Reading, SensorError, SensorSource};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const HTS221_ADDR: u16 = 0x5F;
const LPS25H_ADDR: u16 = 0x5C;

const I2C_SLAVE: u64 = 0x0703;

// Shared control register address on both chips
const CTRL_REG1: u8 = 0x20;
// HTS221: power on, block data update, 12.5 Hz
const HTS221_CTRL_REG1_ON: u8 = 0x87;
// LPS25H: power on, 1 Hz output data rate
const LPS25H_CTRL_REG1_ON: u8 = 0x90;

const HTS221_HUMIDITY_OUT: u8 = 0x28;
const HTS221_TEMP_OUT: u8 = 0x2A;
const LPS25H_PRESS_OUT_XL: u8 = 0x28;
const LPS25H_TEMP_OUT: u8 = 0x2B;

/// Calibration block of the HTS221, read once per initialization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hts221Calibration {
    pub h0_rh: f64,
    pub h1_rh: f64,
    pub t0_degc: f64,
    pub t1_degc: f64,
    pub h0_t0_out: i16,
    pub h1_t0_out: i16,
    pub t0_out: i16,
    pub t1_out: i16,
}

impl Hts221Calibration {
    /// Decode the raw calibration registers (0x30..=0x3F)
    ///
    /// T0/T1 are 10-bit values: eight LSBs in 0x32/0x33, two MSBs each packed
    /// into 0x35.
    #[allow(clippy::too_many_arguments)]
    pub fn from_registers(
        h0_rh_x2: u8,
        h1_rh_x2: u8,
        t0_degc_x8_lsb: u8,
        t1_degc_x8_lsb: u8,
        t1_t0_msb: u8,
        h0_t0_out: i16,
        h1_t0_out: i16,
        t0_out: i16,
        t1_out: i16,
    ) -> Self {
        let t0_x8 = (u16::from(t1_t0_msb & 0x03) << 8) | u16::from(t0_degc_x8_lsb);
        let t1_x8 = (u16::from((t1_t0_msb >> 2) & 0x03) << 8) | u16::from(t1_degc_x8_lsb);
        Self {
            h0_rh: f64::from(h0_rh_x2) / 2.0,
            h1_rh: f64::from(h1_rh_x2) / 2.0,
            t0_degc: f64::from(t0_x8) / 8.0,
            t1_degc: f64::from(t1_x8) / 8.0,
            h0_t0_out,
            h1_t0_out,
            t0_out,
            t1_out,
        }
    }

    /// Temperature in °C by linear interpolation between the two calibration points
    pub fn temperature(&self, t_out: i16) -> f64 {
        interpolate(
            t_out,
            (self.t0_out, self.t0_degc),
            (self.t1_out, self.t1_degc),
        )
    }

    /// Relative humidity in %
    pub fn humidity(&self, h_out: i16) -> f64 {
        interpolate(
            h_out,
            (self.h0_t0_out, self.h0_rh),
            (self.h1_t0_out, self.h1_rh),
        )
    }
}

/// Degenerate calibration (equal raw points) yields the midpoint
fn interpolate(raw: i16, (x0, y0): (i16, f64), (x1, y1): (i16, f64)) -> f64 {
    let span = f64::from(x1) - f64::from(x0);
    if span == 0.0 {
        return (y0 + y1) / 2.0;
    }
    y0 + (f64::from(raw) - f64::from(x0)) * (y1 - y0) / span
}

/// LPS25H temperature in °C
pub fn lps25h_temperature(raw: i16) -> f64 {
    42.5 + f64::from(raw) / 480.0
}

/// LPS25H pressure in hPa from the three PRESS_OUT bytes (24-bit two's complement)
pub fn lps25h_pressure(xl: u8, l: u8, h: u8) -> f64 {
    let raw = i32::from_le_bytes([xl, l, h, 0]);
    let raw = (raw << 8) >> 8;
    f64::from(raw) / 4096.0
}

/// One I2C peripheral bound to its slave address
struct I2cDevice {
    file: File,
    label: String,
}

impl I2cDevice {
    fn open(bus: u8, address: u16) -> Result<Self, SensorError> {
        let path = format!("/dev/i2c-{bus}");
        let label = format!("{path}@0x{address:02X}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| SensorError::Io {
                device: format!("{path} (is I2C enabled and the device mapped?)"),
                source,
            })?;

        // SAFETY: fd belongs to an open i2c-dev file; I2C_SLAVE takes the address by value.
        let result =
            unsafe { libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, libc::c_ulong::from(address)) };
        if result < 0 {
            return Err(SensorError::Io {
                device: label,
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(Self { file, label })
    }

    fn io_error(&self, source: std::io::Error) -> SensorError {
        SensorError::Io {
            device: self.label.clone(),
            source,
        }
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.file
            .write_all(&[register, value])
            .map_err(|e| self.io_error(e))
    }

    fn read_register(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.file
            .write_all(&[register])
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| self.io_error(e))?;
        Ok(buf[0])
    }

    /// Little-endian signed 16-bit value from two consecutive registers
    fn read_i16(&mut self, register: u8) -> Result<i16, SensorError> {
        let lo = self.read_register(register)?;
        let hi = self.read_register(register + 1)?;
        Ok(i16::from_le_bytes([lo, hi]))
    }
}

/// Both chips, powered on and calibrated
struct Devices {
    hts221: I2cDevice,
    lps25h: I2cDevice,
    calibration: Hts221Calibration,
}

impl Devices {
    fn init(bus: u8) -> Result<Self, SensorError> {
        let mut hts221 = I2cDevice::open(bus, HTS221_ADDR)?;
        hts221.write_register(CTRL_REG1, HTS221_CTRL_REG1_ON)?;
        std::thread::sleep(Duration::from_millis(50));

        let calibration = Hts221Calibration::from_registers(
            hts221.read_register(0x30)?,
            hts221.read_register(0x31)?,
            hts221.read_register(0x32)?,
            hts221.read_register(0x33)?,
            hts221.read_register(0x35)?,
            hts221.read_i16(0x36)?,
            hts221.read_i16(0x3A)?,
            hts221.read_i16(0x3C)?,
            hts221.read_i16(0x3E)?,
        );
        debug!(?calibration, "HTS221 calibration loaded");

        let mut lps25h = I2cDevice::open(bus, LPS25H_ADDR)?;
        lps25h.write_register(CTRL_REG1, LPS25H_CTRL_REG1_ON)?;
        std::thread::sleep(Duration::from_millis(20));

        Ok(Self {
            hts221,
            lps25h,
            calibration,
        })
    }

    fn sample(&mut self) -> Result<Reading, SensorError> {
        let t_out = self.hts221.read_i16(HTS221_TEMP_OUT)?;
        let h_out = self.hts221.read_i16(HTS221_HUMIDITY_OUT)?;
        let p_temp = self.lps25h.read_i16(LPS25H_TEMP_OUT)?;
        let xl = self.lps25h.read_register(LPS25H_PRESS_OUT_XL)?;
        let l = self.lps25h.read_register(LPS25H_PRESS_OUT_XL + 1)?;
        let h = self.lps25h.read_register(LPS25H_PRESS_OUT_XL + 2)?;

        Ok(Reading::new(
            self.calibration.temperature(t_out),
            lps25h_temperature(p_temp),
            self.calibration.humidity(h_out),
            lps25h_pressure(xl, l, h),
        ))
    }
}

/// Sense HAT sensor source on the given I2C bus
pub struct SenseHat {
    bus: u8,
    devices: Arc<Mutex<Option<Devices>>>,
}

impl SenseHat {
    pub fn new(bus: u8) -> Self {
        Self {
            bus,
            devices: Arc::new(Mutex::new(None)),
        }
    }

    fn read_blocking(bus: u8, devices: &Mutex<Option<Devices>>) -> Result<Reading, SensorError> {
        let mut guard = devices
            .lock()
            .map_err(|_| SensorError::unavailable("sensor state lock poisoned"))?;

        if guard.is_none() {
            *guard = Some(Devices::init(bus)?);
            info!(bus, "Sense HAT sensors initialized");
        }
        let Some(active) = guard.as_mut() else {
            return Err(SensorError::unavailable("sensor not initialized"));
        };

        match active.sample() {
            Ok(reading) => Ok(reading),
            Err(e) => {
                warn!(error = %e, "Sense HAT read failed, will reinitialize on next read");
                *guard = None;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SensorSource for SenseHat {
    async fn read(&self) -> Result<Reading, SensorError> {
        let bus = self.bus;
        let devices = Arc::clone(&self.devices);
        tokio::task::spawn_blocking(move || Self::read_blocking(bus, &devices))
            .await
            .map_err(|e| SensorError::unavailable(format!("sensor task failed: {e}")))?
    }

    fn name(&self) -> &str {
        "sense-hat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> Hts221Calibration {
        // T0 = 20.0 °C (160/8), T1 = 30.0 °C (240/8), H0 = 20 %, H1 = 80 %
        Hts221Calibration::from_registers(40, 160, 160, 240, 0x00, 0, 6000, 300, 500)
    }

    #[test]
    fn test_calibration_decoding() {
        let cal = calibration();
        assert_eq!(cal.h0_rh, 20.0);
        assert_eq!(cal.h1_rh, 80.0);
        assert_eq!(cal.t0_degc, 20.0);
        assert_eq!(cal.t1_degc, 30.0);
    }

    #[test]
    fn test_calibration_msb_bits() {
        // 0x35 = 0b0000_0110: T0 msb = 0b10, T1 msb = 0b01
        let cal = Hts221Calibration::from_registers(0, 0, 0x00, 0x00, 0x06, 0, 0, 0, 0);
        assert_eq!(cal.t0_degc, 512.0 / 8.0);
        assert_eq!(cal.t1_degc, 256.0 / 8.0);
    }

    #[test]
    fn test_temperature_interpolation() {
        let cal = calibration();
        assert_eq!(cal.temperature(300), 20.0);
        assert_eq!(cal.temperature(500), 30.0);
        assert_eq!(cal.temperature(400), 25.0);
    }

    #[test]
    fn test_humidity_interpolation() {
        let cal = calibration();
        assert_eq!(cal.humidity(0), 20.0);
        assert_eq!(cal.humidity(3000), 50.0);
    }

    #[test]
    fn test_degenerate_calibration_uses_midpoint() {
        let cal = Hts221Calibration::from_registers(40, 160, 160, 240, 0x00, 10, 10, 7, 7);
        assert_eq!(cal.temperature(1234), 25.0);
        assert_eq!(cal.humidity(-5), 50.0);
    }

    #[test]
    fn test_lps25h_temperature() {
        assert_eq!(lps25h_temperature(0), 42.5);
        assert_eq!(lps25h_temperature(-480 * 20), 22.5);
    }

    #[test]
    fn test_lps25h_pressure() {
        // 1013.25 hPa * 4096 = 4_150_272 = 0x3F5400
        assert_eq!(lps25h_pressure(0x00, 0x54, 0x3F), 1013.25);
    }

    #[test]
    fn test_lps25h_pressure_sign_extension() {
        assert_eq!(lps25h_pressure(0xFF, 0xFF, 0xFF), -1.0 / 4096.0);
    }

    #[tokio::test]
    async fn test_missing_bus_is_unavailable_not_panic() {
        let hat = SenseHat::new(250);
        let result = hat.read().await;
        assert!(matches!(result, Err(SensorError::Io { .. })));
    }
}

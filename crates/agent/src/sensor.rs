//! DS18B20 temperature sensing over the kernel 1-Wire sysfs interface.
//!
//! The w1-gpio/w1-therm drivers expose each probe as a directory under
//! `/sys/bus/w1/devices/` named `<family>-<serial>`, with a `w1_slave` file
//! that serves one conversion per read:
//!
//! ```text
//! 6e 01 4b 46 7f ff 02 10 71 : crc=71 YES
//! 6e 01 4b 46 7f ff 02 10 71 t=22875
//! ```
//!
//! Detection runs once at startup and is fatal when no probe is present;
//! individual reads afterwards fail soft so a flaky probe only costs the
//! current tick.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kernel sysfs directory where 1-Wire slaves are enumerated.
const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Family-code prefixes of supported temperature probes (DS18S20, DS1822,
/// DS18B20, DS1825, DS28EA00).
const THERM_FAMILY_PREFIXES: [&str; 5] = ["10-", "22-", "28-", "3b-", "42-"];

/// Millidegree value a probe reports before its first conversion finishes
/// (the 85 degree power-on reset value).
const POWER_ON_RESET_MILLIDEGREES: i64 = 85_000;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// No supported probe directory exists on the bus. Raised by detection
    /// only; fatal at startup.
    #[error("No 1-Wire temperature sensor found under {}", .bus_dir.display())]
    NoSensorFound { bus_dir: PathBuf },

    /// The probe exists but did not produce a valid reading this attempt.
    #[error("Sensor {id} is not ready: {reason}")]
    NotReady { id: String, reason: String },

    /// Reading the sysfs file failed.
    #[error("Failed to read sensor {id}: {source}")]
    Io {
        id: String,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// Sensor seam
// ---------------------------------------------------------------------------

/// Capability seam for temperature sampling. The monitor loop depends on
/// this trait so tests can script readings.
pub trait SensorSource: Send {
    /// Sample the current temperature in degrees Celsius.
    fn read(&mut self) -> Result<f64, SensorError>;
}

// ---------------------------------------------------------------------------
// W1 sysfs sensor
// ---------------------------------------------------------------------------

/// A single DS18B20-family probe, bound to its sysfs path at startup.
#[derive(Debug)]
pub struct W1Sensor {
    id: String,
    slave_path: PathBuf,
}

impl W1Sensor {
    /// Bind a probe on the standard sysfs bus.
    ///
    /// With `sensor_id` set, the probe matching that id is required; the id
    /// may be given with or without its family prefix. Without it, the
    /// first supported probe in directory order is used.
    pub fn detect(sensor_id: Option<&str>) -> Result<Self, SensorError> {
        Self::detect_in(Path::new(W1_DEVICES_DIR), sensor_id)
    }

    /// Bind a probe under an arbitrary bus directory.
    pub fn detect_in(bus_dir: &Path, sensor_id: Option<&str>) -> Result<Self, SensorError> {
        let mut candidates: Vec<String> = match fs::read_dir(bus_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| {
                    THERM_FAMILY_PREFIXES
                        .iter()
                        .any(|prefix| name.starts_with(prefix))
                })
                .collect(),
            // A missing or unreadable bus directory means the w1 drivers are
            // not loaded; report it the same as an empty bus.
            Err(_) => Vec::new(),
        };
        candidates.sort();

        let no_sensor = || SensorError::NoSensorFound {
            bus_dir: bus_dir.to_path_buf(),
        };

        let id = match sensor_id {
            Some(wanted) => candidates
                .into_iter()
                .find(|name| name == wanted || matches_bare_serial(name, wanted))
                .ok_or_else(no_sensor)?,
            None => candidates.into_iter().next().ok_or_else(no_sensor)?,
        };

        let slave_path = bus_dir.join(&id).join("w1_slave");
        tracing::info!(sensor_id = %id, "Bound 1-Wire temperature probe");

        Ok(Self { id, slave_path })
    }

    /// The bound probe's bus id, e.g. `28-0516a4f2d5ff`.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl SensorSource for W1Sensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        let raw = fs::read_to_string(&self.slave_path).map_err(|source| SensorError::Io {
            id: self.id.clone(),
            source,
        })?;

        parse_w1_slave(&self.id, &raw)
    }
}

/// A configured id may omit the family prefix: `0516a4f2d5ff` matches the
/// probe directory `28-0516a4f2d5ff`.
fn matches_bare_serial(name: &str, wanted: &str) -> bool {
    name.split_once('-')
        .is_some_and(|(_, serial)| serial == wanted)
}

/// Parse the two-line `w1_slave` format into degrees Celsius.
fn parse_w1_slave(id: &str, raw: &str) -> Result<f64, SensorError> {
    let mut lines = raw.lines();

    let crc_line = lines
        .next()
        .ok_or_else(|| not_ready(id, "empty w1_slave file"))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(not_ready(id, "CRC check failed"));
    }

    let data_line = lines
        .next()
        .ok_or_else(|| not_ready(id, "missing data line"))?;
    let millidegrees: i64 = data_line
        .rsplit_once("t=")
        .ok_or_else(|| not_ready(id, "missing t= field"))?
        .1
        .trim()
        .parse()
        .map_err(|_| not_ready(id, "malformed t= field"))?;

    if millidegrees == POWER_ON_RESET_MILLIDEGREES {
        return Err(not_ready(id, "conversion not complete (power-on reset value)"));
    }

    Ok(millidegrees as f64 / 1000.0)
}

fn not_ready(id: &str, reason: &str) -> SensorError {
    SensorError::NotReady {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

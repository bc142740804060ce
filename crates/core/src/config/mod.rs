use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{actions::Action, registers::DEFAULT_ADDRESS, PanelError, Result};

/// Top-level configuration structure for the daemons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub meter: MeterConfig,
    pub input: InputConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| PanelError::config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.meter.validate()?;
        self.input.validate()
    }
}

/// Where the peripheral lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub device: PathBuf,
    pub address: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/i2c-1"),
            address: DEFAULT_ADDRESS,
        }
    }
}

/// Settings for the audio-level daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub pipe_path: PathBuf,
    /// Upper bound on meter register updates per second.
    pub update_rate_hz: u32,
    pub min_db: f64,
    pub max_db: f64,
    /// RMS level that reads as 0 dB (0 VU = +4 dBu = 1.228 V).
    pub reference_voltage: f64,
    pub sample_rate: u32,
    /// Ballistics time constant in seconds.
    pub time_constant: f64,
    pub chunk_bytes: usize,
    pub idle_backoff_ms: u64,
    pub pipe_wait_retries: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            pipe_path: PathBuf::from("/tmp/vu_meter_data"),
            update_rate_hz: 50,
            min_db: -20.0,
            max_db: 3.0,
            reference_voltage: 1.228,
            sample_rate: 44_100,
            time_constant: 0.3,
            chunk_bytes: 4096,
            idle_backoff_ms: 1,
            pipe_wait_retries: 10,
        }
    }
}

impl MeterConfig {
    pub fn update_period(&self) -> Duration {
        period_for_rate(self.update_rate_hz)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_rate_hz == 0 {
            return Err(PanelError::config("meter update rate must be positive"));
        }
        if self.sample_rate == 0 {
            return Err(PanelError::config("sample rate must be positive"));
        }
        if !(self.time_constant.is_finite() && self.time_constant > 0.0) {
            return Err(PanelError::config("time constant must be positive"));
        }
        if !(self.min_db.is_finite() && self.max_db.is_finite() && self.max_db > self.min_db) {
            return Err(PanelError::config(format!(
                "meter range [{}, {}] dB is empty",
                self.min_db, self.max_db
            )));
        }
        if !(self.reference_voltage.is_finite() && self.reference_voltage > 0.0) {
            return Err(PanelError::config("reference voltage must be positive"));
        }
        if self.chunk_bytes < crate::stream::FRAME_BYTES {
            return Err(PanelError::config(format!(
                "chunk size {} cannot hold a stereo frame",
                self.chunk_bytes
            )));
        }
        Ok(())
    }
}

/// Settings for the input/encoder poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub poll_rate_hz: u32,
    pub command_timeout_ms: u64,
    /// ALSA simple mixer control used for volume actions.
    pub mixer_control: String,
    /// Consecutive cycles with bus failures tolerated before the poller stops.
    pub max_failed_cycles: u32,
    /// Overrides for the default input table, keyed by input number.
    pub bindings: BTreeMap<u8, BindingConfig>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_rate_hz: 20,
            command_timeout_ms: 5_000,
            mixer_control: "Digital".to_string(),
            max_failed_cycles: 5,
            bindings: BTreeMap::new(),
        }
    }
}

impl InputConfig {
    pub fn poll_period(&self) -> Duration {
        period_for_rate(self.poll_rate_hz)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_rate_hz == 0 {
            return Err(PanelError::config("poll rate must be positive"));
        }
        if self.max_failed_cycles == 0 {
            return Err(PanelError::config("max_failed_cycles must be at least 1"));
        }
        if let Some(index) = self
            .bindings
            .keys()
            .find(|index| !(1..=crate::registers::INPUT_COUNT as u8).contains(index))
        {
            return Err(PanelError::config(format!(
                "binding for input {index} is outside 1-12"
            )));
        }
        Ok(())
    }
}

/// A single input binding as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub label: String,
    pub action: Action,
}

fn period_for_rate(rate_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)))
}

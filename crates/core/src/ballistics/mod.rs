use serde::{Deserialize, Serialize};

use crate::{config::MeterConfig, PanelError, Result};

/// Classic VU integration time in seconds.
pub const DEFAULT_TIME_CONSTANT: f64 = 0.3;

/// RMS levels below this read as the bottom of the scale.
const SILENCE_RMS: f64 = 1e-6;

/// Exponential-smoothing power integrator modelling the inertia of an
/// analog VU needle.
///
/// The smoothing coefficient is fixed at construction. The power estimate
/// carries over between blocks until the meter is dropped.
#[derive(Debug, Clone)]
pub struct VuBallistics {
    sample_rate: u32,
    time_constant: f64,
    alpha: f64,
    power: f64,
}

impl VuBallistics {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_time_constant(sample_rate, DEFAULT_TIME_CONSTANT)
    }

    pub fn with_time_constant(sample_rate: u32, time_constant: f64) -> Self {
        let alpha = 1.0 - (-1.0 / (f64::from(sample_rate) * time_constant)).exp();
        Self {
            sample_rate,
            time_constant,
            alpha,
            power: 0.0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn time_constant(&self) -> f64 {
        self.time_constant
    }

    /// Smoothing coefficient applied per block.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Current smoothed power estimate.
    pub fn power(&self) -> f64 {
        self.power
    }

    /// Current output level without feeding new samples.
    pub fn level(&self) -> f64 {
        self.power.max(0.0).sqrt()
    }

    /// Folds the mean-square power of `samples` into the estimate and
    /// returns the smoothed RMS level.
    ///
    /// An empty block leaves the estimate alone and repeats the last level.
    pub fn process(&mut self, samples: &[f32]) -> f64 {
        if samples.is_empty() {
            return self.level();
        }

        let block_power = samples
            .iter()
            .map(|sample| f64::from(*sample) * f64::from(*sample))
            .sum::<f64>()
            / samples.len() as f64;

        self.power = self.alpha * block_power + (1.0 - self.alpha) * self.power;
        self.level()
    }
}

/// Calibration from RMS level to meter drive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterScale {
    pub min_db: f64,
    pub max_db: f64,
    pub reference_voltage: f64,
}

impl Default for MeterScale {
    fn default() -> Self {
        Self {
            min_db: -20.0,
            max_db: 3.0,
            reference_voltage: 1.228,
        }
    }
}

impl MeterScale {
    pub fn new(min_db: f64, max_db: f64, reference_voltage: f64) -> Result<Self> {
        if !(min_db.is_finite() && max_db.is_finite() && max_db > min_db) {
            return Err(PanelError::config(format!(
                "meter range [{min_db}, {max_db}] dB is empty"
            )));
        }
        if !(reference_voltage.is_finite() && reference_voltage > 0.0) {
            return Err(PanelError::config("reference voltage must be positive"));
        }
        Ok(Self {
            min_db,
            max_db,
            reference_voltage,
        })
    }

    pub fn from_config(config: &MeterConfig) -> Result<Self> {
        Self::new(config.min_db, config.max_db, config.reference_voltage)
    }

    /// Level in dB relative to the reference. Near-silence maps to `min_db`.
    pub fn rms_to_db(&self, rms: f64) -> f64 {
        if rms.is_nan() || rms < SILENCE_RMS {
            return self.min_db;
        }
        20.0 * (rms / self.reference_voltage).log10()
    }

    /// Linear map of `[min_db, max_db]` onto `0..=255`, truncating.
    pub fn db_to_drive(&self, db: f64) -> u8 {
        let clamped = if db.is_nan() {
            self.min_db
        } else {
            db.clamp(self.min_db, self.max_db)
        };
        let fraction = (clamped - self.min_db) / (self.max_db - self.min_db);
        (fraction * 255.0).clamp(0.0, 255.0) as u8
    }

    pub fn drive(&self, rms: f64) -> u8 {
        self.db_to_drive(self.rms_to_db(rms))
    }
}

/// Splits interleaved stereo samples into left and right sequences.
pub fn deinterleave(samples: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let frames = samples.chunks_exact(2);
    let mut left = Vec::with_capacity(frames.len());
    let mut right = Vec::with_capacity(frames.len());
    for frame in frames {
        left.push(frame[0]);
        right.push(frame[1]);
    }
    (left, right)
}

/// Drive values for both meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StereoDrive {
    pub left: u8,
    pub right: u8,
}

/// Two independent integrators sharing one calibration.
#[derive(Debug, Clone)]
pub struct StereoMeter {
    left: VuBallistics,
    right: VuBallistics,
    scale: MeterScale,
}

impl StereoMeter {
    pub fn new(sample_rate: u32, time_constant: f64, scale: MeterScale) -> Self {
        Self {
            left: VuBallistics::with_time_constant(sample_rate, time_constant),
            right: VuBallistics::with_time_constant(sample_rate, time_constant),
            scale,
        }
    }

    pub fn from_config(config: &MeterConfig) -> Result<Self> {
        Ok(Self::new(
            config.sample_rate,
            config.time_constant,
            MeterScale::from_config(config)?,
        ))
    }

    pub fn scale(&self) -> &MeterScale {
        &self.scale
    }

    pub fn channels(&self) -> (&VuBallistics, &VuBallistics) {
        (&self.left, &self.right)
    }

    /// Feeds one block per channel and returns the resulting drive values.
    pub fn process(&mut self, left: &[f32], right: &[f32]) -> StereoDrive {
        let left_rms = self.left.process(left);
        let right_rms = self.right.process(right);
        StereoDrive {
            left: self.scale.drive(left_rms),
            right: self.scale.drive(right_rms),
        }
    }

    pub fn process_interleaved(&mut self, samples: &[f32]) -> StereoDrive {
        let (left, right) = deinterleave(samples);
        self.process(&left, &right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn coefficient_follows_time_constant() {
        let meter = VuBallistics::new(44_100);
        let expected = 1.0 - (-1.0 / (44_100.0 * 0.3_f64)).exp();
        assert_relative_eq!(meter.alpha(), expected);
        assert_eq!(meter.time_constant(), DEFAULT_TIME_CONSTANT);
    }

    #[test]
    fn constant_power_converges() {
        let mut meter = VuBallistics::with_time_constant(10, 0.3);
        let block = vec![0.5_f32; 64];
        for _ in 0..200 {
            meter.process(&block);
        }
        assert_relative_eq!(meter.power(), 0.25, epsilon = 1e-9);
        assert_relative_eq!(meter.level(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn single_block_moves_by_alpha() {
        let mut meter = VuBallistics::with_time_constant(10, 0.3);
        let level = meter.process(&[1.0, -1.0]);
        assert_relative_eq!(meter.power(), meter.alpha());
        assert_relative_eq!(level, meter.alpha().sqrt());
    }

    #[test]
    fn empty_block_repeats_previous_output() {
        let mut meter = VuBallistics::with_time_constant(10, 0.3);
        let before = meter.process(&[0.8; 32]);
        let state = meter.power();

        let after = meter.process(&[]);
        assert_eq!(after, before);
        assert_eq!(meter.power(), state);
    }

    #[test]
    fn state_decays_towards_silence() {
        let mut meter = VuBallistics::with_time_constant(10, 0.3);
        meter.process(&[1.0; 16]);
        let loud = meter.level();
        meter.process(&[0.0; 16]);
        assert!(meter.level() < loud);
        assert!(meter.level() > 0.0);
    }

    #[test]
    fn silence_reads_min_db() {
        let scale = MeterScale::default();
        assert_eq!(scale.rms_to_db(0.0), -20.0);
        assert_eq!(scale.rms_to_db(1e-7), -20.0);
        assert_eq!(scale.rms_to_db(f64::NAN), -20.0);
        assert_relative_eq!(scale.rms_to_db(1.228), 0.0);
        assert_relative_eq!(scale.rms_to_db(12.28), 20.0, epsilon = 1e-9);
    }

    #[test]
    fn drive_hits_both_ends_exactly() {
        let scale = MeterScale::default();
        assert_eq!(scale.db_to_drive(-20.0), 0);
        assert_eq!(scale.db_to_drive(3.0), 255);
        assert_eq!(scale.db_to_drive(-45.0), 0);
        assert_eq!(scale.db_to_drive(12.0), 255);
        assert_eq!(scale.db_to_drive(f64::NAN), 0);
    }

    #[test]
    fn drive_truncates_midscale() {
        let scale = MeterScale::new(0.0, 10.0, 1.0).unwrap();
        // 5/10 * 255 = 127.5
        assert_eq!(scale.db_to_drive(5.0), 127);
        assert_eq!(scale.db_to_drive(9.99), 254);
    }

    #[test]
    fn scale_rejects_inverted_range() {
        assert!(MeterScale::new(3.0, -20.0, 1.228).is_err());
        assert!(MeterScale::new(-20.0, 3.0, 0.0).is_err());
    }

    #[test]
    fn channels_keep_separate_state() {
        let mut meter = StereoMeter::new(10, 0.3, MeterScale::new(-40.0, 0.0, 1.0).unwrap());
        for _ in 0..100 {
            meter.process_interleaved(&[2.0, 0.0, 2.0, 0.0, 2.0, 0.0]);
        }

        let (left, right) = meter.channels();
        assert_relative_eq!(left.power(), 4.0, epsilon = 1e-9);
        assert_eq!(right.power(), 0.0);

        // +6 dB is past full scale, so the clamp gives exactly 255
        let drive = meter.process(&[2.0], &[]);
        assert_eq!(drive.left, 255);
        assert_eq!(drive.right, 0);
    }

    #[test]
    fn deinterleave_drops_odd_tail() {
        let (left, right) = deinterleave(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(left, vec![1.0, 3.0]);
        assert_eq!(right, vec![2.0, 4.0]);
    }
}

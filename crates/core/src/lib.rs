//! Core library for the streamer peripheral board.
//!
//! The board exposes VU meters, a backlight, a tape-counter motor, twelve
//! digital inputs and a rotary encoder behind a byte-addressed register file.
//! The layers build on each other:
//!
//! - [`bus`] moves single bytes and owns the session,
//! - [`controller`] turns register bytes into typed operations,
//! - [`ballistics`] converts audio blocks into meter drive values,
//! - [`meter`] and [`poller`] are the two daemon loops built on top.

pub mod actions;
pub mod ballistics;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod meter;
pub mod poller;
pub mod registers;
pub mod stream;
pub mod timing;

pub use actions::{Action, ActionMap, ActionRunner, Binding, PlaybackControl, ShellPlayback};
pub use ballistics::{MeterScale, StereoDrive, StereoMeter, VuBallistics};
pub use bus::{RegisterBus, SystemBus, Transport};
pub use config::{AppConfig, BindingConfig, BusConfig, InputConfig, MeterConfig};
pub use controller::{EncoderState, FirmwareVersion, InputBank, MeterSelect, PeripheralController};
pub use error::{BusOp, PanelError, Result};
pub use meter::MeterDaemon;
pub use poller::{CycleReport, EncoderMode, InputPoller, Trigger};
pub use registers::{ButtonGesture, Command, ControlFlags, Register, StatusFlags, VuMode};
pub use stream::{AudioStream, Chunk};
pub use timing::{FixedRate, RunFlag};

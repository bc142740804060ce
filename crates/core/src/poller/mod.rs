use tracing::{debug, error, info};

use crate::{
    actions::{Action, ActionMap, ActionRunner, PlaybackControl},
    bus::RegisterBus,
    controller::PeripheralController,
    registers::ButtonGesture,
    timing::{FixedRate, RunFlag},
    Result,
};

/// What encoder rotation controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    Volume,
    /// Rotation is only logged; no track-selection behaviour is bound yet.
    TrackSelect,
}

impl EncoderMode {
    pub fn toggled(self) -> Self {
        match self {
            EncoderMode::Volume => EncoderMode::TrackSelect,
            EncoderMode::TrackSelect => EncoderMode::Volume,
        }
    }
}

/// Where a dispatched action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Input(u8),
    Rotation(i8),
    Gesture(ButtonGesture),
}

/// Actions dispatched during one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub dispatched: Vec<(Trigger, Action)>,
    pub failures: usize,
}

/// Fixed-rate poller for the digital inputs and the rotary encoder.
#[derive(Debug)]
pub struct InputPoller<B: RegisterBus, P> {
    controller: PeripheralController<B>,
    runner: ActionRunner<P>,
    actions: ActionMap,
    encoder_mode: EncoderMode,
    rate: FixedRate,
    max_failed_cycles: u32,
}

impl<B: RegisterBus, P: PlaybackControl> InputPoller<B, P> {
    pub fn new(
        controller: PeripheralController<B>,
        runner: ActionRunner<P>,
        actions: ActionMap,
        rate: FixedRate,
    ) -> Self {
        Self {
            controller,
            runner,
            actions,
            encoder_mode: EncoderMode::Volume,
            rate,
            max_failed_cycles: 1,
        }
    }

    /// Number of consecutive failed cycles [`InputPoller::run`] tolerates.
    pub fn with_max_failed_cycles(mut self, cycles: u32) -> Self {
        self.max_failed_cycles = cycles.max(1);
        self
    }

    pub fn encoder_mode(&self) -> EncoderMode {
        self.encoder_mode
    }

    pub fn actions(&self) -> &ActionMap {
        &self.actions
    }

    pub fn runner(&self) -> &ActionRunner<P> {
        &self.runner
    }

    /// Rebinds one input while the poller is live.
    pub fn set_input_action(
        &mut self,
        input: u8,
        label: impl Into<String>,
        action: Action,
    ) -> Result<()> {
        self.actions.set(input, label, action)
    }

    pub fn close(&mut self) {
        self.controller.close();
    }

    /// Runs one cycle: inputs first, then the encoder.
    ///
    /// Bus failures abort the cycle. Action failures are counted in the
    /// report and do not stop later actions.
    pub fn poll_once(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        self.poll_inputs(&mut report)?;
        self.poll_encoder(&mut report)?;
        Ok(report)
    }

    /// Polls at the configured rate until `running` is cleared or too many
    /// cycles in a row hit bus failures.
    pub fn run(&mut self, running: &RunFlag) -> Result<()> {
        info!(period = ?self.rate.period(), "starting input handler");
        let mut failed_cycles = 0;

        while running.is_running() {
            let cycle = self.rate.begin();
            match self.poll_once() {
                Ok(_) => failed_cycles = 0,
                Err(err) => {
                    failed_cycles += 1;
                    error!(%err, failed_cycles, "poll cycle failed");
                    if failed_cycles >= self.max_failed_cycles {
                        return Err(err);
                    }
                }
            }
            cycle.finish();
        }

        info!("input handler stopped");
        Ok(())
    }

    fn poll_inputs(&mut self, report: &mut CycleReport) -> Result<()> {
        let changes = self.controller.input_changes()?;
        let levels = self.controller.digital_inputs()?;

        for (input, changed) in changes.iter() {
            // press edges only; releases also latch a change
            if !changed || !levels.get(input) {
                continue;
            }
            let input = input as u8;
            let Some(binding) = self.actions.get(input) else {
                continue;
            };
            info!(input, label = %binding.label, "input pressed");
            let action = binding.action.clone();
            self.dispatch(Trigger::Input(input), action, report);
        }
        Ok(())
    }

    fn poll_encoder(&mut self, report: &mut CycleReport) -> Result<()> {
        let delta = self.controller.encoder_delta()?;
        if delta != 0 {
            match self.encoder_mode {
                EncoderMode::Volume => {
                    let step = delta.unsigned_abs();
                    let action = if delta > 0 {
                        Action::VolumeUp { step }
                    } else {
                        Action::VolumeDown { step }
                    };
                    self.dispatch(Trigger::Rotation(delta), action, report);
                }
                EncoderMode::TrackSelect => {
                    info!(delta, "encoder turned in track-select mode");
                }
            }
        }

        let gesture = self.controller.encoder_button()?;
        let action = match gesture {
            ButtonGesture::Released => return Ok(()),
            ButtonGesture::Pressed => Action::PlayPause,
            ButtonGesture::Held => Action::ToggleEncoderMode,
            ButtonGesture::DoubleClick => Action::MuteToggle,
        };
        info!(?gesture, "encoder button");
        self.dispatch(Trigger::Gesture(gesture), action, report);
        Ok(())
    }

    fn dispatch(&mut self, trigger: Trigger, action: Action, report: &mut CycleReport) {
        match &action {
            Action::ToggleEncoderMode => {
                self.encoder_mode = self.encoder_mode.toggled();
                info!(mode = ?self.encoder_mode, "encoder mode");
            }
            Action::LogOnly => debug!(?trigger, "no action bound"),
            playback => {
                if self.runner.run(playback).is_err() {
                    report.failures += 1;
                }
            }
        }
        report.dispatched.push((trigger, action));
    }
}

use std::{
    collections::BTreeMap,
    io::Read,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{config::BindingConfig, registers::INPUT_COUNT, PanelError, Result};

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Something a control surface gesture can trigger.
///
/// Actions carry only their parameters; the poller resolves them against the
/// playback collaborator and its own encoder state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    PlayPause,
    Play,
    Pause,
    Stop,
    NextTrack,
    PreviousTrack,
    VolumeUp { step: u8 },
    VolumeDown { step: u8 },
    SetVolume { level: u8 },
    MuteToggle,
    /// Switch the encoder between volume and track-select mode.
    ToggleEncoderMode,
    /// Only record that the input fired.
    LogOnly,
}

impl Action {
    /// Shell command implementing the action, if it talks to the player.
    pub fn command(&self, mixer_control: &str) -> Option<String> {
        let command = match self {
            Action::PlayPause => "pcp play_pause || echo 'pause' | nc localhost 3483".to_string(),
            Action::Play => "pcp play || echo 'play' | nc localhost 3483".to_string(),
            Action::Pause => "pcp pause || echo 'pause' | nc localhost 3483".to_string(),
            Action::Stop => "pcp stop || echo 'stop' | nc localhost 3483".to_string(),
            Action::NextTrack => {
                "pcp next || echo 'button jump_fwd' | nc localhost 3483".to_string()
            }
            Action::PreviousTrack => {
                "pcp previous || echo 'button jump_rew' | nc localhost 3483".to_string()
            }
            Action::VolumeUp { step } => format!("amixer sset '{mixer_control}' {step}%+"),
            Action::VolumeDown { step } => format!("amixer sset '{mixer_control}' {step}%-"),
            Action::SetVolume { level } => {
                format!("amixer sset '{mixer_control}' {}%", (*level).min(100))
            }
            Action::MuteToggle => format!("amixer sset '{mixer_control}' toggle"),
            Action::ToggleEncoderMode | Action::LogOnly => return None,
        };
        Some(command)
    }
}

/// Playback-control collaborator.
pub trait PlaybackControl {
    /// Runs `command`, failing if it does not succeed within `timeout`.
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<()>;
}

impl<P: PlaybackControl + ?Sized> PlaybackControl for Box<P> {
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<()> {
        (**self).execute(command, timeout)
    }
}

/// Runs commands through `sh -c`, killing them when they overrun.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellPlayback;

impl PlaybackControl for ShellPlayback {
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<()> {
        debug!(command, "executing");
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // read while the child runs; a full pipe would stall it
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PanelError::CommandTimeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            thread::sleep(WAIT_POLL);
        };

        if status.success() {
            return Ok(());
        }

        let stderr = stderr.and_then(|reader| reader.join().ok()).unwrap_or_default();
        Err(PanelError::CommandFailed {
            command: command.to_string(),
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }
}

/// Label and action bound to one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub label: String,
    pub action: Action,
}

/// Table from input number (1-12) to its binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMap {
    bindings: BTreeMap<u8, Binding>,
}

impl Default for ActionMap {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        let defaults = [
            (1, "Play/Pause", Action::PlayPause),
            (2, "Stop", Action::Stop),
            (3, "Next Track", Action::NextTrack),
            (4, "Previous Track", Action::PreviousTrack),
            (5, "Volume Up", Action::VolumeUp { step: 5 }),
            (6, "Volume Down", Action::VolumeDown { step: 5 }),
            (7, "Mute", Action::MuteToggle),
        ];
        for (input, label, action) in defaults {
            bindings.insert(
                input,
                Binding {
                    label: label.to_string(),
                    action,
                },
            );
        }
        for input in 8..=INPUT_COUNT as u8 {
            bindings.insert(
                input,
                Binding {
                    label: format!("Input {input}"),
                    action: Action::LogOnly,
                },
            );
        }
        Self { bindings }
    }
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default table with the configured overrides applied.
    pub fn with_overrides(overrides: &BTreeMap<u8, BindingConfig>) -> Result<Self> {
        let mut map = Self::default();
        for (input, binding) in overrides {
            map.set(*input, binding.label.clone(), binding.action.clone())?;
        }
        Ok(map)
    }

    /// Rebinds `input`. Numbers outside 1-12 are rejected.
    pub fn set(&mut self, input: u8, label: impl Into<String>, action: Action) -> Result<()> {
        if !(1..=INPUT_COUNT as u8).contains(&input) {
            return Err(PanelError::config(format!("input {input} is outside 1-12")));
        }
        let binding = Binding {
            label: label.into(),
            action,
        };
        info!(input, label = %binding.label, "input mapped");
        self.bindings.insert(input, binding);
        Ok(())
    }

    pub fn get(&self, input: u8) -> Option<&Binding> {
        self.bindings.get(&input)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &Binding)> + '_ {
        self.bindings.iter().map(|(input, binding)| (*input, binding))
    }
}

/// Resolves playback actions into commands for the collaborator.
#[derive(Debug)]
pub struct ActionRunner<P> {
    playback: P,
    mixer_control: String,
    timeout: Duration,
}

impl<P: PlaybackControl> ActionRunner<P> {
    pub fn new(playback: P, mixer_control: impl Into<String>, timeout: Duration) -> Self {
        Self {
            playback,
            mixer_control: mixer_control.into(),
            timeout,
        }
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut P {
        &mut self.playback
    }

    /// Runs the playback side of `action`. Actions without a command succeed
    /// without doing anything.
    pub fn run(&mut self, action: &Action) -> Result<()> {
        let Some(command) = action.command(&self.mixer_control) else {
            return Ok(());
        };
        info!(?action, "running action");
        self.playback
            .execute(&command, self.timeout)
            .inspect_err(|err| error!(?action, %err, "action failed"))
    }
}

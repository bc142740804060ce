use std::{thread, time::Duration};

use tracing::{debug, trace};

use crate::{
    bus::{RegisterBus, Transport},
    registers::{
        decode_delta, decode_position, BacklightMode, ButtonGesture, Command, ControlFlags,
        ErrorFlags, Register, StatusFlags, TapeDirection, TapeMode, VuMode, INPUT_COUNT,
    },
    PanelError, Result,
};

const RESET_SETTLE: Duration = Duration::from_millis(100);

/// Firmware version reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Twelve per-input booleans decoded from a low/high register pair.
///
/// Index 0 corresponds to input 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputBank([bool; INPUT_COUNT]);

impl InputBank {
    /// Decodes physical input levels. Inputs are active-low: a cleared bit
    /// means the input is pressed.
    pub fn from_levels(low: u8, high: u8) -> Self {
        Self::from_bits(!low, !high)
    }

    /// Decodes change latches. A set bit means the input changed.
    pub fn from_changes(low: u8, high: u8) -> Self {
        Self::from_bits(low, high)
    }

    fn from_bits(low: u8, high: u8) -> Self {
        let mut inputs = [false; INPUT_COUNT];
        for (bit, slot) in inputs.iter_mut().enumerate() {
            *slot = if bit < 8 {
                low & (1 << bit) != 0
            } else {
                high & (1 << (bit - 8)) != 0
            };
        }
        Self(inputs)
    }

    /// State of input `number` (1-based). Out-of-range numbers read as `false`.
    pub fn get(&self, number: usize) -> bool {
        number
            .checked_sub(1)
            .and_then(|index| self.0.get(index))
            .copied()
            .unwrap_or(false)
    }

    pub fn as_array(&self) -> &[bool; INPUT_COUNT] {
        &self.0
    }

    /// Iterates `(input number, state)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, bool)> + '_ {
        self.0.iter().enumerate().map(|(index, state)| (index + 1, *state))
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|state| *state)
    }
}

/// Snapshot of the rotary encoder. Reading it consumes the delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderState {
    pub position: i16,
    pub delta: i8,
    pub gesture: ButtonGesture,
}

/// Which VU meter channel a self-test should sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterSelect {
    Left,
    Right,
    Both,
}

/// Typed access to the peripheral board.
///
/// Every operation maps to one or more register transfers. Failures from the
/// transport are returned unchanged and nothing is retried here.
#[derive(Debug)]
pub struct PeripheralController<B: RegisterBus> {
    transport: Transport<B>,
}

impl<B: RegisterBus> PeripheralController<B> {
    /// Opens a session on `bus` and verifies the device identity.
    pub fn open(bus: B) -> Result<Self> {
        Ok(Self {
            transport: Transport::open(bus)?,
        })
    }

    pub fn from_transport(transport: Transport<B>) -> Self {
        Self { transport }
    }

    /// Releases the bus session. Safe to call more than once.
    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion> {
        Ok(FirmwareVersion {
            major: self.transport.read_register(Register::FirmwareMajor)?,
            minor: self.transport.read_register(Register::FirmwareMinor)?,
            patch: self.transport.read_register(Register::FirmwarePatch)?,
        })
    }

    pub fn status(&mut self) -> Result<StatusFlags> {
        let raw = self.transport.read_register(Register::Status)?;
        Ok(StatusFlags::from_bits_retain(raw))
    }

    pub fn errors(&mut self) -> Result<ErrorFlags> {
        let raw = self.transport.read_register(Register::Error)?;
        Ok(ErrorFlags::from_bits_retain(raw))
    }

    pub fn is_ready(&mut self) -> Result<bool> {
        Ok(self.status()?.contains(StatusFlags::READY))
    }

    pub fn control(&mut self) -> Result<ControlFlags> {
        let raw = self.transport.read_register(Register::Control)?;
        Ok(ControlFlags::from_bits_retain(raw))
    }

    /// Sets or clears `flag` in the control register, leaving every other
    /// bit exactly as the device reported it.
    pub fn set_control_flag(&mut self, flag: ControlFlags, enable: bool) -> Result<()> {
        let mut control = self.control()?;
        control.set(flag, enable);
        debug!(?flag, enable, control = control.bits(), "updating control register");
        self.transport.write_register(Register::Control, control.bits())
    }

    pub fn enable(&mut self, enable: bool) -> Result<()> {
        self.set_control_flag(ControlFlags::ENABLE, enable)
    }

    // VU meters

    pub fn set_vu_left(&mut self, level: u8) -> Result<()> {
        self.transport.write_register(Register::VuLeft, level)
    }

    pub fn set_vu_right(&mut self, level: u8) -> Result<()> {
        self.transport.write_register(Register::VuRight, level)
    }

    pub fn set_vu_meters(&mut self, left: u8, right: u8) -> Result<()> {
        self.set_vu_left(left)?;
        self.set_vu_right(right)
    }

    pub fn set_vu_mode(&mut self, mode: VuMode) -> Result<()> {
        self.transport.write_register(Register::VuMode, mode as u8)
    }

    pub fn enable_vu_meters(&mut self, enable: bool) -> Result<()> {
        self.set_control_flag(ControlFlags::VU_ENABLE, enable)
    }

    // Backlight

    pub fn set_backlight(&mut self, brightness: u8) -> Result<()> {
        self.transport.write_register(Register::Backlight, brightness)
    }

    pub fn set_backlight_mode(&mut self, mode: BacklightMode) -> Result<()> {
        self.transport.write_register(Register::BacklightMode, mode as u8)
    }

    pub fn enable_backlight(&mut self, enable: bool) -> Result<()> {
        self.set_control_flag(ControlFlags::BACKLIGHT_ENABLE, enable)
    }

    // Tape motor

    pub fn set_tape_motor(&mut self, speed: u8, direction: TapeDirection) -> Result<()> {
        self.transport.write_register(Register::TapeSpeed, speed)?;
        self.transport.write_register(Register::TapeDirection, direction as u8)
    }

    /// Stops the motor, either coasting or with the active brake.
    pub fn stop_tape_motor(&mut self, brake: bool) -> Result<()> {
        let direction = if brake {
            TapeDirection::Brake
        } else {
            TapeDirection::Stop
        };
        self.set_tape_motor(0, direction)
    }

    pub fn set_tape_mode(&mut self, mode: TapeMode) -> Result<()> {
        self.transport.write_register(Register::TapeMode, mode as u8)
    }

    pub fn enable_tape_motor(&mut self, enable: bool) -> Result<()> {
        self.set_control_flag(ControlFlags::TAPE_ENABLE, enable)
    }

    // Digital inputs

    /// Current input levels, `true` meaning pressed.
    pub fn digital_inputs(&mut self) -> Result<InputBank> {
        let low = self.transport.read_register(Register::InputStatusLow)?;
        let high = self.transport.read_register(Register::InputStatusHigh)?;
        Ok(InputBank::from_levels(low, high))
    }

    /// Inputs that changed since the previous call.
    ///
    /// The read clears the device latches, so each edge is reported once.
    pub fn input_changes(&mut self) -> Result<InputBank> {
        let low = self.transport.read_register(Register::InputChangedLow)?;
        let high = self.transport.read_register(Register::InputChangedHigh)?;
        trace!(low, high, "consumed input change latches");
        Ok(InputBank::from_changes(low, high))
    }

    pub fn clear_input_changes(&mut self) -> Result<()> {
        self.set_control_flag(ControlFlags::CLEAR_INPUTS, true)
    }

    // Rotary encoder

    pub fn encoder_position(&mut self) -> Result<i16> {
        let low = self.transport.read_register(Register::EncoderPositionLow)?;
        let high = self.transport.read_register(Register::EncoderPositionHigh)?;
        Ok(decode_position(low, high))
    }

    /// Steps since the previous call. The read clears the accumulator.
    pub fn encoder_delta(&mut self) -> Result<i8> {
        let raw = self.transport.read_register(Register::EncoderDelta)?;
        trace!(raw, "consumed encoder delta");
        Ok(decode_delta(raw))
    }

    pub fn encoder_button(&mut self) -> Result<ButtonGesture> {
        let raw = self.transport.read_register(Register::EncoderButton)?;
        ButtonGesture::from_register(raw).ok_or(PanelError::UnexpectedValue {
            register: Register::EncoderButton.addr(),
            value: raw,
        })
    }

    pub fn encoder_state(&mut self) -> Result<EncoderState> {
        Ok(EncoderState {
            position: self.encoder_position()?,
            delta: self.encoder_delta()?,
            gesture: self.encoder_button()?,
        })
    }

    pub fn reset_encoder(&mut self) -> Result<()> {
        self.set_control_flag(ControlFlags::RESET_ENCODER, true)
    }

    // Configuration registers

    pub fn vu_pwm_frequency(&mut self) -> Result<u8> {
        self.transport.read_register(Register::ConfigVuFrequency)
    }

    pub fn set_vu_pwm_frequency(&mut self, value: u8) -> Result<()> {
        self.transport.write_register(Register::ConfigVuFrequency, value)
    }

    pub fn debounce(&mut self) -> Result<u8> {
        self.transport.read_register(Register::ConfigDebounce)
    }

    pub fn set_debounce(&mut self, value: u8) -> Result<()> {
        self.transport.write_register(Register::ConfigDebounce, value)
    }

    pub fn options(&mut self) -> Result<u8> {
        self.transport.read_register(Register::ConfigOptions)
    }

    pub fn set_options(&mut self, value: u8) -> Result<()> {
        self.transport.write_register(Register::ConfigOptions, value)
    }

    // Commands

    /// Writes a command opcode. No acknowledgement is read back.
    pub fn send_command(&mut self, command: Command) -> Result<()> {
        debug!(?command, "sending command");
        self.transport.write_register(Register::Command, command as u8)
    }

    /// Soft-resets the controller and waits for it to come back.
    pub fn reset(&mut self) -> Result<()> {
        self.send_command(Command::Reset)?;
        thread::sleep(RESET_SETTLE);
        Ok(())
    }

    pub fn test_vu_meters(&mut self, which: MeterSelect) -> Result<()> {
        let command = match which {
            MeterSelect::Left => Command::TestVuLeft,
            MeterSelect::Right => Command::TestVuRight,
            MeterSelect::Both => Command::TestVuBoth,
        };
        self.send_command(command)
    }

    pub fn test_backlight(&mut self) -> Result<()> {
        self.send_command(Command::TestBacklight)
    }

    pub fn test_tape_motor(&mut self) -> Result<()> {
        self.send_command(Command::TestTapeMotor)
    }

    pub fn test_all(&mut self) -> Result<()> {
        self.send_command(Command::TestAll)
    }
}

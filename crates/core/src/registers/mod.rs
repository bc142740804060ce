use bitflags::bitflags;

/// 7-bit bus address the peripheral answers on by default.
pub const DEFAULT_ADDRESS: u16 = 0x42;

/// Value the identity register must hold (`'R'`).
pub const DEVICE_ID: u8 = 0x52;

/// Number of digital inputs exposed by the board.
pub const INPUT_COUNT: usize = 12;

/// How a register may be accessed over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
    /// Reading returns the latched value and resets it on the device.
    ReadClear,
}

impl Access {
    pub fn is_readable(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Access::ReadWrite | Access::WriteOnly)
    }
}

/// Byte-addressed register map of the peripheral board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    DeviceId = 0x00,
    FirmwareMajor = 0x01,
    FirmwareMinor = 0x02,
    FirmwarePatch = 0x03,

    Control = 0x10,
    Status = 0x11,
    Error = 0x12,

    VuLeft = 0x20,
    VuRight = 0x21,
    VuMode = 0x22,

    Backlight = 0x30,
    BacklightMode = 0x31,

    TapeSpeed = 0x40,
    TapeDirection = 0x41,
    TapeMode = 0x42,

    InputStatusLow = 0x50,
    InputStatusHigh = 0x51,
    InputChangedLow = 0x52,
    InputChangedHigh = 0x53,

    EncoderPositionLow = 0x60,
    EncoderPositionHigh = 0x61,
    EncoderDelta = 0x62,
    EncoderButton = 0x63,

    ConfigVuFrequency = 0x70,
    ConfigDebounce = 0x71,
    ConfigOptions = 0x72,

    Command = 0xF0,
}

impl Register {
    /// Every register in address order.
    pub const ALL: [Register; 27] = [
        Register::DeviceId,
        Register::FirmwareMajor,
        Register::FirmwareMinor,
        Register::FirmwarePatch,
        Register::Control,
        Register::Status,
        Register::Error,
        Register::VuLeft,
        Register::VuRight,
        Register::VuMode,
        Register::Backlight,
        Register::BacklightMode,
        Register::TapeSpeed,
        Register::TapeDirection,
        Register::TapeMode,
        Register::InputStatusLow,
        Register::InputStatusHigh,
        Register::InputChangedLow,
        Register::InputChangedHigh,
        Register::EncoderPositionLow,
        Register::EncoderPositionHigh,
        Register::EncoderDelta,
        Register::EncoderButton,
        Register::ConfigVuFrequency,
        Register::ConfigDebounce,
        Register::ConfigOptions,
        Register::Command,
    ];

    /// Bus address of the register.
    pub fn addr(self) -> u8 {
        self as u8
    }

    pub fn access(self) -> Access {
        use Register::*;

        match self {
            DeviceId | FirmwareMajor | FirmwareMinor | FirmwarePatch | Status | Error
            | InputStatusLow | InputStatusHigh | EncoderPositionLow | EncoderPositionHigh
            | EncoderButton => Access::ReadOnly,
            InputChangedLow | InputChangedHigh | EncoderDelta => Access::ReadClear,
            Command => Access::WriteOnly,
            Control | VuLeft | VuRight | VuMode | Backlight | BacklightMode | TapeSpeed
            | TapeDirection | TapeMode | ConfigVuFrequency | ConfigDebounce
            | ConfigOptions => Access::ReadWrite,
        }
    }

    /// Looks a register up by bus address.
    pub fn from_addr(addr: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|reg| reg.addr() == addr)
    }
}

bitflags! {
    /// Control register (0x10). Writes must preserve unrelated bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u8 {
        /// Global enable
        const ENABLE = 0x01;
        /// Reset encoder position to zero
        const RESET_ENCODER = 0x02;
        /// Clear the input change latches
        const CLEAR_INPUTS = 0x04;
        const VU_ENABLE = 0x08;
        const BACKLIGHT_ENABLE = 0x10;
        const TAPE_ENABLE = 0x20;
        /// Store the device configuration in its EEPROM
        const SAVE_CONFIG = 0x40;
        /// Reload the device configuration from its EEPROM
        const LOAD_CONFIG = 0x80;
    }
}

bitflags! {
    /// Status register (0x11)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const READY = 0x01;
        const ERROR = 0x02;
        const VU_ACTIVE = 0x04;
        const BACKLIGHT_ON = 0x08;
        const TAPE_RUNNING = 0x10;
        const INPUT_CHANGED = 0x20;
        const ENCODER_CHANGED = 0x40;
        const BUTTON_PRESSED = 0x80;
    }
}

bitflags! {
    /// Error register (0x12)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorFlags: u8 {
        const BUS_OVERFLOW = 0x01;
        const INVALID_REGISTER = 0x02;
        const INVALID_COMMAND = 0x04;
        const PWM_FAULT = 0x08;
        const WATCHDOG = 0x10;
    }
}

/// VU meter operating mode (0x22).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuMode {
    Normal = 0x00,
    PeakHold = 0x01,
    Test = 0x02,
    Off = 0xFF,
}

/// Backlight operating mode (0x31).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BacklightMode {
    Manual = 0x00,
    /// Brightness follows the VU level
    Auto = 0x01,
    Pulse = 0x02,
    Off = 0xFF,
}

/// Tape motor direction (0x41).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TapeDirection {
    Stop = 0x00,
    Forward = 0x01,
    Reverse = 0x02,
    /// Active brake
    Brake = 0x03,
}

/// Tape motor mode (0x42).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TapeMode {
    Manual = 0x00,
    Auto = 0x01,
    Off = 0xFF,
}

/// Encoder button gesture as classified by the firmware (0x63).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ButtonGesture {
    Released = 0x00,
    Pressed = 0x01,
    /// Held for longer than a second
    Held = 0x02,
    DoubleClick = 0x03,
}

impl ButtonGesture {
    pub fn from_register(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Released),
            0x01 => Some(Self::Pressed),
            0x02 => Some(Self::Held),
            0x03 => Some(Self::DoubleClick),
            _ => None,
        }
    }
}

/// Opcodes accepted by the write-only command register (0xF0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Nop = 0x00,
    Reset = 0x01,
    FactoryReset = 0x02,
    CalibrateVu = 0x10,
    TestVuLeft = 0x11,
    TestVuRight = 0x12,
    TestVuBoth = 0x13,
    TestBacklight = 0x20,
    TestTapeMotor = 0x30,
    TestAll = 0xFF,
}

/// Reinterprets the low `bits` bits of `value` as a two's-complement number.
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    debug_assert!((1..=32).contains(&bits));
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Combines the position register pair into a signed 16-bit position.
pub fn decode_position(low: u8, high: u8) -> i16 {
    sign_extend(u32::from(u16::from_le_bytes([low, high])), 16) as i16
}

/// Splits a position into the `(low, high)` register pair.
pub fn encode_position(position: i16) -> (u8, u8) {
    let [low, high] = (position as u16).to_le_bytes();
    (low, high)
}

/// Decodes the signed 8-bit encoder delta register.
pub fn decode_delta(raw: u8) -> i8 {
    sign_extend(u32::from(raw), 8) as i8
}

use std::path::Path;

use i2cdev::{core::I2CDevice, linux::LinuxI2CDevice};
use tracing::info;

use super::RegisterBus;
use crate::{error::BusError, PanelError, Result};

/// SMBus byte-data access through a Linux `/dev/i2c-*` character device.
pub struct LinuxI2cBus {
    device: LinuxI2CDevice,
}

impl LinuxI2cBus {
    /// Opens the character device and selects the slave address.
    pub fn open(device: &Path, address: u16) -> Result<Self> {
        let handle = LinuxI2CDevice::new(device, address).map_err(|err| {
            PanelError::Connection(format!("failed to open {}: {err}", device.display()))
        })?;
        info!(
            device = %device.display(),
            address = format_args!("0x{address:02X}"),
            "opened I2C bus"
        );
        Ok(Self { device: handle })
    }
}

impl RegisterBus for LinuxI2cBus {
    fn read_byte(&mut self, register: u8) -> std::result::Result<u8, BusError> {
        Ok(self.device.smbus_read_byte_data(register)?)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> std::result::Result<(), BusError> {
        Ok(self.device.smbus_write_byte_data(register, value)?)
    }
}

impl std::fmt::Debug for LinuxI2cBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxI2cBus").finish()
    }
}

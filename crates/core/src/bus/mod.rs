use tracing::{debug, info, trace, warn};

use crate::{
    error::{BusError, BusOp},
    registers::{Register, DEVICE_ID},
    PanelError, Result,
};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(test)]
pub(crate) mod sim;

#[cfg(target_os = "linux")]
pub use linux::LinuxI2cBus as SystemBus;

#[cfg(not(target_os = "linux"))]
pub use unsupported::UnsupportedBus as SystemBus;

/// Byte-level access to the peripheral's register file.
///
/// Implementations move one byte per call and report failures as-is; retry
/// policy belongs to the caller because some registers clear on read.
pub trait RegisterBus {
    fn read_byte(&mut self, register: u8) -> std::result::Result<u8, BusError>;

    fn write_byte(&mut self, register: u8, value: u8) -> std::result::Result<(), BusError>;
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn read_byte(&mut self, register: u8) -> std::result::Result<u8, BusError> {
        (**self).read_byte(register)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> std::result::Result<(), BusError> {
        (**self).write_byte(register, value)
    }
}

/// Exclusive register session with the peripheral.
///
/// The session is released by [`Transport::close`] or, at the latest, when the
/// transport is dropped.
#[derive(Debug)]
pub struct Transport<B: RegisterBus> {
    bus: Option<B>,
}

impl<B: RegisterBus> Transport<B> {
    /// Takes ownership of an open bus and verifies the device identity.
    ///
    /// Any failure is reported as [`PanelError::Connection`]; the bus is
    /// released before returning.
    pub fn open(bus: B) -> Result<Self> {
        let mut transport = Self { bus: Some(bus) };
        match transport.read_register(Register::DeviceId) {
            Ok(DEVICE_ID) => {
                info!("peripheral controller detected");
                Ok(transport)
            }
            Ok(other) => {
                transport.close();
                Err(PanelError::Connection(format!(
                    "invalid device id 0x{other:02X} (expected 0x{DEVICE_ID:02X})"
                )))
            }
            Err(err) => {
                transport.close();
                Err(PanelError::Connection(err.to_string()))
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.bus.is_some()
    }

    pub fn read_register(&mut self, register: Register) -> Result<u8> {
        if !register.access().is_readable() {
            return Err(PanelError::Access {
                op: BusOp::Read,
                register: register.addr(),
            });
        }

        let bus = self.session(BusOp::Read, register)?;
        let value = bus
            .read_byte(register.addr())
            .map_err(|source| PanelError::register(BusOp::Read, register.addr(), source))?;
        trace!(register = ?register, value, "register read");
        Ok(value)
    }

    pub fn write_register(&mut self, register: Register, value: u8) -> Result<()> {
        if !register.access().is_writable() {
            return Err(PanelError::Access {
                op: BusOp::Write,
                register: register.addr(),
            });
        }

        let bus = self.session(BusOp::Write, register)?;
        bus.write_byte(register.addr(), value)
            .map_err(|source| PanelError::register(BusOp::Write, register.addr(), source))?;
        trace!(register = ?register, value, "register write");
        Ok(())
    }

    /// Releases the bus. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.bus.take().is_some() {
            debug!("closed register bus");
        }
    }

    fn session(&mut self, op: BusOp, register: Register) -> Result<&mut B> {
        self.bus.as_mut().ok_or_else(|| {
            warn!(register = ?register, %op, "register access on closed bus");
            PanelError::register(
                op,
                register.addr(),
                std::io::Error::new(std::io::ErrorKind::NotConnected, "bus is closed"),
            )
        })
    }
}

impl<B: RegisterBus> Drop for Transport<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use std::path::Path;

    use super::RegisterBus;
    use crate::{error::BusError, PanelError, Result};

    /// Placeholder for platforms without an I2C character device.
    #[derive(Debug)]
    pub struct UnsupportedBus(());

    impl UnsupportedBus {
        pub fn open(device: &Path, _address: u16) -> Result<Self> {
            Err(PanelError::Connection(format!(
                "{} unavailable: register bus access requires Linux",
                device.display()
            )))
        }
    }

    impl RegisterBus for UnsupportedBus {
        fn read_byte(&mut self, _register: u8) -> std::result::Result<u8, BusError> {
            Err("unsupported platform".into())
        }

        fn write_byte(&mut self, _register: u8, _value: u8) -> std::result::Result<(), BusError> {
            Err("unsupported platform".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::SimulatedBoard;
    use super::*;

    #[test]
    fn open_accepts_matching_identity() {
        let transport = Transport::open(SimulatedBoard::new()).unwrap();
        assert!(transport.is_open());
    }

    #[test]
    fn open_rejects_wrong_identity_and_releases_bus() {
        let board = SimulatedBoard::new().with_register(Register::DeviceId, 0x17);
        let probe = board.probe();
        let err = Transport::open(board).unwrap_err();

        assert!(matches!(err, PanelError::Connection(_)));
        assert!(probe.dropped());
    }

    #[test]
    fn open_reports_bus_failure_as_connection_failure() {
        let board = SimulatedBoard::new().failing_reads(Register::DeviceId);
        let err = Transport::open(board).unwrap_err();
        assert!(matches!(err, PanelError::Connection(_)));
    }

    #[test]
    fn read_failure_surfaces_as_register_error() {
        let board = SimulatedBoard::new().failing_reads(Register::Status);
        let mut transport = Transport::open(board).unwrap();

        let err = transport.read_register(Register::Status).unwrap_err();
        assert!(matches!(
            err,
            PanelError::Register {
                op: BusOp::Read,
                register: 0x11,
                ..
            }
        ));
    }

    #[test]
    fn write_only_register_cannot_be_read() {
        let mut transport = Transport::open(SimulatedBoard::new()).unwrap();
        let err = transport.read_register(Register::Command).unwrap_err();
        assert!(matches!(err, PanelError::Access { op: BusOp::Read, register: 0xF0 }));
    }

    #[test]
    fn read_only_register_cannot_be_written() {
        let mut transport = Transport::open(SimulatedBoard::new()).unwrap();
        let err = transport
            .write_register(Register::InputChangedLow, 0)
            .unwrap_err();
        assert!(matches!(err, PanelError::Access { op: BusOp::Write, .. }));
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_access() {
        let board = SimulatedBoard::new();
        let probe = board.probe();
        let mut transport = Transport::open(board).unwrap();

        transport.close();
        transport.close();
        assert!(!transport.is_open());
        assert!(probe.dropped());

        let err = transport.read_register(Register::Status).unwrap_err();
        assert!(err.is_bus_failure());
    }

    #[test]
    fn drop_releases_session() {
        let board = SimulatedBoard::new();
        let probe = board.probe();
        {
            let _transport = Transport::open(board).unwrap();
            assert!(!probe.dropped());
        }
        assert!(probe.dropped());
    }
}

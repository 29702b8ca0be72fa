#![deny(missing_docs)]

//! Robust DDC/CI transactions for real-world displays.
//!
//! Frames and checksums MCCS commands, retries exchanges with
//! escalating delays, reassembles multi-fragment values, learns each
//! display's unsupported-feature convention, adapts sleep times to how
//! reliably the display answers, and serializes access across threads.
//!
//! # Example
//!
//! ```rust,no_run
//! use ddc_engine::{open_display, DisplayId, DisplayPath, DisplayRef, I2cPort, LockMode};
//!
//! # #[cfg(feature = "i2c-linux")] fn engine() -> ddc_engine::Result<()> {
//! let port = I2cPort::from_path("/dev/i2c-4").map_err(ddc_engine::DdcError::Io)?;
//! let display = DisplayRef::new(DisplayPath::I2c(4), DisplayId::default(), true);
//! let mut handle = open_display(port, display, LockMode::Wait)?;
//!
//! handle.determine_unsupported_convention()?;
//! let brightness = handle.get_nontable_value(0x10)?;
//! println!("brightness: {}/{}", brightness.value, brightness.maximum);
//! # Ok(())
//! # }
//! ```

use std::fmt;

/// DDC/CI command and control I2C address.
pub const I2C_ADDRESS_DDC_CI: u16 = 0x37;

/// DDC sub-address command prefix.
pub const SUB_ADDRESS_DDC_CI: u8 = 0x51;

pub mod commands;
pub mod display;
mod error;
pub mod lock;
mod multipart;
pub mod packet;
pub mod port;
pub mod quirks;
pub mod sleep;
pub mod transact;

pub use commands::{Command, CommandResult, FeatureCode, TimingReport};
pub use display::{
    open_display, DisplayHandle, DisplayId, DisplayRef, MccsVersion, VcpValue,
};
pub use error::{DdcError, PacketError, Result, UnsupportedReason};
pub use lock::{DisplayLockRegistry, LockMode};
pub use port::{DdcPort, I2cPort};
pub use quirks::{QuirkFlags, UnsupportedConvention};
pub use transact::{RetryPolicy, RetryStats};

/// The I/O path a display is reached through.
///
/// Locking and quirk state key on this, not on display identity: two
/// paths to the same panel are treated as two displays.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DisplayPath {
    /// An I2C bus number, as in `/dev/i2c-4`.
    I2c(u32),
    /// A USB HID device address.
    Usb {
        /// USB bus number.
        bus: u16,
        /// Device number on the bus.
        device: u16,
    },
}

impl fmt::Display for DisplayPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DisplayPath::I2c(bus) => write!(f, "/dev/i2c-{}", bus),
            DisplayPath::Usb { bus, device } => write!(f, "usb:{:03}:{:03}", bus, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_path_formatting() {
        assert_eq!(DisplayPath::I2c(4).to_string(), "/dev/i2c-4");
        assert_eq!(
            DisplayPath::Usb { bus: 3, device: 12 }.to_string(),
            "usb:003:012"
        );
    }
}

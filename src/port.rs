//! Transport seam between the transaction engine and the bus.
//!
//! The engine frames and checksums packets itself and drives any byte
//! pipe that can reach a display's DDC/CI address, I2C device nodes
//! being the usual case.

use std::io;

/// A raw byte transport to a display's DDC/CI interface.
///
/// Implementations move bytes only. Framing, checksums, delays and
/// retries all live above this trait, so a mock implementation is
/// enough to exercise the whole engine.
pub trait DdcPort {
    /// Write a framed request, starting at the sub-address byte.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read a response into `buf`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<P: DdcPort + ?Sized> DdcPort for &mut P {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
}

/// DDC/CI transport over an I2C bus master.
#[derive(Clone, Debug)]
pub struct I2cPort<I> {
    inner: I,
}

impl<I> I2cPort<I> {
    /// Wrap an open I2C device.
    pub fn new(inner: I) -> Self {
        I2cPort { inner }
    }

    /// Consume the port to return the inner device.
    pub fn into_inner(self) -> I {
        self.inner
    }

    /// Borrow the inner device.
    pub fn inner_ref(&self) -> &I {
        &self.inner
    }

    /// Mutably borrow the inner device.
    pub fn inner_mut(&mut self) -> &mut I {
        &mut self.inner
    }
}

#[cfg(feature = "i2c-linux")]
impl I2cPort<i2c_linux::I2c<::std::fs::File>> {
    /// Open a port on the given I2C device node, e.g. `/dev/i2c-4`.
    pub fn from_path<P: AsRef<::std::path::Path>>(p: P) -> io::Result<Self> {
        Ok(I2cPort::new(i2c_linux::I2c::from_path(p)?))
    }
}

impl<I> DdcPort for I2cPort<I>
where
    I: i2c::Address + i2c::ReadWrite,
    I::Error: Into<io::Error>,
{
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner
            .set_slave_address(crate::I2C_ADDRESS_DDC_CI, false)
            .map_err(Into::into)?;
        self.inner.i2c_write(data).map_err(Into::into)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .set_slave_address(crate::I2C_ADDRESS_DDC_CI, false)
            .map_err(Into::into)?;
        self.inner.i2c_read(buf).map_err(Into::into)
    }
}

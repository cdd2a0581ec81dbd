//! Console and power devices used by the syscall layer.

/// Console device
pub trait Console: Send + Sync {
    /// Write a whole buffer to the console as one chunk
    fn putbuf(&self, buf: &[u8]);

    /// Block until a key is available and return it
    fn getc(&self) -> u8;
}

/// Machine power control
pub trait Power: Send + Sync {
    /// Power the machine off
    fn power_off(&self) -> !;
}

#![no_std]

use core::fmt;

use strum::FromRepr;

pub type SysResult<T> = Result<T, SysError>;

/// Linux specific error codes defined in `errno.h`, limited to the ones the
/// cache layer reports.
/// https://www.man7.org/linux/man-pages/man3/errno.3.html
#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// No such file or directory
    ENOENT = 2,
    /// Out of memory
    ENOMEM = 12,
    /// Invalid argument
    EINVAL = 22,
    /// No space left on device
    ENOSPC = 28,
}

impl SysError {
    /// Returns the error description.
    pub const fn as_str(&self) -> &'static str {
        use self::SysError::*;
        match self {
            ENOENT => "No such file or directory",
            ENOMEM => "Out of memory",
            EINVAL => "Invalid argument",
            ENOSPC => "No space left on device",
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::from_repr(value)
    }

    /// Returns the error code value in `i32`.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.as_str(), self.code())
    }
}

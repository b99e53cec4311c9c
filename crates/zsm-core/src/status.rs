//! Status codes sent by the gatekeeper.
//!
//! A status is carried as a bare packet header whose type byte is the status
//! code and whose length is zero:
//!
//! ```text
//! [code] [0x00 0x00 0x00 0x00]
//! ```

use serde::{Deserialize, Serialize};

use crate::HEADER_SIZE;

/// Status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x07,
    InvalidType = 0x08,
    InvalidLength = 0x09,
    TooLong = 0x0A,
    ReadingSocket = 0x0B,
    WritingSocket = 0x0C,
    UnknownUser = 0x0D,
    MemoryAllocation = 0x0E,
    ErrorEncrypt = 0x0F,
    ErrorDecrypt = 0x10,
    ErrorAuthenticate = 0x11,
    ErrorIntegrity = 0x12,
    Unauthorised = 0x13,
    /// Sentinel sent by the gatekeeper when a challenge response verifies.
    Authorised = 0x14,
    ClosedConnection = 0x15,
}

impl StatusCode {
    /// Human readable description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidType => "invalid packet type",
            Self::InvalidLength => "invalid packet length",
            Self::TooLong => "packet too long",
            Self::ReadingSocket => "error reading from socket",
            Self::WritingSocket => "error writing to socket",
            Self::UnknownUser => "unknown user",
            Self::MemoryAllocation => "memory allocation failed",
            Self::ErrorEncrypt => "encryption failed",
            Self::ErrorDecrypt => "decryption failed",
            Self::ErrorAuthenticate => "authentication failed",
            Self::ErrorIntegrity => "integrity check failed",
            Self::Unauthorised => "unauthorised",
            Self::Authorised => "authorised",
            Self::ClosedConnection => "connection closed",
        }
    }

    /// Encode as a status frame.
    pub fn to_frame(self) -> [u8; HEADER_SIZE] {
        [self as u8, 0, 0, 0, 0]
    }

    /// Describe a raw status byte, including bytes outside the table.
    pub fn describe(byte: u8) -> &'static str {
        Self::try_from(byte)
            .map(|code| code.description())
            .unwrap_or("unrecognised status")
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x07 => Ok(Self::Success),
            0x08 => Ok(Self::InvalidType),
            0x09 => Ok(Self::InvalidLength),
            0x0A => Ok(Self::TooLong),
            0x0B => Ok(Self::ReadingSocket),
            0x0C => Ok(Self::WritingSocket),
            0x0D => Ok(Self::UnknownUser),
            0x0E => Ok(Self::MemoryAllocation),
            0x0F => Ok(Self::ErrorEncrypt),
            0x10 => Ok(Self::ErrorDecrypt),
            0x11 => Ok(Self::ErrorAuthenticate),
            0x12 => Ok(Self::ErrorIntegrity),
            0x13 => Ok(Self::Unauthorised),
            0x14 => Ok(Self::Authorised),
            0x15 => Ok(Self::ClosedConnection),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorised_sentinel_is_twenty() {
        assert_eq!(StatusCode::Authorised as u8, 20);
        assert_eq!(StatusCode::try_from(20), Ok(StatusCode::Authorised));
    }

    #[test]
    fn test_table_roundtrip() {
        for byte in 0x07u8..=0x15 {
            let code = StatusCode::try_from(byte).unwrap();
            assert_eq!(code as u8, byte);
        }
        assert_eq!(StatusCode::try_from(0), Err(0));
        assert_eq!(StatusCode::try_from(0x16), Err(0x16));
    }

    #[test]
    fn test_status_frame() {
        assert_eq!(StatusCode::Unauthorised.to_frame(), [0x13, 0, 0, 0, 0]);
    }

    #[test]
    fn test_describe_unknown_byte() {
        assert_eq!(StatusCode::describe(0), "unrecognised status");
        assert_eq!(StatusCode::describe(0x0D), "unknown user");
    }
}

//! Fixed-size frame codec for the instrument's serial protocol.
//!
//! Wire format:
//! ```text
//! [opcode:1][param_hi:1][param_lo:1][terminator:1 = 0xFE]
//! ```
//! Every command and every telemetry unit is exactly 4 bytes.  The 16-bit
//! parameter is big-endian.  Commands always carry the `0xFE` terminator;
//! telemetry frames are relayed as the device produced them.

use std::fmt;

use thiserror::Error;

/// Number of bytes in one frame.
pub const FRAME_LEN: usize = 4;

/// Constant last byte of every command frame.
pub const FRAME_TERMINATOR: u8 = 0xFE;

/// Errors that can occur while decoding or validating frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than [`FRAME_LEN`] bytes are buffered.  The bytes are kept for the
    /// next poll; nothing is emitted.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A payload that should hold exactly one frame has the wrong size.
    #[error("wrong frame length: expected {FRAME_LEN} bytes, got {0}")]
    WrongLength(usize),

    /// A command frame does not end in [`FRAME_TERMINATOR`].
    #[error("missing frame terminator: last byte is 0x{0:02X}, expected 0xFE")]
    MissingTerminator(u8),

    /// A hex string could not be parsed into a frame.
    #[error("invalid hex frame: '{0}'")]
    InvalidHex(String),
}

/// One immutable 4-byte serial frame.
///
/// Equality is byte-wise.  `Frame` is `Copy`: it is four bytes, cheaper to copy
/// than to reference.
///
/// # Examples
///
/// ```rust
/// use bench_core::Frame;
///
/// let open_scope = Frame::command(0x08, 0x0001);
/// assert_eq!(open_scope.as_bytes(), &[0x08, 0x00, 0x01, 0xFE]);
/// assert_eq!(open_scope.to_hex(), "080001fe");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Builds a command frame from an opcode and a 16-bit parameter.
    pub const fn command(opcode: u8, param: u16) -> Self {
        let [hi, lo] = param.to_be_bytes();
        Self([opcode, hi, lo, FRAME_TERMINATOR])
    }

    /// Wraps four raw bytes without validation (telemetry path).
    pub const fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// The first byte: identifies the device function.
    pub const fn opcode(&self) -> u8 {
        self.0[0]
    }

    /// The big-endian parameter carried in bytes 1 and 2.
    pub const fn param(&self) -> u16 {
        u16::from_be_bytes([self.0[1], self.0[2]])
    }

    /// The raw bytes, in wire order.
    pub const fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Returns `Ok(())` if the frame is a well-formed command (terminated by `0xFE`).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MissingTerminator`] otherwise.
    pub fn validate_command(&self) -> Result<(), FrameError> {
        match self.0[FRAME_LEN - 1] {
            FRAME_TERMINATOR => Ok(()),
            other => Err(FrameError::MissingTerminator(other)),
        }
    }

    /// Lowercase hex rendering, e.g. `"050004fe"`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex string (as produced by [`Frame::to_hex`]).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidHex`] if the string is not exactly four
    /// hex-encoded bytes.
    pub fn from_hex(text: &str) -> Result<Self, FrameError> {
        let bytes = hex::decode(text.trim()).map_err(|_| FrameError::InvalidHex(text.to_string()))?;
        Self::try_from(bytes.as_slice()).map_err(|_| FrameError::InvalidHex(text.to_string()))
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = FrameError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let array: [u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::WrongLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.0.to_vec()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a:02X} {b:02X} {c:02X} {d:02X}")
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({self})")
    }
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the frame and the number of bytes consumed (always [`FRAME_LEN`]),
/// so the caller can advance its read cursor.  Partial input is never
/// consumed: the caller keeps the bytes and retries once more arrive.
///
/// # Errors
///
/// Returns [`FrameError::InsufficientData`] if fewer than 4 bytes are present.
///
/// # Examples
///
/// ```rust
/// use bench_core::{decode_frame, FrameError};
///
/// let (frame, used) = decode_frame(&[0x0B, 0x00, 0x19, 0xFE, 0x01]).unwrap();
/// assert_eq!(frame.opcode(), 0x0B);
/// assert_eq!(used, 4);
///
/// assert!(matches!(
///     decode_frame(&[0x0B, 0x00]),
///     Err(FrameError::InsufficientData { needed: 4, available: 2 })
/// ));
/// ```
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), FrameError> {
    if bytes.len() < FRAME_LEN {
        return Err(FrameError::InsufficientData {
            needed: FRAME_LEN,
            available: bytes.len(),
        });
    }
    let frame = Frame::try_from(&bytes[..FRAME_LEN])?;
    Ok((frame, FRAME_LEN))
}

//! Protocol module containing the frame codec and the device command catalog.

pub mod codec;
pub mod commands;

pub use codec::{decode_frame, Frame, FrameError};
pub use commands::*;

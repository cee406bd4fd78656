//! ccsrv Protocol - Reference wire protocol for the control-channel bus
//!
//! This crate provides message types and framing for communication
//! between a module and the bus. The server framework itself only talks
//! to the bus through the `ControlSession` trait; this protocol backs
//! the reference socket session.

pub mod frame;
pub mod message;
pub mod version;

pub use frame::{read_frame, write_frame, FrameError, MAX_FRAME_SIZE};
pub use message::{BusMessage, ModuleMessage};
pub use version::{ProtocolVersion, VersionError};

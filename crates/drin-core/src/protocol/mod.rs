//! Protocol module containing message types, constants, and the text codec.

pub mod codec;
pub mod messages;

pub use codec::ProtocolError;
pub use messages::*;

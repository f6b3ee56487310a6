#![warn(missing_docs)]
//! Networking substrate shared by the client/server: explicit-layout wire
//! codec, length-prefixed framing, and reconnectable TCP connections.

mod codec;
mod connection;
mod frame;
mod transport;

pub use codec::{BufferPool, CodecError, PacketReader, PacketWriter, MAX_STRING_LEN};
pub use connection::{
    Connection, ConnectionEvent, ConnectionState, EventReceiver, TransportError,
};
pub use frame::{encode_frame, FrameAccumulator, FrameError, FRAME_HEADER_LEN, MAX_FRAME_LEN};
pub use transport::{ServerEndpoint, DEFAULT_PORT};

pub mod tlv;
pub mod transport;

pub use tlv::{Field, Packet, PacketKind, Tag, Value};
pub use transport::{MulticastTransport, Received};

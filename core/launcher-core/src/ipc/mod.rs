//! Local pub/sub channel to the download worker.

mod channel;
mod transport;

pub use channel::{ChannelExit, ChannelLoop, ChannelState, DEFAULT_POLL_TIMEOUT};
pub use transport::{ChannelPorts, Transport, TransportFactory, ZmqTransport, ZmqTransportFactory};

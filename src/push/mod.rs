//! Push channel: one duplex connection multiplexing typed event frames.
//!
//! - `frame`: inbound frame decoding and outbound payloads
//! - `transport`: session traits and the WebSocket transport
//! - `state`: connection lifecycle and retry bookkeeping
//! - `manager`: the connection owner, dispatch and reconnect loop

mod frame;
mod manager;
mod state;
mod transport;

pub use frame::{
    BusMessage, CommandOutputFrame, FrameError, LogLine, OutboundMessage, PushFrame, StatusUpdate,
    KIND_AGENT_STATUS, KIND_BUS_MESSAGE, KIND_COMMAND_OUTPUT, KIND_LOG, KIND_LOGS, KIND_STATUS,
    KIND_TASK_UPDATE,
};
pub use manager::{ConnectionManager, ConnectionOptions, SubscriptionId};
pub use state::{CloseOutcome, ConnectionState, ConnectionStateMachine, DEFAULT_MAX_RETRIES};
pub use transport::{Incoming, PushSession, PushTransport, TransportError, WsTransport};

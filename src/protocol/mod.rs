//! Wire protocol spoken over the sidecar's stdio channel.
//!
//! Every frame is one newline-terminated JSON object:
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing.
//! - `frame`: inbound request parsing and outbound frame shapes.
//! - `action`: the closed set of actions a request may name.
//! - `sink`: the mutex-guarded writer shared by every task that emits frames.

pub mod action;
pub mod codec;
pub mod frame;
pub mod sink;

pub use action::Action;
pub use frame::{ChatEvent, FrameRejection, OutboundFrame, RequestFrame};
pub use sink::OutputSink;

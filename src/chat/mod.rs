//! Chat streaming: round coordination, the tool-call rendezvous and
//! translation of caller content.

pub mod coordinator;
pub mod rendezvous;
pub mod translate;

pub use coordinator::{ChatCoordinator, ChatTurnState};
pub use rendezvous::{CallState, PendingToolCall, RendezvousTable, ToolResult};

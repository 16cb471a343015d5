//! Client side of the administrative control channel.

mod session;

pub use session::{ControlSession, ControlTarget, PendingReply};

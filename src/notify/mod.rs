//! Change notification: polling, fan-out and connection tracking.
//!
//! Provides:
//! - Connection registry for live WebSocket subscribers
//! - Broadcaster that queues one message per tick for every subscriber
//! - Change poller driving the fixed-interval scan of the change log
//! - Notifier service tying them together with a cancellable task

pub mod broadcast;
pub mod notifier;
pub mod poller;
pub mod registry;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use notifier::{ChangeNotifier, Compaction, PollSettings};
pub use poller::{ChangePoller, CursorSeed, TickOutcome};
pub use registry::{ConnectionId, ConnectionRegistry, Payload};

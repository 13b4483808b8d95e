pub mod appointment;
pub mod config;
pub mod event;
pub mod node;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod snapshot;
pub mod time_table;
pub mod wire;

// Re-export the types most callers need so integration tests and the
// binary don't have to spell out full module paths.
pub use appointment::{Appointment, NodeId, Weekday};
pub use event::{EventOp, EventRecord};
pub use node::{InsertOutcome, Node, ReceiveOutcome};
pub use time_table::TimeTable;
pub use wire::SyncMessage;

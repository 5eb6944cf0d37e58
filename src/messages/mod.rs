pub mod event;
pub mod request;
pub mod tenant;

pub use event::JukeboxEvent;
pub use request::{Command, Enqueued, Reply, Request};
pub use tenant::{LeaveReason, QueueSnapshot, QueueStateKind, TeardownCause, TenantCommand};

//! Shared infrastructure for the cmdretry workspace: a unified error type and
//! a small event/listener system, consumed by the `cmdretry` retry-loop crate
//! to publish per-attempt lifecycle events to caller-supplied listeners.

pub mod error;
pub mod events;

pub use error::{wait_ms_from, CmdRetryError};
pub use events::{CmdRetryEvent, EventListener, EventListeners, FnListener};

//! Core runtime — the run state machine and its supporting pieces.
//!
//! [`manager::RunManager`] creates runs and routes control commands;
//! [`executor`] drives the model ↔ tool loop on its own task;
//! [`bus::EventBus`] fans run events out to subscribers;
//! [`handle::RunHandle`] carries the cancellation token and the
//! pause/resume/approval signals for one active run.

pub mod bus;
pub mod executor;
pub mod handle;
pub mod manager;

pub use bus::{EventBus, Subscription};
pub use handle::RunHandle;
pub use manager::{NewRun, RunManager};

//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of the engine.
//!
//! # Tasks
//! - Delta poll: keeps each synced dataset current on a configured cadence

mod poll;

pub use poll::spawn_poll_task;

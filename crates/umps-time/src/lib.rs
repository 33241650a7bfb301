//! Virtual-time primitives for the simulation core.
//!
//! The machine uses **virtual time** (monotonic microticks since power-on) as
//! the single source of truth for device timing. Device operations never block;
//! they schedule a completion on an [`EventQueue`] and the bus dispatches it
//! when the time-of-day clock reaches the scheduled instant. Dispatch order is
//! fully deterministic: earliest fire time first, insertion order on ties.

#![forbid(unsafe_code)]

mod event_queue;
mod tod;

pub use event_queue::{Event, EventQueue};
pub use tod::format_tod;

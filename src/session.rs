//! Streaming response session core
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! transition function computes the next exchange value plus effects, and the
//! runtime executes the effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::SessionContext;
pub use transition::transition;
pub use transition::{CONNECTION_ERROR_TEXT, TIMEOUT_ERROR_TEXT};

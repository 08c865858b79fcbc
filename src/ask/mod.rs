//! `ask`: multi-turn conversations with external agents.
//!
//! Each turn sends a request envelope to the agent model's provider, runs
//! the actions of the reply in a fresh fork and uses what they emit as the
//! turn output. The reply's loop signal, the model's loop permission, its
//! turn ceiling and a progress guard decide whether another turn follows.

pub mod agent_loop;
pub mod envelope;

pub use agent_loop::{ask, StopReason};
pub use envelope::{Envelope, EnvelopeError, LoopControl, LoopSignal};

//! # Event Dispatch
//!
//! Scripts register handlers under an event name; hosts (and scripts, via
//! the `emit_event` tool) raise events by name. Dispatch is the only place
//! the engine runs code in parallel.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────┐  emit   ┌──────────────┐  fork + spawn  ┌──────────┐
//! │  Caller  │────────▶│ EventManager │───────────────▶│ Handler  │ x N
//! └──────────┘         └──────────────┘                └────┬─────┘
//!                                                           │ error / panic
//!                                                      ┌────▼─────────────┐
//!                                                      │ host error hook  │
//!                                                      └──────────────────┘
//! ```
//!
//! 1. The payload is normalized into the canonical `{name, source, payload}`
//!    map
//! 2. Every handler gets its own fork with the event bound to its payload
//!    variable
//! 3. Each handler body runs on its own task under a supervisor task that
//!    turns panics into `Internal` errors
//! 4. Failures reach the host only through its error callback; sibling
//!    handlers are never affected
//!
//! Emission is fire-and-forget. The returned [`EventDispatch`] may be
//! dropped, or awaited to wait for every handler.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use sandstep::{HostContext, Interpreter, Value};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = HostContext::new()
//!     .with_emit(|v| println!("{}", v))
//!     .with_whisper(|_, _| {})
//!     .with_event_error(|event, source, err| eprintln!("{event} from {source}: {err}"));
//! let interp = Interpreter::builder().host(host).build()?;
//! interp
//!     .emit_event("user_logged_in", "auth", Value::from("12345"))
//!     .await
//!     .join()
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod event_manager;

pub use event_manager::{canonical_event, is_canonical_event, EventDispatch, EventHandler, EventManager};

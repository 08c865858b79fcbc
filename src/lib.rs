//! # sandstep: sandboxed step execution engine
//!
//! sandstep runs small scripts made of structured steps inside isolated
//! interpreter instances. Scripts call procedures and tools, raise events
//! and converse with external agents, while the embedding host keeps
//! control over side effects through callbacks and an execution policy.
//!
//! ## Technical Foundations
//!
//! ### 1. Forked Instances
//! Every procedure call, event handler and command block runs in a fork of
//! the root [`Interpreter`]:
//! - Private locals, read-only view of root globals ([`eval::context`])
//! - Live fork registry for introspection ([`RootState::live_forks`])
//! - Depth limit from [`EngineConfig`]
//!
//! ### 2. Steps and Error Handlers
//! - Expression evaluation ([`eval::expression`])
//! - Step execution with `on_error` / `clear_error` ([`eval::statement`])
//! - Uniform error codes ([`error`])
//!
//! ### 3. Event-Based Async Processing
//! Handlers run concurrently as spawned tasks. A failing handler is reported
//! to the host and never reaches the emitter ([`event`]).
//!
//! ### 4. Agent Integration
//! - Provider interface ([`provider`])
//! - Agent models and accounts behind capability checks ([`store`], [`policy`])
//! - Multi-turn `ask` conversations ([`ask`])
//!
//! ## Processing Pipeline
//!
//! ```text
//! Program / script text → ScriptParser → Steps → Interpreter (fork) → StepExecutor
//!                                                      │
//!                                      tools · procedures · events · ask
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use sandstep::{Interpreter, Step, Expression, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let interp = Interpreter::builder().build()?;
//! let outcome = interp
//!     .execute(vec![
//!         Step::set("x", Expression::number(41.0)),
//!         Step::ret(Expression::binary(
//!             sandstep::BinaryOperator::Add,
//!             Expression::var("x"),
//!             Expression::number(1.0),
//!         )),
//!     ])
//!     .await;
//! assert_eq!(outcome.value, Value::Number(42.0));
//! # Ok(())
//! # }
//! ```

pub mod ask;
pub mod ast;
pub mod config;
pub mod error;
pub mod eval;
pub mod event;
pub mod host;
pub mod parser;
pub mod policy;
pub mod provider;
pub mod runtime;
pub mod store;
pub mod symbols;
pub mod tool;

// Re-exports
pub use ast::*;
pub use config::{AskConfig, ConfigError, EngineConfig};
pub use error::*;
pub use eval::*;
pub use event::*;
pub use host::{HostContext, UserPrompter};
pub use parser::{JsonScriptParser, ParseError, ScriptParser};
pub use policy::{AllowAll, Capability, GrantSet, PolicyError, PolicyGate};
pub use runtime::ExecutionOutcome;
pub use symbols::{StaticSymbols, SymbolProvider};
pub use tool::{Tool, ToolRegistry, ToolSpec};

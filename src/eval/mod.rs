//! Evaluation
//!
//! # Components
//!
//! ## Interpreter
//! An instance in the fork tree. Holds locals, the frame's error handler
//! and shared handles to root state and host services ([`context`]).
//!
//! ## Step Executor
//! The state machine running a block of steps, including error unwinding
//! through `on_error` handlers ([`statement`]).
//!
//! ## Expression Evaluator
//! Literals, variables, operators, indexing and calls ([`expression`]).
//!
//! ## Procedures
//! Loaded procedures and command blocks with their hoisted handlers
//! ([`procedure`]).
//!
//! # Flow
//!
//! 1. An entry point (`run`, `execute`, `emit_event`) forks the root
//! 2. The fork's steps go to [`statement::StepExecutor`]
//! 3. Steps evaluate expressions, which may call procedures (new forks)
//!    or tools
//! 4. `ask` steps hand over to [`crate::ask`]

pub mod context;
pub mod expression;
pub mod procedure;
pub mod statement;
pub mod value;

pub use context::{ForkInfo, Interpreter, InterpreterBuilder, RootState, Services};
pub use expression::ExpressionEvaluator;
pub use procedure::{Commands, Procedure};
pub use statement::{BlockOutcome, StepExecutor};
pub use value::{Handle, Value};

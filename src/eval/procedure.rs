use std::sync::Arc;

use crate::ast::{CommandBlock, ProcedureDef, Step, StepKind};
use crate::error::{ErrorCode, Position, RuntimeError, RuntimeResult};

pub type Block = Arc<Vec<Step>>;

/// Splits a body into its executable steps and its `on_error` handler.
///
/// Handlers are never executed inline; only a top-level `on_error` counts
/// and a body may declare at most one. An `on_error` nested in any other
/// block is rejected with `UnknownKeyword`.
pub(crate) fn hoist_error_handler(body: Vec<Step>) -> RuntimeResult<(Block, Option<Block>)> {
    let mut steps = Vec::with_capacity(body.len());
    let mut handler: Option<(Position, Vec<Step>)> = None;
    for step in body {
        match step.kind {
            StepKind::OnError(handler_body) => {
                reject_nested_handlers(&handler_body)?;
                if let Some((first, _)) = &handler {
                    return Err(RuntimeError::new(
                        ErrorCode::Duplicate,
                        format!("on_error already declared at {}", first),
                    )
                    .with_position(step.position));
                }
                handler = Some((step.position, handler_body));
            }
            kind => {
                let step = Step {
                    position: step.position,
                    kind,
                };
                reject_nested_handlers(nested_blocks(&step).into_iter().flatten())?;
                steps.push(step);
            }
        }
    }
    Ok((Arc::new(steps), handler.map(|(_, body)| Arc::new(body))))
}

fn reject_nested_handlers<'a>(steps: impl IntoIterator<Item = &'a Step>) -> RuntimeResult<()> {
    for step in steps {
        if let StepKind::OnError(_) = step.kind {
            return Err(RuntimeError::new(
                ErrorCode::UnknownKeyword,
                "on_error is only allowed at the top level of a body",
            )
            .with_position(step.position));
        }
        reject_nested_handlers(nested_blocks(step).into_iter().flatten())?;
    }
    Ok(())
}

fn nested_blocks(step: &Step) -> Vec<&Vec<Step>> {
    match &step.kind {
        StepKind::If {
            then_block,
            else_block,
            ..
        } => std::iter::once(then_block).chain(else_block.as_ref()).collect(),
        StepKind::While { body, .. } | StepKind::ForEach { body, .. } => vec![body],
        StepKind::OnError(body) => vec![body],
        _ => vec![],
    }
}

/// Loaded procedure. Owned by the root table, shared read-only with forks.
#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub body: Block,
    pub error_handler: Option<Block>,
    pub position: Position,
}

impl Procedure {
    pub fn from_def(def: ProcedureDef) -> RuntimeResult<Self> {
        let (body, error_handler) = hoist_error_handler(def.body)?;
        Ok(Self {
            name: def.name,
            required_params: def.required_params,
            optional_params: def.optional_params,
            body,
            error_handler,
            position: def.position,
        })
    }

    pub fn arity(&self) -> (usize, usize) {
        (
            self.required_params.len(),
            self.required_params.len() + self.optional_params.len(),
        )
    }
}

/// A command block ready to run in its own fork.
#[derive(Debug, Clone)]
pub struct Commands {
    pub body: Block,
    pub error_handler: Option<Block>,
    pub position: Position,
}

impl Commands {
    pub fn from_block(block: CommandBlock) -> RuntimeResult<Self> {
        let (body, error_handler) = hoist_error_handler(block.body)?;
        Ok(Self {
            body,
            error_handler,
            position: block.position,
        })
    }

    pub fn from_steps(steps: Vec<Step>) -> RuntimeResult<Self> {
        Self::from_block(CommandBlock {
            body: steps,
            position: Position::default(),
        })
    }
}

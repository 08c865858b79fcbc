//! Program tree consumed by the engine.
//!
//! The grammar and the builder that produces these nodes live outside this
//! crate; the engine only needs the shapes below. Every node is plain,
//! immutable data and serializes with serde so that hosts (and agent
//! envelopes) can ship programs as JSON.

use serde::{Deserialize, Serialize};

use crate::error::Position;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Nil,
    Number(f64),
    String(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    Literal(Literal),
    Variable(String),
    List(Vec<Expression>),
    Map(Vec<(String, Expression)>),
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    /// Procedure or tool call. `tool.`-prefixed names always address the
    /// tool registry; bare names try script procedures first.
    Call {
        name: String,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn nil() -> Self {
        Expression::Literal(Literal::Nil)
    }

    pub fn number(n: impl Into<f64>) -> Self {
        Expression::Literal(Literal::Number(n.into()))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expression::Literal(Literal::String(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        Expression::Literal(Literal::Bool(b))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expression::Variable(name.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LValue {
    Variable(String),
    /// `name[key]` on a list or map held in `name`.
    Element { variable: String, key: Expression },
}

impl LValue {
    pub fn var(name: impl Into<String>) -> Self {
        LValue::Variable(name.into())
    }
}

/// One statement. The variant decides how the executor interprets it and
/// carries only what that interpretation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    Set {
        targets: Vec<LValue>,
        value: Expression,
    },
    Call(Expression),
    Return(Vec<Expression>),
    Emit(Expression),
    Whisper {
        handle: Expression,
        data: Expression,
    },
    If {
        condition: Expression,
        then_block: Vec<Step>,
        #[serde(default)]
        else_block: Option<Vec<Step>>,
    },
    While {
        condition: Expression,
        body: Vec<Step>,
    },
    ForEach {
        variable: String,
        collection: Expression,
        body: Vec<Step>,
    },
    Must(Expression),
    /// `mustbe check(args...)`: the call must succeed and return a truthy value.
    MustBe {
        check: String,
        args: Vec<Expression>,
    },
    Fail(Option<Expression>),
    OnError(Vec<Step>),
    ClearError,
    Ask {
        agent_model: Expression,
        prompt: Expression,
        #[serde(default)]
        into: Option<LValue>,
    },
    PromptUser {
        prompt: Expression,
        into: LValue,
    },
    Break,
    Continue,
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub position: Position,
    pub kind: StepKind,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            position: Position::default(),
            kind,
        }
    }

    pub fn at(line: usize, column: usize, kind: StepKind) -> Self {
        Self {
            position: Position::new(line, column),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        (&self.kind).into()
    }

    pub fn set(name: impl Into<String>, value: Expression) -> Self {
        Step::new(StepKind::Set {
            targets: vec![LValue::var(name)],
            value,
        })
    }

    pub fn emit(value: Expression) -> Self {
        Step::new(StepKind::Emit(value))
    }

    pub fn ret(value: Expression) -> Self {
        Step::new(StepKind::Return(vec![value]))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Step::new(StepKind::Call(Expression::call(name, args)))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Step::new(StepKind::Fail(Some(Expression::string(message))))
    }

    pub fn on_error(body: Vec<Step>) -> Self {
        Step::new(StepKind::OnError(body))
    }

    pub fn clear_error() -> Self {
        Step::new(StepKind::ClearError)
    }

    pub fn ask(agent_model: &str, prompt: Expression, into: &str) -> Self {
        Step::new(StepKind::Ask {
            agent_model: Expression::string(agent_model),
            prompt,
            into: Some(LValue::var(into)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcedureDef {
    pub name: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    pub body: Vec<Step>,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDecl {
    /// Evaluated once, when the handler is registered.
    pub name: Expression,
    #[serde(default)]
    pub handler_name: Option<String>,
    #[serde(default)]
    pub payload_variable: Option<String>,
    pub body: Vec<Step>,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandBlock {
    pub body: Vec<Step>,
    #[serde(default)]
    pub position: Position,
}

/// A loaded unit: the tree handed to `load` / `append`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub procedures: Vec<ProcedureDef>,
    #[serde(default)]
    pub events: Vec<EventDecl>,
    #[serde(default)]
    pub commands: Vec<CommandBlock>,
}

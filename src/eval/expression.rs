use std::collections::HashMap;

use async_recursion::async_recursion;

use crate::ast::{BinaryOperator, Expression, Literal, UnaryOperator};
use crate::error::{ErrorCode, RuntimeError, RuntimeResult};

use super::context::Interpreter;
use super::value::Value;

#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    #[async_recursion]
    pub async fn eval_expression(
        &self,
        expr: &Expression,
        interp: &Interpreter,
    ) -> RuntimeResult<Value> {
        match expr {
            Expression::Literal(literal) => Ok(self.eval_literal(literal)),
            Expression::Variable(name) => interp.get_variable(name).await,
            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expression(item, interp).await?);
                }
                Ok(Value::List(values))
            }
            Expression::Map(entries) => {
                let mut map = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval_expression(value, interp).await?);
                }
                Ok(Value::Map(map))
            }
            Expression::Binary { op, left, right } => {
                let left = self.eval_expression(left, interp).await?;
                // 短絡評価
                match op {
                    BinaryOperator::And if !left.is_truthy() => return Ok(Value::Bool(false)),
                    BinaryOperator::Or if left.is_truthy() => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let right = self.eval_expression(right, interp).await?;
                self.eval_binary_op(*op, &left, &right)
            }
            Expression::Unary { op, operand } => {
                let value = self.eval_expression(operand, interp).await?;
                match (op, value) {
                    (UnaryOperator::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOperator::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOperator::Negate, value) => Err(RuntimeError::type_error(format!(
                        "cannot negate {}",
                        value.type_name()
                    ))),
                }
            }
            Expression::Index { target, index } => {
                let target = self.eval_expression(target, interp).await?;
                let index = self.eval_expression(index, interp).await?;
                index_value(&target, &index)
            }
            Expression::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expression(arg, interp).await?);
                }
                interp.call(name, values).await
            }
        }
    }

    fn eval_literal(&self, literal: &Literal) -> Value {
        match literal {
            Literal::Nil => Value::Nil,
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }

    pub fn eval_binary_op(
        &self,
        op: BinaryOperator,
        left: &Value,
        right: &Value,
    ) -> RuntimeResult<Value> {
        use BinaryOperator::*;
        match op {
            Add => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
                (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
                (Value::List(a), Value::List(b)) => {
                    Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
                }
                _ => Err(operand_error(op, left, right)),
            },
            Subtract | Multiply | Divide | Modulo => {
                let (a, b) = match (left, right) {
                    (Value::Number(a), Value::Number(b)) => (*a, *b),
                    _ => return Err(operand_error(op, left, right)),
                };
                match op {
                    Subtract => Ok(Value::Number(a - b)),
                    Multiply => Ok(Value::Number(a * b)),
                    Divide | Modulo if b == 0.0 => Err(RuntimeError::new(
                        ErrorCode::DivisionByZero,
                        "division by zero",
                    )),
                    Divide => Ok(Value::Number(a / b)),
                    _ => Ok(Value::Number(a % b)),
                }
            }
            Equal => Ok(Value::Bool(left == right)),
            NotEqual => Ok(Value::Bool(left != right)),
            Less | LessEqual | Greater | GreaterEqual => {
                let ordering = match (left, right) {
                    (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => None,
                }
                .ok_or_else(|| operand_error(op, left, right))?;
                Ok(Value::Bool(match op {
                    Less => ordering.is_lt(),
                    LessEqual => ordering.is_le(),
                    Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
            Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        }
    }
}

fn operand_error(op: BinaryOperator, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "unsupported operands for {}: {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

pub(crate) fn list_index(len: usize, index: &Value) -> RuntimeResult<usize> {
    let n = index.as_number().ok_or_else(|| {
        RuntimeError::type_error(format!("list index must be a number, got {}", index.type_name()))
    })?;
    if n.fract() != 0.0 || n < 0.0 || n as usize >= len {
        return Err(RuntimeError::key_not_found(format!(
            "index {} out of range for length {}",
            index, len
        )));
    }
    Ok(n as usize)
}

pub(crate) fn index_value(target: &Value, index: &Value) -> RuntimeResult<Value> {
    match target {
        Value::List(items) => Ok(items[list_index(items.len(), index)?].clone()),
        Value::Map(map) => {
            let key = index.as_str().ok_or_else(|| {
                RuntimeError::type_error(format!("map key must be a string, got {}", index.type_name()))
            })?;
            map.get(key)
                .cloned()
                .ok_or_else(|| RuntimeError::key_not_found(format!("key '{}' not found", key)))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::String(chars[list_index(chars.len(), index)?].to_string()))
        }
        other => Err(RuntimeError::type_error(format!(
            "cannot index into {}",
            other.type_name()
        ))),
    }
}

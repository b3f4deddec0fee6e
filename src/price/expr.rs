//! Infix arithmetic over named decimal fields.
//!
//! Formulas are compiled to reverse Polish notation with the shunting-yard
//! algorithm and evaluated over an environment of `name -> Option<value>`.
//! `None` is an ordinary value: any operation touching it yields `None`, as
//! does division by zero.

use bigdecimal::{BigDecimal, Zero};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

pub type Fields = BTreeMap<String, Option<BigDecimal>>;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character {0:?} at {1}")]
    UnexpectedChar(char, usize),

    #[error("malformed number {0}")]
    BadNumber(String),

    #[error("unbalanced parentheses")]
    Unbalanced,

    #[error("operator without operand")]
    MissingOperand,

    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("empty expression")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(BigDecimal),
    Field(String),
    Op(Op),
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Add | Op::Sub => 1,
            Op::Mul | Op::Div => 2,
            Op::Neg => 3,
        }
    }

    fn right_assoc(self) -> bool {
        self == Op::Neg
    }
}

fn tokenize(formula: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = BigDecimal::from_str(&text).map_err(|_| ExprError::BadNumber(text.clone()))?;
            tokens.push(Token::Number(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Field(chars[start..i].iter().collect()));
            continue;
        }

        // A minus is unary unless it follows an operand.
        let follows_operand = matches!(tokens.last(), Some(Token::Number(_) | Token::Field(_) | Token::Close));
        let token = match c {
            '+' => Token::Op(Op::Add),
            '-' if follows_operand => Token::Op(Op::Sub),
            '-' => Token::Op(Op::Neg),
            '*' => Token::Op(Op::Mul),
            '/' => Token::Op(Op::Div),
            '(' => Token::Open,
            ')' => Token::Close,
            other => return Err(ExprError::UnexpectedChar(other, i)),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

/// A compiled formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    rpn: Vec<Token>,
}

impl Expression {
    pub fn parse(formula: &str) -> Result<Self, ExprError> {
        let mut output = Vec::new();
        let mut stack: Vec<Token> = Vec::new();

        for token in tokenize(formula)? {
            match token {
                Token::Number(_) | Token::Field(_) => output.push(token),
                Token::Op(op) => {
                    while let Some(Token::Op(top)) = stack.last() {
                        let top = *top;
                        let pops = if op.right_assoc() {
                            top.precedence() > op.precedence()
                        } else {
                            top.precedence() >= op.precedence()
                        };
                        if !pops {
                            break;
                        }
                        stack.pop();
                        output.push(Token::Op(top));
                    }
                    stack.push(Token::Op(op));
                }
                Token::Open => stack.push(Token::Open),
                Token::Close => loop {
                    match stack.pop() {
                        Some(Token::Open) => break,
                        Some(op) => output.push(op),
                        None => return Err(ExprError::Unbalanced),
                    }
                },
            }
        }
        while let Some(token) = stack.pop() {
            if token == Token::Open {
                return Err(ExprError::Unbalanced);
            }
            output.push(token);
        }
        if output.is_empty() {
            return Err(ExprError::Empty);
        }

        let expression = Expression { rpn: output };
        expression.check_arity()?;
        Ok(expression)
    }

    fn check_arity(&self) -> Result<(), ExprError> {
        let mut depth: usize = 0;
        for token in &self.rpn {
            match token {
                Token::Op(Op::Neg) => {
                    if depth < 1 {
                        return Err(ExprError::MissingOperand);
                    }
                }
                Token::Op(_) => {
                    if depth < 2 {
                        return Err(ExprError::MissingOperand);
                    }
                    depth -= 1;
                }
                _ => depth += 1,
            }
        }
        if depth == 1 {
            Ok(())
        } else {
            Err(ExprError::MissingOperand)
        }
    }

    pub fn evaluate(&self, fields: &Fields) -> Result<Option<BigDecimal>, ExprError> {
        let mut stack: Vec<Option<BigDecimal>> = Vec::with_capacity(self.rpn.len());
        for token in &self.rpn {
            match token {
                Token::Number(n) => stack.push(Some(n.clone())),
                Token::Field(name) => {
                    let value = fields.get(name).ok_or_else(|| ExprError::UnknownField(name.clone()))?;
                    stack.push(value.clone());
                }
                Token::Op(Op::Neg) => {
                    let value = stack.pop().ok_or(ExprError::MissingOperand)?;
                    stack.push(value.map(|v| -v));
                }
                Token::Op(op) => {
                    let rhs = stack.pop().ok_or(ExprError::MissingOperand)?;
                    let lhs = stack.pop().ok_or(ExprError::MissingOperand)?;
                    stack.push(apply(*op, lhs, rhs));
                }
                Token::Open | Token::Close => return Err(ExprError::Unbalanced),
            }
        }
        stack.pop().ok_or(ExprError::Empty)
    }
}

fn apply(op: Op, lhs: Option<BigDecimal>, rhs: Option<BigDecimal>) -> Option<BigDecimal> {
    let (lhs, rhs) = (lhs?, rhs?);
    match op {
        Op::Add => Some(lhs + rhs),
        Op::Sub => Some(lhs - rhs),
        Op::Mul => Some(lhs * rhs),
        Op::Div if rhs.is_zero() => None,
        Op::Div => Some(lhs / rhs),
        Op::Neg => None,
    }
}

pub fn evaluate(formula: &str, fields: &Fields) -> Result<Option<BigDecimal>, ExprError> {
    Expression::parse(formula)?.evaluate(fields)
}

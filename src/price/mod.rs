//! Price and oracle resolution.

pub mod bytecode;
pub mod decimals;
pub mod expr;
pub mod resolver;

use thiserror::Error;

pub use resolver::PriceResolver;

#[derive(Debug, Error, PartialEq)]
pub enum PriceError {
    #[error("creation code: {0}")]
    Bytecode(String),

    #[error("not a decimal value: {0}")]
    Decimal(String),

    #[error(transparent)]
    Expr(#[from] expr::ExprError),
}

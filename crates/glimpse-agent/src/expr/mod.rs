//! Watch-expression and condition analysis.
//!
//! Conditions and watch expressions arrive as source text. Before anything
//! is sent to the debugger for evaluation the agent parses the text and
//! proves it free of observable side effects; an expression that fails
//! either step is rejected without touching the debuggee.

pub mod ast;
mod lexer;
mod parser;
mod validate;

use thiserror::Error;

pub use parser::{parse, ParseError};
pub use validate::is_side_effect_free;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExprError {
    /// Parse failure; the message already names the offending token.
    #[error("{0}")]
    Parse(String),
    #[error("Expression not allowed")]
    NotAllowed,
}

/// Parse `source` and verify it is side-effect free.
pub fn analyze(source: &str) -> Result<ast::Expr, ExprError> {
    let expr = parser::parse(source).map_err(|err| ExprError::Parse(err.message))?;
    if is_side_effect_free(&expr) {
        Ok(expr)
    } else {
        Err(ExprError::NotAllowed)
    }
}

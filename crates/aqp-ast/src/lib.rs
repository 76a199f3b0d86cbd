//! AQP AST - textual filter parser and AST types

pub mod ast;
mod parser;
mod to_ir;

pub use ast::*;
pub use parser::{parse, parse_filter, ParseError};

//! Convert AST to canonical IR

use aqp_ir::{self as ir};
use crate::ast::*;

impl Filter {
    /// Convert AST Filter to an IR conjunction
    pub fn to_ir(self) -> ir::FilterExpr {
        ir::FilterExpr::new(self.comparisons.into_iter().map(|c| c.to_ir()).collect())
    }
}

impl ComparisonNode {
    fn to_ir(self) -> ir::Comparison {
        ir::Comparison::new(self.column, self.op.to_ir(), self.value.to_ir())
    }
}

impl CmpOp {
    fn to_ir(self) -> ir::CompareOp {
        match self {
            CmpOp::Eq => ir::CompareOp::Eq,
            CmpOp::Ne => ir::CompareOp::Ne,
            CmpOp::Lt => ir::CompareOp::Lt,
            CmpOp::Le => ir::CompareOp::Le,
            CmpOp::Gt => ir::CompareOp::Gt,
            CmpOp::Ge => ir::CompareOp::Ge,
            CmpOp::Contains => ir::CompareOp::Contains,
        }
    }
}

impl Literal {
    fn to_ir(self) -> ir::Value {
        match self {
            Literal::Null => ir::Value::Null,
            Literal::Bool(b) => ir::Value::Bool(b),
            Literal::Int(i) => ir::Value::Int(i),
            Literal::Float(f) => ir::Value::Float(f),
            Literal::Percent(p) => ir::Value::Float(p / 100.0),
            Literal::String(s) => ir::Value::String(s),
        }
    }
}

//! `$expr` filter documents
//!
//! Query stores that speak the Mongo-style aggregation dialect express a filter
//! as `{"$expr": {"$and": [{"$gt": [{"$convert": {"input": {"$getField": "col"},
//! "to": "double"}}, {"$literal": 100}]}, ...]}}`. The dialect has no `$lt`,
//! `$lte` or `$ne` in common use; they are written as `$not` over `$gte`, `$gt`
//! and `$eq` respectively.

use serde_json::{json, Value as Json};

use crate::{CompareOp, Comparison, FilterExpr, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprDocError {
    #[error("Filter document must be a JSON object")]
    NotAnObject,

    #[error("Unsupported operator in filter document: {0}")]
    Unsupported(String),

    #[error("Malformed filter document: {0}")]
    Malformed(String),
}

enum Operand {
    Field(String),
    Literal(Value),
}

impl FilterExpr {
    /// Render as an `$expr` document
    pub fn to_expr_document(&self) -> Json {
        let mut nodes: Vec<Json> = self.comparisons().iter().map(comparison_node).collect();
        let body = if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            json!({ "$and": nodes })
        };
        json!({ "$expr": body })
    }

    /// Parse an `$expr` document (or its bare body) into a conjunction
    pub fn from_expr_document(doc: &Json) -> Result<FilterExpr, ExprDocError> {
        let object = doc.as_object().ok_or(ExprDocError::NotAnObject)?;
        if object.is_empty() {
            return Ok(FilterExpr::empty());
        }
        let body = object.get("$expr").unwrap_or(doc);
        Ok(FilterExpr::new(parse_node(body)?))
    }
}

fn field_node(column: &str, value: &Value) -> Json {
    let field = json!({ "$getField": column });
    match value {
        Value::Int(_) | Value::Float(_) => json!({ "$convert": { "input": field, "to": "double" } }),
        _ => field,
    }
}

fn literal_node(value: &Value) -> Json {
    json!({ "$literal": serde_json::to_value(value).unwrap_or(Json::Null) })
}

fn comparison_node(comparison: &Comparison) -> Json {
    let args = || {
        json!([
            field_node(&comparison.column, &comparison.value),
            literal_node(&comparison.value)
        ])
    };
    match comparison.op {
        CompareOp::Eq => json!({ "$eq": args() }),
        CompareOp::Gt => json!({ "$gt": args() }),
        CompareOp::Ge => json!({ "$gte": args() }),
        CompareOp::Ne => json!({ "$not": [{ "$eq": args() }] }),
        CompareOp::Lt => json!({ "$not": [{ "$gte": args() }] }),
        CompareOp::Le => json!({ "$not": [{ "$gt": args() }] }),
        CompareOp::Contains => json!({
            "$contains": {
                "input": { "$getField": comparison.column },
                "substr": literal_node(&comparison.value)
            }
        }),
    }
}

fn single_entry(node: &Json) -> Result<(&String, &Json), ExprDocError> {
    let object = node.as_object().ok_or(ExprDocError::NotAnObject)?;
    if object.len() != 1 {
        return Err(ExprDocError::Malformed(format!(
            "expected exactly one operator, found {}",
            object.len()
        )));
    }
    object
        .iter()
        .next()
        .ok_or_else(|| ExprDocError::Malformed("empty operator object".to_string()))
}

fn parse_node(node: &Json) -> Result<Vec<Comparison>, ExprDocError> {
    let (op, args) = single_entry(node)?;
    match op.as_str() {
        "$and" => {
            let items = args
                .as_array()
                .ok_or_else(|| ExprDocError::Malformed("$and expects an array".to_string()))?;
            let mut comparisons = Vec::new();
            for item in items {
                comparisons.extend(parse_node(item)?);
            }
            Ok(comparisons)
        }
        "$not" => {
            let inner = match args {
                Json::Array(items) if items.len() == 1 => &items[0],
                Json::Object(_) => args,
                _ => return Err(ExprDocError::Malformed("$not expects one operand".to_string())),
            };
            let mut comparisons = parse_node(inner)?;
            if comparisons.len() != 1 {
                return Err(ExprDocError::Unsupported("$not over a conjunction".to_string()));
            }
            let mut comparison = comparisons.remove(0);
            comparison.op = negate(comparison.op)?;
            Ok(vec![comparison])
        }
        "$contains" => {
            let object = args
                .as_object()
                .ok_or_else(|| ExprDocError::Malformed("$contains expects an object".to_string()))?;
            let column = match operand(object.get("input").unwrap_or(&Json::Null))? {
                Operand::Field(column) => column,
                Operand::Literal(_) => {
                    return Err(ExprDocError::Malformed("$contains input must be a field".to_string()))
                }
            };
            let value = match operand(object.get("substr").unwrap_or(&Json::Null))? {
                Operand::Literal(value) => value,
                Operand::Field(_) => {
                    return Err(ExprDocError::Malformed("$contains substr must be a literal".to_string()))
                }
            };
            Ok(vec![Comparison::new(column, CompareOp::Contains, value)])
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let op = CompareOp::parse(op).ok_or_else(|| ExprDocError::Unsupported(op.clone()))?;
            let items = args
                .as_array()
                .filter(|items| items.len() == 2)
                .ok_or_else(|| ExprDocError::Malformed(format!("{} expects two operands", op)))?;
            match (operand(&items[0])?, operand(&items[1])?) {
                (Operand::Field(column), Operand::Literal(value)) => Ok(vec![Comparison::new(column, op, value)]),
                (Operand::Literal(value), Operand::Field(column)) => {
                    Ok(vec![Comparison::new(column, mirror(op), value)])
                }
                _ => Err(ExprDocError::Malformed(
                    "comparison needs one field and one literal".to_string(),
                )),
            }
        }
        other => Err(ExprDocError::Unsupported(other.to_string())),
    }
}

fn operand(node: &Json) -> Result<Operand, ExprDocError> {
    match node {
        Json::Object(object) => {
            if let Some(field) = object.get("$getField") {
                return field
                    .as_str()
                    .map(|s| Operand::Field(s.to_string()))
                    .ok_or_else(|| ExprDocError::Malformed("$getField expects a string".to_string()));
            }
            if let Some(convert) = object.get("$convert") {
                let input = convert
                    .get("input")
                    .ok_or_else(|| ExprDocError::Malformed("$convert without input".to_string()))?;
                return operand(input);
            }
            if let Some(literal) = object.get("$literal") {
                return scalar(literal).map(Operand::Literal);
            }
            Err(ExprDocError::Malformed(format!("unknown operand {}", Json::Object(object.clone()))))
        }
        _ => scalar(node).map(Operand::Literal),
    }
}

fn scalar(node: &Json) -> Result<Value, ExprDocError> {
    match node {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .ok_or_else(|| ExprDocError::Malformed(format!("unrepresentable number {}", n))),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(_) | Json::Object(_) => Err(ExprDocError::Malformed(format!(
            "literal must be a scalar, found {}",
            node
        ))),
    }
}

fn negate(op: CompareOp) -> Result<CompareOp, ExprDocError> {
    match op {
        CompareOp::Eq => Ok(CompareOp::Ne),
        CompareOp::Ne => Ok(CompareOp::Eq),
        CompareOp::Gt => Ok(CompareOp::Le),
        CompareOp::Ge => Ok(CompareOp::Lt),
        CompareOp::Lt => Ok(CompareOp::Ge),
        CompareOp::Le => Ok(CompareOp::Gt),
        CompareOp::Contains => Err(ExprDocError::Unsupported("$not over $contains".to_string())),
    }
}

// `literal op field` rewritten as `field op' literal`
fn mirror(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        other => other,
    }
}

//! Pest-based parser for textual filter expressions

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "filter.pest"]
pub struct FilterParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Pest error: {0}")]
    Pest(#[from] Box<pest::error::Error<Rule>>),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Pest(Box::new(err))
    }
}

/// Parse filter source text into AST
pub fn parse(source: &str) -> Result<Filter, ParseError> {
    let mut pairs = FilterParser::parse(Rule::filter, source)?;
    let filter_pair = pairs
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty input".to_string()))?;

    let mut comparisons = Vec::new();
    for pair in filter_pair.into_inner() {
        match pair.as_rule() {
            Rule::conjunction => {
                for item in pair.into_inner() {
                    if item.as_rule() == Rule::comparison {
                        comparisons.push(parse_comparison(item)?);
                    }
                }
            }
            Rule::EOI => {}
            _ => {}
        }
    }

    Ok(Filter { comparisons })
}

/// Parse filter source text straight into the IR conjunction
pub fn parse_filter(source: &str) -> Result<aqp_ir::FilterExpr, ParseError> {
    Ok(parse(source)?.to_ir())
}

fn next_inner<'a>(inner: &mut pest::iterators::Pairs<'a, Rule>, what: &str) -> Result<Pair<'a, Rule>, ParseError> {
    inner
        .next()
        .ok_or_else(|| ParseError::Syntax(format!("Missing {}", what)))
}

fn parse_comparison(pair: Pair<Rule>) -> Result<ComparisonNode, ParseError> {
    let mut inner = pair.into_inner();
    let column = parse_column(next_inner(&mut inner, "column")?);
    let op = parse_operator(next_inner(&mut inner, "operator")?)?;
    let value = parse_value(next_inner(&mut inner, "value")?)?;

    Ok(ComparisonNode { column, op, value })
}

fn parse_column(pair: Pair<Rule>) -> String {
    let text = pair.as_str();
    text.strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        .unwrap_or(text)
        .to_string()
}

fn parse_operator(pair: Pair<Rule>) -> Result<CmpOp, ParseError> {
    let op = match pair.as_str().to_ascii_lowercase().as_str() {
        "=" | "==" => CmpOp::Eq,
        "!=" | "<>" => CmpOp::Ne,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        "contains" => CmpOp::Contains,
        other => return Err(ParseError::Syntax(format!("Unknown operator: {}", other))),
    };
    Ok(op)
}

fn parse_value(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::Syntax("Empty value".to_string()))?;

    match inner.as_rule() {
        Rule::number => parse_number(inner.as_str()),
        Rule::string => {
            let body = inner.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Literal::String(unescape(body)))
        }
        Rule::boolean => Ok(Literal::Bool(inner.as_str().eq_ignore_ascii_case("true"))),
        Rule::null => Ok(Literal::Null),
        _ => Err(ParseError::Syntax(format!("Invalid value: {:?}", inner.as_rule()))),
    }
}

fn parse_number(text: &str) -> Result<Literal, ParseError> {
    let invalid = || ParseError::Syntax(format!("Invalid number: {}", text));

    if let Some(body) = text.strip_suffix('%') {
        return body.parse::<f64>().map(Literal::Percent).map_err(|_| invalid());
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Literal::Int(i));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Literal::Float)
        .ok_or_else(invalid)
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conjunction() {
        let filter = parse("latency_ms < 100 AND accuracy > 0.90").unwrap();
        assert_eq!(
            filter.comparisons,
            vec![
                ComparisonNode {
                    column: "latency_ms".to_string(),
                    op: CmpOp::Lt,
                    value: Literal::Int(100),
                },
                ComparisonNode {
                    column: "accuracy".to_string(),
                    op: CmpOp::Gt,
                    value: Literal::Float(0.9),
                },
            ]
        );
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(parse("").unwrap().comparisons.is_empty());
        assert!(parse("   \n").unwrap().comparisons.is_empty());
    }

    #[test]
    fn test_parse_dotted_and_quoted_columns() {
        let filter = parse("output.model_latency.mean <= 250 and `model name` contains 'gpt'").unwrap();
        assert_eq!(filter.comparisons[0].column, "output.model_latency.mean");
        assert_eq!(filter.comparisons[1].column, "model name");
        assert_eq!(filter.comparisons[1].op, CmpOp::Contains);
        assert_eq!(filter.comparisons[1].value, Literal::String("gpt".to_string()));
    }

    #[test]
    fn test_parse_string_escapes() {
        let filter = parse(r#"name = "say \"hi\"""#).unwrap();
        assert_eq!(filter.comparisons[0].value, Literal::String("say \"hi\"".to_string()));
    }

    #[test]
    fn test_parse_booleans_and_alternate_operators() {
        let filter = parse("is_baseline == TRUE && epochs <> 3").unwrap();
        assert_eq!(filter.comparisons[0].value, Literal::Bool(true));
        assert_eq!(filter.comparisons[1].op, CmpOp::Ne);
    }

    #[test]
    fn test_percent_literal_lowers_to_fraction() {
        let expr = parse_filter("accuracy > 90%").unwrap();
        assert_eq!(expr.to_string(), "accuracy > 0.9");
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        assert!(parse("latency_ms <").is_err());
        assert!(parse("latency_ms < 100 AND").is_err());
        assert!(parse("latency_ms < 100 OR accuracy > 1").is_err());
        assert!(parse("{\"filter\": []}").is_err());
    }

    #[test]
    fn test_display_output_parses_back() {
        let source = r#"latency_ms < 100 AND model_name contains "gpt" AND is_baseline = false"#;
        let expr = parse_filter(source).unwrap();
        assert_eq!(expr.to_string(), source);
    }

    #[test]
    fn test_display_quotes_columns_that_need_it() {
        let source = "`f1-score` > 0.9 AND `model name` contains \"gpt\" AND `2nd_pass` = true";
        let expr = parse_filter(source).unwrap();
        assert_eq!(expr.comparisons()[0].column, "f1-score");
        assert_eq!(expr.to_string(), source);
        assert_eq!(parse_filter(&expr.to_string()).unwrap(), expr);
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parsed `exclusiveGateway` outgoing-flow condition: `flag_name OP literal`.
/// Evaluated against the workflow's `data` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionExpr {
    pub field: String,
    pub op: ConditionOp,
    pub literal: ConditionLiteral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    Eq,
    Neq,
    Lt,
    Gt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConditionLiteral {
    Bool(bool),
    I64(i64),
    Str(String),
}

/// Parse `conditionExpression` text of the form `= field == true`,
/// `amount > 5`, or `status != "approved"`. Returns `None` for text
/// that doesn't match the supported shape, in which case the flow is
/// treated as unconditional.
pub fn parse_condition(text: &str) -> Option<ConditionExpr> {
    let text = text.trim();
    let text = text.strip_prefix('=').unwrap_or(text).trim();

    let (field, op, literal) = if let Some((lhs, rhs)) = text.split_once("==") {
        (lhs.trim(), ConditionOp::Eq, rhs.trim())
    } else if let Some((lhs, rhs)) = text.split_once("!=") {
        (lhs.trim(), ConditionOp::Neq, rhs.trim())
    } else if let Some((lhs, rhs)) = text.split_once('>') {
        (lhs.trim(), ConditionOp::Gt, rhs.trim())
    } else if let Some((lhs, rhs)) = text.split_once('<') {
        (lhs.trim(), ConditionOp::Lt, rhs.trim())
    } else {
        return None;
    };

    if field.is_empty() {
        return None;
    }

    let literal = match literal {
        "true" => ConditionLiteral::Bool(true),
        "false" => ConditionLiteral::Bool(false),
        other if other.starts_with('"') && other.ends_with('"') && other.len() >= 2 => {
            ConditionLiteral::Str(other[1..other.len() - 1].to_string())
        }
        other => match other.parse::<i64>() {
            Ok(n) => ConditionLiteral::I64(n),
            Err(_) => ConditionLiteral::Str(other.to_string()),
        },
    };

    Some(ConditionExpr {
        field: field.to_string(),
        op,
        literal,
    })
}

impl ConditionExpr {
    pub fn evaluate(&self, data: &serde_json::Map<String, Value>) -> bool {
        let actual = data.get(&self.field);
        match (&self.literal, actual) {
            (ConditionLiteral::Bool(expected), Some(Value::Bool(actual))) => match self.op {
                ConditionOp::Eq => actual == expected,
                ConditionOp::Neq => actual != expected,
                ConditionOp::Lt | ConditionOp::Gt => false,
            },
            (ConditionLiteral::I64(expected), Some(Value::Number(actual))) => {
                let actual = match actual.as_i64() {
                    Some(v) => v,
                    None => return false,
                };
                match self.op {
                    ConditionOp::Eq => actual == *expected,
                    ConditionOp::Neq => actual != *expected,
                    ConditionOp::Lt => actual < *expected,
                    ConditionOp::Gt => actual > *expected,
                }
            }
            (ConditionLiteral::Str(expected), Some(Value::String(actual))) => match self.op {
                ConditionOp::Eq => actual == expected,
                ConditionOp::Neq => actual != expected,
                ConditionOp::Lt => actual < expected,
                ConditionOp::Gt => actual > expected,
            },
            (_, None) => self.op == ConditionOp::Neq,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn parses_bool_eq() {
        let c = parse_condition("= approved == true").unwrap();
        assert_eq!(c.field, "approved");
        assert_eq!(c.op, ConditionOp::Eq);
        assert_eq!(c.literal, ConditionLiteral::Bool(true));
    }

    #[test]
    fn parses_numeric_gt() {
        let c = parse_condition("amount > 1000").unwrap();
        assert!(c.evaluate(&data(json!({"amount": 1500}))));
        assert!(!c.evaluate(&data(json!({"amount": 500}))));
    }

    #[test]
    fn parses_quoted_string_eq() {
        let c = parse_condition("status == \"approved\"").unwrap();
        assert!(c.evaluate(&data(json!({"status": "approved"}))));
        assert!(!c.evaluate(&data(json!({"status": "pending"}))));
    }

    #[test]
    fn missing_field_satisfies_only_neq() {
        let c = parse_condition("flag == true").unwrap();
        assert!(!c.evaluate(&data(json!({}))));
        let c = parse_condition("flag != true").unwrap();
        assert!(c.evaluate(&data(json!({}))));
    }

    #[test]
    fn unparseable_text_returns_none() {
        assert!(parse_condition("always").is_none());
    }
}

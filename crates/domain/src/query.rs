//! Query criteria
//!
//! Criteria are the single way callers narrow repository reads and deletes.
//! Field and label criteria translate to SQL in the Postgres repository and
//! are evaluated in process by the in-memory repository; limit and order
//! criteria steer result shaping.
//!
//! The string form accepted on the API (`fieldQuery` / `labelQuery`) is
//! `<left> <op> <right>` clauses joined with ` and `.

use chrono::{DateTime, Utc};

use crate::errors::{DomainError, Result};

/// Separator symbol forbidden inside label keys and values.
pub const QUERY_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Exists,
    EqualsOrNil,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "eq",
            Operator::NotEquals => "ne",
            Operator::In => "in",
            Operator::NotIn => "notin",
            Operator::GreaterThan => "gt",
            Operator::GreaterThanOrEqual => "gte",
            Operator::LessThan => "lt",
            Operator::LessThanOrEqual => "lte",
            Operator::Exists => "en",
            Operator::EqualsOrNil => "eqornil",
        }
    }

    pub fn from_str(s: &str) -> Option<Operator> {
        Some(match s {
            "eq" => Operator::Equals,
            "ne" => Operator::NotEquals,
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            "gt" => Operator::GreaterThan,
            "gte" => Operator::GreaterThanOrEqual,
            "lt" => Operator::LessThan,
            "lte" => Operator::LessThanOrEqual,
            "en" => Operator::Exists,
            "eqornil" => Operator::EqualsOrNil,
            _ => return None,
        })
    }

    /// Whether the operator accepts more than one right operand.
    pub fn is_multivalue(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriterionType {
    Field,
    Label,
    ResultLimit,
    ResultOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct Criterion {
    pub criterion_type: CriterionType,
    pub left_op: String,
    pub operator: Operator,
    pub right_op: Vec<String>,
    pub order_type: Option<OrderType>,
}

impl Criterion {
    pub fn by_field(operator: Operator, left: impl Into<String>, right: impl Into<String>) -> Self {
        Criterion {
            criterion_type: CriterionType::Field,
            left_op: left.into(),
            operator,
            right_op: vec![right.into()],
            order_type: None,
        }
    }

    pub fn by_field_in(
        left: impl Into<String>,
        right: impl IntoIterator<Item = String>,
    ) -> Self {
        Criterion {
            criterion_type: CriterionType::Field,
            left_op: left.into(),
            operator: Operator::In,
            right_op: right.into_iter().collect(),
            order_type: None,
        }
    }

    pub fn by_label(operator: Operator, key: impl Into<String>, value: impl Into<String>) -> Self {
        Criterion {
            criterion_type: CriterionType::Label,
            left_op: key.into(),
            operator,
            right_op: vec![value.into()],
            order_type: None,
        }
    }

    pub fn limit(limit: usize) -> Self {
        Criterion {
            criterion_type: CriterionType::ResultLimit,
            left_op: String::new(),
            operator: Operator::Equals,
            right_op: vec![limit.to_string()],
            order_type: None,
        }
    }

    pub fn order_by(field: impl Into<String>, order_type: OrderType) -> Self {
        Criterion {
            criterion_type: CriterionType::ResultOrder,
            left_op: field.into(),
            operator: Operator::Equals,
            right_op: Vec::new(),
            order_type: Some(order_type),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.criterion_type == CriterionType::Field || self.criterion_type == CriterionType::Label
        {
            if self.left_op.is_empty() {
                return Err(DomainError::bad_request("missing left operand in query"));
            }
            if self.right_op.len() > 1 && !self.operator.is_multivalue() {
                return Err(DomainError::bad_request(
                    "multiple values received for single value operation",
                ));
            }
        }
        Ok(())
    }
}

/// A typed field value extracted from an object for in-process evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Time(DateTime<Utc>),
    Nil,
}

impl FieldValue {
    fn as_comparable(&self) -> Option<String> {
        match self {
            FieldValue::Str(s) => Some(s.clone()),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Int(i) => Some(i.to_string()),
            FieldValue::Time(t) => Some(t.to_rfc3339()),
            FieldValue::Nil => None,
        }
    }
}

/// Evaluates a single field criterion against an extracted value.
pub fn matches_field(value: &FieldValue, criterion: &Criterion) -> bool {
    let actual = value.as_comparable();
    match criterion.operator {
        Operator::Equals => actual.as_deref() == criterion.right_op.first().map(String::as_str),
        Operator::NotEquals => actual.as_deref() != criterion.right_op.first().map(String::as_str),
        Operator::In => actual
            .map(|a| criterion.right_op.iter().any(|r| r == &a))
            .unwrap_or(false),
        Operator::NotIn => actual
            .map(|a| !criterion.right_op.iter().any(|r| r == &a))
            .unwrap_or(true),
        Operator::Exists => !matches!(value, FieldValue::Nil),
        Operator::EqualsOrNil => match &actual {
            None => true,
            Some(a) => criterion.right_op.first().map(String::as_str) == Some(a.as_str()),
        },
        Operator::GreaterThan
        | Operator::GreaterThanOrEqual
        | Operator::LessThan
        | Operator::LessThanOrEqual => {
            let expected = match criterion.right_op.first() {
                Some(e) => e,
                None => return false,
            };
            compare_ordered(value, expected)
                .map(|ordering| match criterion.operator {
                    Operator::GreaterThan => ordering == std::cmp::Ordering::Greater,
                    Operator::GreaterThanOrEqual => ordering != std::cmp::Ordering::Less,
                    Operator::LessThan => ordering == std::cmp::Ordering::Less,
                    Operator::LessThanOrEqual => ordering != std::cmp::Ordering::Greater,
                    _ => unreachable!(),
                })
                .unwrap_or(false)
        }
    }
}

fn compare_ordered(value: &FieldValue, expected: &str) -> Option<std::cmp::Ordering> {
    match value {
        FieldValue::Int(i) => expected.parse::<i64>().ok().map(|e| i.cmp(&e)),
        FieldValue::Time(t) => DateTime::parse_from_rfc3339(expected)
            .ok()
            .map(|e| t.cmp(&e.with_timezone(&Utc))),
        FieldValue::Str(s) => Some(s.as_str().cmp(expected)),
        FieldValue::Bool(_) | FieldValue::Nil => None,
    }
}

/// Parses a `fieldQuery` string into field criteria.
pub fn parse_field_query(input: &str) -> Result<Vec<Criterion>> {
    parse_query(input, CriterionType::Field)
}

/// Parses a `labelQuery` string into label criteria.
pub fn parse_label_query(input: &str) -> Result<Vec<Criterion>> {
    parse_query(input, CriterionType::Label)
}

fn parse_query(input: &str, criterion_type: CriterionType) -> Result<Vec<Criterion>> {
    let mut criteria = Vec::new();
    for clause in split_clauses(input) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        criteria.push(parse_clause(clause, criterion_type)?);
    }
    Ok(criteria)
}

// Splits on ` and ` while ignoring separators inside quoted values.
fn split_clauses(input: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut rest = input;
    while !rest.is_empty() {
        if !in_quotes && rest.starts_with(" and ") {
            clauses.push(std::mem::take(&mut current));
            rest = &rest[" and ".len()..];
            continue;
        }
        let c = rest.chars().next().expect("non-empty remainder");
        if c == '\'' {
            in_quotes = !in_quotes;
        }
        current.push(c);
        rest = &rest[c.len_utf8()..];
    }
    clauses.push(current);
    clauses
}

fn parse_clause(clause: &str, criterion_type: CriterionType) -> Result<Criterion> {
    let mut parts = clause.splitn(3, ' ');
    let left = parts
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| DomainError::bad_request(format!("invalid query clause: {}", clause)))?;
    let op_token = parts
        .next()
        .ok_or_else(|| DomainError::bad_request(format!("missing operator in clause: {}", clause)))?;
    let operator = Operator::from_str(op_token).ok_or_else(|| {
        DomainError::bad_request(format!("unsupported query operator: {}", op_token))
    })?;
    let rest = parts.next().unwrap_or("").trim();

    let right_op = if operator == Operator::Exists {
        Vec::new()
    } else if rest.starts_with('(') && rest.ends_with(')') {
        rest[1..rest.len() - 1]
            .split(',')
            .map(|v| unquote(v.trim()).to_string())
            .collect()
    } else {
        vec![unquote(rest).to_string()]
    };

    let criterion = Criterion {
        criterion_type,
        left_op: left.to_string(),
        operator,
        right_op,
        order_type: None,
    };
    criterion.validate()?;
    Ok(criterion)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_equals_clause() {
        let criteria = parse_field_query("broker_id eq 'abc-123'").unwrap();
        assert_eq!(criteria.len(), 1);
        assert_eq!(criteria[0].left_op, "broker_id");
        assert_eq!(criteria[0].operator, Operator::Equals);
        assert_eq!(criteria[0].right_op, vec!["abc-123"]);
    }

    #[test]
    fn parses_multiple_clauses_joined_with_and() {
        let criteria =
            parse_field_query("broker_id eq 'b' and catalog_id eq 'c'").unwrap();
        assert_eq!(criteria.len(), 2);
        assert_eq!(criteria[1].left_op, "catalog_id");
    }

    #[test]
    fn parses_in_lists() {
        let criteria = parse_field_query("id in ('id1','id2','id3')").unwrap();
        assert_eq!(criteria[0].operator, Operator::In);
        assert_eq!(criteria[0].right_op, vec!["id1", "id2", "id3"]);
    }

    #[test]
    fn quoted_values_may_contain_and() {
        let criteria = parse_field_query("name eq 'fish and chips'").unwrap();
        assert_eq!(criteria.len(), 1);
        assert_eq!(criteria[0].right_op, vec!["fish and chips"]);
    }

    #[test]
    fn rejects_unknown_operators() {
        let err = parse_field_query("name like 'x'").unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn rejects_multiple_values_for_single_value_operator() {
        let err = parse_field_query("name eq ('a','b')").unwrap_err();
        assert_eq!(err.kind(), "BadRequest");
    }

    #[test]
    fn matches_time_comparisons() {
        let older = FieldValue::Time(Utc::now() - chrono::Duration::hours(2));
        let cutoff = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let criterion = Criterion::by_field(Operator::LessThan, "updated_at", cutoff);
        assert!(matches_field(&older, &criterion));
    }

    #[test]
    fn eqornil_accepts_missing_values() {
        let criterion = Criterion::by_field(Operator::EqualsOrNil, "platform_id", "p1");
        assert!(matches_field(&FieldValue::Nil, &criterion));
        assert!(matches_field(&FieldValue::Str("p1".into()), &criterion));
        assert!(!matches_field(&FieldValue::Str("p2".into()), &criterion));
    }
}

//! Translates filter and update documents into sqlite expressions over the json text
//! stored in [`DATA_COLUMN`].
//!
//! Field values are extracted with `json_extract`. Literals never end up in the sql text;
//! they are pushed onto the caller's parameter list and referenced as `?N`.

use rusqlite::types::Value as SqlValue;
use serde_json::Map;
use serde_json::Value;

use crate::base::DATA_COLUMN;
use crate::error::{Error, Result};

/// The expression extracting `field` from a stored document.
///
/// Filters and index definitions both go through here so sqlite can match one to the other.
pub fn field_expr(field: &str) -> String {
    format!("json_extract({}, '$.{}')", DATA_COLUMN, field.replace('\'', "''"))
}

pub struct QueryTranslator {}

impl QueryTranslator {
    /// Translates a filter document into a predicate. An empty filter yields an empty string.
    pub fn query_document(&self, query: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
        let query_doc = query.as_object().ok_or_else(|| Error::MalformedExpression(format!("query is not an object: {}", query)))?;

        let mut terms = Vec::new();
        for (key, value) in query_doc.iter() {
            let term = match key.as_str() {
                "$or" => self.logical(key, value, " OR ", params)?,
                "$and" => self.logical(key, value, " AND ", params)?,
                "$nor" => format!("NOT {}", self.logical(key, value, " OR ", params)?),
                op if op.starts_with('$') => return Err(Error::UnknownOperator(op.to_string())),
                _ => self.field(key, value, params)?,
            };
            terms.push(term);
        }

        Ok(terms.join(" AND "))
    }

    fn field(&self, key: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
        match value {
            Value::Object(ops) => self.operators(key, ops, params),
            Value::Array(_) => Err(Error::MalformedExpression(format!("array is not a valid value for {}: {}", key, value))),
            scalar => self.equals(key, scalar, params),
        }
    }

    /// Every operator in `ops` applies to `key`; the clauses are joined with AND in key order.
    fn operators(&self, key: &str, ops: &Map<String, Value>, params: &mut Vec<SqlValue>) -> Result<String> {
        let fetch = field_expr(key);
        let mut terms = Vec::new();

        for (op, value) in ops.iter() {
            let term = match op.as_str() {
                "$eq" => match value {
                    Value::Null => format!("{} IS NULL", fetch),
                    _ => format!("{} = {}", fetch, self.value(op, value, params)?),
                },
                "$ne" => match value {
                    Value::Null => format!("{} IS NOT NULL", fetch),
                    _ => format!("{} != {}", fetch, self.value(op, value, params)?),
                },
                "$gt" => format!("{} > {}", fetch, self.value(op, value, params)?),
                "$gte" => format!("{} >= {}", fetch, self.value(op, value, params)?),
                "$lt" => format!("{} < {}", fetch, self.value(op, value, params)?),
                "$lte" => format!("{} <= {}", fetch, self.value(op, value, params)?),
                "$in" => {
                    let values = self.array(op, value)?;
                    if values.is_empty() {
                        String::from("0")
                    } else {
                        let clauses = values.iter().map(|v| self.equals(key, v, params)).collect::<Result<Vec<_>>>()?;
                        format!("({})", clauses.join(" OR "))
                    }
                }
                "$nin" => {
                    let values = self.array(op, value)?;
                    if values.is_empty() {
                        String::from("1")
                    } else {
                        let clauses = values.iter().map(|v| self.not_equals(key, v, params)).collect::<Result<Vec<_>>>()?;
                        format!("({})", clauses.join(" AND "))
                    }
                }
                "$not" => match value {
                    Value::Object(inner) => format!("NOT ({})", self.operators(key, inner, params)?),
                    _ => return Err(Error::MalformedExpression(format!("$not expects an operator object: {}", value))),
                },
                "$exists" => match value {
                    Value::Bool(true) => format!("json_type({}, '$.{}') IS NOT NULL", DATA_COLUMN, key.replace('\'', "''")),
                    Value::Bool(false) => format!("json_type({}, '$.{}') IS NULL", DATA_COLUMN, key.replace('\'', "''")),
                    _ => return Err(Error::MalformedExpression(format!("$exists expects a boolean: {}", value))),
                },
                "$or" => self.logical(op, value, " OR ", params)?,
                "$and" => self.logical(op, value, " AND ", params)?,
                "$nor" => format!("NOT {}", self.logical(op, value, " OR ", params)?),
                _ => return Err(Error::UnknownOperator(op.to_string())),
            };
            terms.push(term);
        }

        if terms.is_empty() {
            Ok(String::from("1"))
        } else {
            Ok(terms.join(" AND "))
        }
    }

    /// Each element of `value` is a full filter document; the parenthesized results are joined by `joiner`.
    fn logical(&self, op: &str, value: &Value, joiner: &str, params: &mut Vec<SqlValue>) -> Result<String> {
        let queries = self.array(op, value)?;
        if queries.is_empty() {
            return Ok(String::from(if joiner == " OR " { "(0)" } else { "(1)" }));
        }

        let mut clauses = Vec::new();
        for query in queries {
            if !query.is_object() {
                return Err(Error::MalformedExpression(format!("{} expects an array of objects: {}", op, value)));
            }
            let res = self.query_document(query, params)?;
            clauses.push(format!("({})", if res.is_empty() { "1" } else { res.as_str() }));
        }

        Ok(format!("({})", clauses.join(joiner)))
    }

    /// Equality the way json_extract sees it. Booleans come back as 0/1, so `true` is
    /// anything above zero and `false` is zero.
    fn equals(&self, key: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
        let fetch = field_expr(key);
        match value {
            Value::Bool(true) => Ok(format!("{} > 0", fetch)),
            Value::Bool(false) => Ok(format!("{} = 0", fetch)),
            Value::Null => Ok(format!("{} IS NULL", fetch)),
            _ => Ok(format!("{} = {}", fetch, self.value(key, value, params)?)),
        }
    }

    fn not_equals(&self, key: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
        let fetch = field_expr(key);
        match value {
            Value::Bool(true) => Ok(format!("{} = 0", fetch)),
            Value::Bool(false) => Ok(format!("{} > 0", fetch)),
            Value::Null => Ok(format!("{} IS NOT NULL", fetch)),
            _ => Ok(format!("{} != {}", fetch, self.value(key, value, params)?)),
        }
    }

    fn array<'v>(&self, op: &str, value: &'v Value) -> Result<&'v Vec<Value>> {
        value.as_array().ok_or_else(|| Error::MalformedExpression(format!("{} expects an array: {}", op, value)))
    }

    /// Binds a scalar and returns its placeholder.
    fn value(&self, op: &str, value: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
        params.push(scalar(value).ok_or_else(|| Error::MalformedExpression(format!("{} expects a scalar: {}", op, value)))?);
        Ok(format!("?{}", params.len()))
    }
}

fn scalar(value: &Value) -> Option<SqlValue> {
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Bool(b) => Some(SqlValue::Integer(*b as i64)),
        Value::Number(n) => n.as_i64().map(SqlValue::Integer).or_else(|| n.as_f64().map(SqlValue::Real)),
        _ => None,
    }
}

/// Translates an update document into the right hand side of `SET data = ...`.
///
/// Without `$set` the document replaces the stored one, keeping the stored `_id`.
/// With `$set` the mapping is merged into the stored document with `json_patch`; nested
/// objects are merged recursively and a `null` value removes the field instead of storing null.
pub fn update_document(update: &Value, params: &mut Vec<SqlValue>) -> Result<String> {
    let update_doc = update.as_object().ok_or_else(|| Error::MalformedExpression(format!("update is not an object: {}", update)))?;

    if let Some(op) = update_doc.keys().find(|k| k.starts_with('$') && k.as_str() != "$set") {
        return Err(Error::UnknownOperator(op.to_string()));
    }

    match update_doc.get("$set") {
        Some(Value::Object(patch)) => {
            if update_doc.len() > 1 {
                return Err(Error::MalformedExpression(format!("$set cannot be mixed with plain fields: {}", update)));
            }
            let mut patch = patch.clone();
            patch.remove("_id");
            params.push(SqlValue::Text(serde_json::to_string(&patch)?));
            Ok(format!("json_patch({}, ?{})", DATA_COLUMN, params.len()))
        }
        Some(other) => Err(Error::MalformedExpression(format!("$set expects an object: {}", other))),
        None => {
            params.push(SqlValue::Text(serde_json::to_string(update_doc)?));
            Ok(format!("json_set(?{}, '$._id', {})", params.len(), field_expr("_id")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn translate(query: Value) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let sql = QueryTranslator {}.query_document(&query, &mut params).unwrap();
        (sql, params)
    }

    fn translate_err(query: Value) -> Error {
        let mut params = Vec::new();
        QueryTranslator {}.query_document(&query, &mut params).unwrap_err()
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(translate(json!({})), (String::new(), vec![]));
    }

    #[test]
    fn test_scalar_equality() {
        let (sql, params) = translate(json!({"name": "bob", "age": 3}));
        assert_eq!(sql, "json_extract(data, '$.age') = ?1 AND json_extract(data, '$.name') = ?2");
        assert_eq!(params, vec![SqlValue::Integer(3), SqlValue::Text("bob".into())]);
    }

    #[test]
    fn test_boolean_equality() {
        assert_eq!(translate(json!({"flag": true})).0, "json_extract(data, '$.flag') > 0");
        assert_eq!(translate(json!({"flag": false})).0, "json_extract(data, '$.flag') = 0");
    }

    #[test]
    fn test_null_equality() {
        assert_eq!(translate(json!({"gone": null})).0, "json_extract(data, '$.gone') IS NULL");
    }

    #[test]
    fn test_comparisons() {
        let (sql, params) = translate(json!({"a": {"$gt": 1, "$lte": 2.5}}));
        assert_eq!(sql, "json_extract(data, '$.a') > ?1 AND json_extract(data, '$.a') <= ?2");
        assert_eq!(params, vec![SqlValue::Integer(1), SqlValue::Real(2.5)]);
    }

    #[test]
    fn test_eq_binds_booleans_as_integers() {
        let (sql, params) = translate(json!({"flag": {"$eq": false}}));
        assert_eq!(sql, "json_extract(data, '$.flag') = ?1");
        assert_eq!(params, vec![SqlValue::Integer(0)]);
    }

    #[test]
    fn test_in_and_nin() {
        let (sql, params) = translate(json!({"a": {"$in": [1, true]}}));
        assert_eq!(sql, "(json_extract(data, '$.a') = ?1 OR json_extract(data, '$.a') > 0)");
        assert_eq!(params, vec![SqlValue::Integer(1)]);

        let (sql, _) = translate(json!({"a": {"$nin": ["x", false]}}));
        assert_eq!(sql, "(json_extract(data, '$.a') != ?1 AND json_extract(data, '$.a') > 0)");
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        assert_eq!(translate(json!({"a": {"$in": []}})).0, "0");
        assert_eq!(translate(json!({"a": {"$nin": []}})).0, "1");
    }

    #[test]
    fn test_not() {
        let (sql, _) = translate(json!({"a": {"$not": {"$eq": 2}}}));
        assert_eq!(sql, "NOT (json_extract(data, '$.a') = ?1)");
    }

    #[test]
    fn test_top_level_or_and() {
        let (sql, params) = translate(json!({"$or": [{"a": 1}, {"a": 3}]}));
        assert_eq!(sql, "((json_extract(data, '$.a') = ?1) OR (json_extract(data, '$.a') = ?2))");
        assert_eq!(params.len(), 2);

        let (sql, _) = translate(json!({"$and": [{"a": {"$gte": 1}}, {}]}));
        assert_eq!(sql, "((json_extract(data, '$.a') >= ?1) AND (1))");
    }

    #[test]
    fn test_field_level_or() {
        let (sql, _) = translate(json!({"ignored": {"$or": [{"a": 1}, {"b": "x"}]}}));
        assert_eq!(sql, "((json_extract(data, '$.a') = ?1) OR (json_extract(data, '$.b') = ?2))");
    }

    #[test]
    fn test_nor_and_exists() {
        let (sql, _) = translate(json!({"$nor": [{"a": 1}]}));
        assert_eq!(sql, "NOT ((json_extract(data, '$.a') = ?1))");
        assert_eq!(translate(json!({"a": {"$exists": false}})).0, "json_type(data, '$.a') IS NULL");
    }

    #[test]
    fn test_empty_operator_object_is_unconstrained() {
        assert_eq!(translate(json!({"a": {}})).0, "1");
    }

    #[test]
    fn test_quotes_in_field_names_are_escaped() {
        assert_eq!(translate(json!({"it's": 1})).0, "json_extract(data, '$.it''s') = ?1");
    }

    #[test]
    fn test_unknown_operator() {
        assert!(matches!(translate_err(json!({"a": {"$regex": "x"}})), Error::UnknownOperator(op) if op == "$regex"));
        assert!(matches!(translate_err(json!({"$where": "1"})), Error::UnknownOperator(_)));
    }

    #[test]
    fn test_malformed_operands() {
        assert!(matches!(translate_err(json!({"a": {"$in": 1}})), Error::MalformedExpression(_)));
        assert!(matches!(translate_err(json!({"a": {"$not": 1}})), Error::MalformedExpression(_)));
        assert!(matches!(translate_err(json!({"a": {"$gt": [1]}})), Error::MalformedExpression(_)));
        assert!(matches!(translate_err(json!({"a": [1, 2]})), Error::MalformedExpression(_)));
        assert!(matches!(translate_err(json!({"$or": [1]})), Error::MalformedExpression(_)));
        assert!(matches!(translate_err(json!([1])), Error::MalformedExpression(_)));
    }

    #[test]
    fn test_update_replace_keeps_id() {
        let mut params = Vec::new();
        let sql = update_document(&json!({"a": 9}), &mut params).unwrap();
        assert_eq!(sql, "json_set(?1, '$._id', json_extract(data, '$._id'))");
        assert_eq!(params, vec![SqlValue::Text(r#"{"a":9}"#.into())]);
    }

    #[test]
    fn test_update_set_drops_id() {
        let mut params = vec![SqlValue::Integer(1)];
        let sql = update_document(&json!({"$set": {"b": 3, "_id": "other"}}), &mut params).unwrap();
        assert_eq!(sql, "json_patch(data, ?2)");
        assert_eq!(params[1], SqlValue::Text(r#"{"b":3}"#.into()));
    }

    #[test]
    fn test_update_rejects_bad_expressions() {
        let mut params = Vec::new();
        assert!(matches!(update_document(&json!({"$inc": {"a": 1}}), &mut params), Err(Error::UnknownOperator(_))));
        assert!(matches!(update_document(&json!({"$set": 1}), &mut params), Err(Error::MalformedExpression(_))));
        assert!(matches!(update_document(&json!({"$set": {"a": 1}, "b": 2}), &mut params), Err(Error::MalformedExpression(_))));
    }

    mod properties {
        use super::translate;
        use proptest::prelude::*;
        use serde_json::json;

        proptest! {
            #[test]
            fn placeholders_match_params(values in prop::collection::vec(any::<i64>(), 1..20)) {
                let query = json!({"a": {"$in": values.clone()}, "b": {"$nin": values.clone()}});
                let (sql, params) = translate(query);
                prop_assert_eq!(params.len(), values.len() * 2);
                let last = format!("?{}", params.len());
                let past_last = format!("?{}", params.len() + 1);
                prop_assert!(sql.contains(&last));
                prop_assert!(!sql.contains(&past_last));
            }
        }
    }
}

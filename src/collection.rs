use log::*;
use parking_lot::Mutex;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Map;
use serde_json::Value;
use std::sync::Arc;

use crate::base::*;
use crate::error::{Error, Result};
use crate::object_id::ObjectIdGenerator;
use crate::query_translator::{field_expr, update_document, QueryTranslator};

/// A named set of json documents kept in one sqlite table.
pub struct Collection {
    pub config: CollectionConfig,
    connection: Arc<Mutex<rusqlite::Connection>>,
    ids: ObjectIdGenerator,
}

fn find_internal(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Value>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;

    let mut documents = Vec::new();
    for raw in rows {
        documents.push(serde_json::from_str(&raw?)?);
    }
    Ok(documents)
}

fn count_sql(table_name: &str, where_str: &str) -> String {
    format!("SELECT COUNT(1) FROM {} {};", quote_ident(table_name), where_clause(where_str))
}

fn insert_sql(table_name: &str) -> String {
    format!("INSERT INTO {} ({}) VALUES (?1);", quote_ident(table_name), DATA_COLUMN)
}

fn count_internal(conn: &rusqlite::Connection, table_name: &str, where_str: &str, params: &[SqlValue]) -> Result<usize> {
    let sql = count_sql(table_name, where_str);
    debug!("{}", sql);
    let mut stmt = conn.prepare_cached(&sql)?;
    let count = stmt.query_row(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;
    Ok(count as usize)
}

fn insert_internal(conn: &rusqlite::Connection, table_name: &str, document: &Map<String, Value>) -> Result<()> {
    let sql = insert_sql(table_name);
    debug!("{}", sql);
    let mut stmt = conn.prepare_cached(&sql)?;
    stmt.execute(params![serde_json::to_string(document)?])?;
    Ok(())
}

impl Collection {
    /// Opens the collection described by `config`, creating its table if needed.
    pub(crate) fn create(connection: Arc<Mutex<rusqlite::Connection>>, config: CollectionConfig) -> Result<Collection> {
        let sql = format!("CREATE TABLE IF NOT EXISTS {} ({} TEXT);", quote_ident(&config.table_name), DATA_COLUMN);
        debug!("{}", sql);
        connection.lock().execute(&sql, [])?;

        let ids = ObjectIdGenerator::new(config.rng_seed);
        Ok(Collection { config, connection, ids })
    }

    pub fn get_name(&self) -> &str {
        self.config.name.as_str()
    }

    pub fn get_table_name(&self) -> &str {
        self.config.table_name.as_str()
    }

    /// Applies the collection's [`ErrorPolicy`] to the outcome of a statement.
    fn absorb<T>(&self, sql: &str, result: Result<T>, fallback: impl FnOnce() -> T) -> Result<T> {
        match result {
            Err(e) if e.is_storage() && self.config.error_policy == ErrorPolicy::LogAndContinue => {
                error!("{}: {} during {}", e.sqlite_code().unwrap_or(0), e, sql.trim());
                Ok(fallback())
            }
            other => other,
        }
    }

    /// Compiles `query` into a where clause and its parameters.
    fn translate(&self, query: &Value) -> Result<(String, Vec<SqlValue>)> {
        let mut params = Vec::<SqlValue>::new();
        let where_str = QueryTranslator {}.query_document(query, &mut params)?;
        Ok((where_str, params))
    }

    pub fn create_identifier(&self) -> String {
        self.ids.next_id()
    }

    /// Returns the document's `_id`, generating one when it is missing.
    fn assign_id(&self, document: &mut Map<String, Value>) -> Result<String> {
        match document.get("_id") {
            None => {
                let id = self.create_identifier();
                document.insert("_id".to_string(), Value::String(id.clone()));
                Ok(id)
            }
            Some(Value::String(id)) => Ok(id.clone()),
            Some(other) => Err(Error::InvalidArgument(format!("_id must be a string: {}", other))),
        }
    }

    /// Creates an index over the extracted value of `field`. Calling it again is a no-op.
    pub fn add_index(&self, field: &str) -> Result<()> {
        let sql = format!("CREATE INDEX IF NOT EXISTS {} ON {}({});", quote_ident(&index_name(&self.config.name, field)), quote_ident(&self.config.table_name), field_expr(field));
        debug!("{}", sql);
        let result = self.connection.lock().execute(&sql, []).map(|_| ()).map_err(Error::from);
        self.absorb(&sql, result, || ())
    }

    pub fn drop_index(&self, field: &str) -> Result<()> {
        let sql = format!("DROP INDEX IF EXISTS {};", quote_ident(&index_name(&self.config.name, field)));
        debug!("{}", sql);
        let result = self.connection.lock().execute(&sql, []).map(|_| ()).map_err(Error::from);
        self.absorb(&sql, result, || ())
    }

    /// Names of the indexes on this collection's table.
    pub fn indexes(&self) -> Result<Vec<String>> {
        let sql = "SELECT name FROM pragma_index_list(?1);";
        let result = (|| -> Result<Vec<String>> {
            let conn = self.connection.lock();
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params![self.config.table_name], |row| row.get::<_, String>(0))?;
            let mut names = Vec::new();
            for name in rows {
                names.push(name?);
            }
            Ok(names)
        })();
        self.absorb(sql, result, Vec::new)
    }

    /// All documents matching `query`, in storage order.
    pub fn find(&self, query: &Value) -> Result<Vec<Value>> {
        let (where_str, params) = self.translate(query)?;
        let sql = format!("SELECT {} FROM {} {};", DATA_COLUMN, quote_ident(&self.config.table_name), where_clause(&where_str));
        debug!("{}", sql);

        let result = find_internal(&self.connection.lock(), &sql, &params);
        self.absorb(&sql, result, Vec::new)
    }

    pub fn find_one(&self, query: &Value) -> Result<Option<Value>> {
        let (where_str, params) = self.translate(query)?;
        let sql = format!("SELECT {} FROM {} {} LIMIT 1;", DATA_COLUMN, quote_ident(&self.config.table_name), where_clause(&where_str));
        debug!("{}", sql);

        let result = find_internal(&self.connection.lock(), &sql, &params).map(|documents| documents.into_iter().next());
        self.absorb(&sql, result, || None)
    }

    pub fn count(&self, query: &Value) -> Result<usize> {
        let (where_str, params) = self.translate(query)?;
        let result = count_internal(&self.connection.lock(), &self.config.table_name, &where_str, &params);
        self.absorb(&count_sql(&self.config.table_name, &where_str), result, || 0)
    }

    /// Stores `document`, assigning an `_id` if it has none, and returns the `_id`.
    ///
    /// There is no uniqueness check: a document reusing an existing `_id` is stored as a second row.
    pub fn insert(&self, document: &Value) -> Result<String> {
        let mut document = document.as_object().cloned().ok_or_else(|| Error::InvalidArgument(format!("document is not an object: {}", document)))?;

        let id = self.assign_id(&mut document)?;

        let result = insert_internal(&self.connection.lock(), &self.config.table_name, &document);
        self.absorb(&insert_sql(&self.config.table_name), result, || ())?;
        Ok(id)
    }

    /// Updates the documents matching `query`.
    ///
    /// Unless `options.multi` is set the query has to contain `_id`. The flag is not a row
    /// limit: every document the query matches is updated. With `options.upsert` and no
    /// match, `update` itself is inserted as it is, `$set` key included (the query's fields
    /// are not copied into it).
    ///
    /// `$set` is applied with `json_patch`, so a field set to `null` is removed from the document.
    pub fn update(&self, query: &Value, update: &Value, options: UpdateOptions) -> Result<UpdateResult> {
        let query_doc = query.as_object().ok_or_else(|| Error::InvalidArgument(format!("query is not an object: {}", query)))?;
        if !options.multi && !query_doc.contains_key("_id") {
            return Err(Error::InvalidArgument("query must include an _id unless multi is set".to_string()));
        }

        let (where_str, mut params) = self.translate(query)?;
        let where_len = params.len();
        let set_str = update_document(update, &mut params)?;
        let sql = format!("UPDATE {} SET {} = {} {};", quote_ident(&self.config.table_name), DATA_COLUMN, set_str, where_clause(&where_str));

        let upsert = match options.upsert {
            true => {
                let mut document = update.as_object().cloned().unwrap_or_default();
                let id = self.assign_id(&mut document)?;
                Some((id, document))
            }
            false => None,
        };

        let result = (|| -> Result<UpdateResult> {
            let conn = self.connection.lock();

            if let Some((id, document)) = &upsert {
                if count_internal(&conn, &self.config.table_name, &where_str, &params[..where_len])? == 0 {
                    insert_internal(&conn, &self.config.table_name, document)?;
                    return Ok(UpdateResult { modified_count: 0, upserted_id: Some(id.clone()) });
                }
            }

            debug!("{}", sql);
            let mut stmt = conn.prepare_cached(&sql)?;
            let modified_count = stmt.execute(params_from_iter(params.iter()))?;
            Ok(UpdateResult { modified_count, upserted_id: None })
        })();

        self.absorb(&sql, result, UpdateResult::default)
    }

    /// Deletes every document matching `query`; an empty query empties the collection.
    pub fn remove(&self, query: &Value) -> Result<usize> {
        let (where_str, params) = self.translate(query)?;
        let sql = format!("DELETE FROM {} {};", quote_ident(&self.config.table_name), where_clause(&where_str));
        debug!("{}", sql);

        let result = (|| -> Result<usize> {
            let conn = self.connection.lock();
            let mut stmt = conn.prepare_cached(&sql)?;
            Ok(stmt.execute(params_from_iter(params.iter()))?)
        })();
        self.absorb(&sql, result, || 0)
    }
}

//! Per-collection document handle.

use super::filter::{json_expr, validate_name, Filter, IndexSpec, Update, ID_FIELD};
use super::{StoreError, StoreResult};
use crate::db::with_savepoint;
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode};
use serde_json::Value;

const INSERT_SQL: &str = "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3);";

/// Accessor for the documents of one collection.
#[derive(Clone, Copy)]
pub struct Collection<'conn> {
    conn: &'conn Connection,
    name: &'static str,
}

impl<'conn> Collection<'conn> {
    pub(crate) fn new(conn: &'conn Connection, name: &'static str) -> Self {
        Self { conn, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Returns every matching document in insertion order.
    pub fn find(&self, filter: &Filter) -> StoreResult<Vec<Value>> {
        self.select(filter, None)
    }

    /// Returns the earliest-inserted matching document.
    pub fn find_one(&self, filter: &Filter) -> StoreResult<Option<Value>> {
        Ok(self.select(filter, Some(1))?.into_iter().next())
    }

    pub fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let (clauses, binds) = filter.to_sql()?;
        let sql = format!("SELECT COUNT(*) FROM documents WHERE collection = ?{clauses};");
        let count: i64 = self.conn.query_row(
            &sql,
            params_from_iter(self.scoped(Vec::new(), binds)),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn insert_one(&self, doc: &Value) -> StoreResult<()> {
        let (id, body) = encode_document(doc)?;
        self.conn
            .execute(INSERT_SQL, params![self.name, id, body])
            .map_err(|err| self.write_error(err))?;
        Ok(())
    }

    /// Inserts all documents or none of them.
    ///
    /// The first rejected document rolls the whole call back; a unique-index
    /// rejection surfaces as [`StoreError::DuplicateKey`].
    pub fn insert_many(&self, docs: &[Value]) -> StoreResult<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        let encoded = docs
            .iter()
            .map(encode_document)
            .collect::<StoreResult<Vec<_>>>()?;

        with_savepoint(self.conn, "store_insert_many", || {
            let mut stmt = self.conn.prepare_cached(INSERT_SQL)?;
            for (id, body) in &encoded {
                stmt.execute(params![self.name, id, body])
                    .map_err(|err| self.write_error(err))?;
            }
            Ok(encoded.len())
        })
    }

    /// Overwrites the earliest matching document with `doc`.
    ///
    /// Returns the number of replaced documents (0 or 1).
    pub fn replace_one(&self, filter: &Filter, doc: &Value) -> StoreResult<usize> {
        let (id, body) = encode_document(doc)?;
        let (clauses, binds) = filter.to_sql()?;
        let sql = format!(
            "UPDATE documents
             SET id = ?, body = ?
             WHERE seq = (
                SELECT seq FROM documents
                WHERE collection = ?{clauses}
                ORDER BY seq ASC
                LIMIT 1
             );"
        );
        let leading = vec![SqlValue::Text(id), SqlValue::Text(body)];
        self.conn
            .execute(&sql, params_from_iter(self.scoped(leading, binds)))
            .map_err(|err| self.write_error(err))
    }

    /// Applies `update` to every matching document and returns the count.
    pub fn update_many(&self, filter: &Filter, update: &Update) -> StoreResult<usize> {
        if update.is_empty() {
            return Err(StoreError::InvalidDocument(
                "update must assign at least one field".to_string(),
            ));
        }
        let (expr, update_binds) = update.to_sql()?;
        let (clauses, filter_binds) = filter.to_sql()?;
        let sql = format!("UPDATE documents SET body = {expr} WHERE collection = ?{clauses};");
        self.conn
            .execute(&sql, params_from_iter(self.scoped(update_binds, filter_binds)))
            .map_err(|err| self.write_error(err))
    }

    /// Creates a secondary index over `spec.keys` if it does not exist yet.
    pub fn create_index(&self, spec: &IndexSpec) -> StoreResult<()> {
        validate_name(&spec.name)?;
        if spec.keys.is_empty() {
            return Err(StoreError::InvalidDocument(format!(
                "index `{}` needs at least one key",
                spec.name
            )));
        }
        let keys = spec
            .keys
            .iter()
            .map(|key| json_expr(key))
            .collect::<StoreResult<Vec<_>>>()?
            .join(", ");
        let partial = match &spec.partial {
            Some(filter) => filter.to_literal_sql()?,
            None => String::new(),
        };
        let sql = format!(
            "CREATE {unique}INDEX IF NOT EXISTS \"{name}\"
             ON documents ({keys})
             WHERE collection = '{collection}'{partial};",
            unique = if spec.unique { "UNIQUE " } else { "" },
            name = spec.name,
            collection = self.name,
        );
        self.conn
            .execute_batch(&sql)
            .map_err(|err| self.write_error(err))?;
        debug!(
            "event=index_ensure module=store status=ok collection={} index={} unique={}",
            self.name, spec.name, spec.unique
        );
        Ok(())
    }

    fn select(&self, filter: &Filter, limit: Option<u32>) -> StoreResult<Vec<Value>> {
        let (clauses, binds) = filter.to_sql()?;
        let mut sql =
            format!("SELECT body FROM documents WHERE collection = ?{clauses} ORDER BY seq ASC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(self.scoped(Vec::new(), binds)))?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            docs.push(serde_json::from_str(&body)?);
        }
        Ok(docs)
    }

    /// Orders bind values as `leading, collection, filter` to match the SQL shapes above.
    fn scoped(&self, mut leading: Vec<SqlValue>, filter_binds: Vec<SqlValue>) -> Vec<SqlValue> {
        leading.push(SqlValue::Text(self.name.to_string()));
        leading.extend(filter_binds);
        leading
    }

    fn write_error(&self, err: rusqlite::Error) -> StoreError {
        if is_unique_violation(&err) {
            StoreError::DuplicateKey {
                collection: self.name,
            }
        } else {
            err.into()
        }
    }
}

fn encode_document(doc: &Value) -> StoreResult<(String, String)> {
    let id = doc
        .as_object()
        .and_then(|object| object.get(ID_FIELD))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            StoreError::InvalidDocument("document must be an object with a string `id`".to_string())
        })?;
    Ok((id.to_string(), serde_json::to_string(doc)?))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

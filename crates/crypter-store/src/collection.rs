//! Generic document operations shared by every collection.
//!
//! A document is a JSON object keyed by `uuid`. [`Database::upsert`] reads
//! the stored document (or an empty one), hands it to a caller-supplied merge
//! function and writes the result back together with its indexed columns.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;

/// A stored JSON document.
pub type Document = Map<String, Value>;

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Conferences,
    Messages,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Conferences => "conferences",
            Self::Messages => "messages",
        }
    }

    /// Column that drives recency ordering and cursors.
    fn time_column(&self) -> &'static str {
        match self {
            Self::Users => "last_seen",
            Self::Conferences => "updated_at",
            Self::Messages => "date",
        }
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A predicate over indexed columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Messages of a conference, or the conference itself.
    Conference(Uuid),
    /// Conferences with this participant, their messages, or the user itself.
    Participant(Uuid),
    Read(bool),
    /// Time column strictly lower than the timestamp.
    Before(i64),
    /// Time column strictly greater than the timestamp.
    After(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    /// `updated_at` for conferences, `date` for messages, `last_seen` for users.
    #[default]
    Time,
    /// Messages only.
    ReadAt,
}

/// Filter + sort + limit over one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
    sort: SortField,
    order: Order,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, sort: SortField, order: Order) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render the query for `collection`. `None` when a filter or sort does
    /// not apply to that collection, in which case nothing can match.
    fn to_sql(&self, collection: Collection) -> Option<(String, Vec<SqlValue>)> {
        let table = collection.name();
        let time = collection.time_column();
        let mut clauses = Vec::with_capacity(self.filters.len());
        let mut args = Vec::with_capacity(self.filters.len() + 1);

        for filter in &self.filters {
            let clause = match (filter, collection) {
                (Filter::Conference(id), Collection::Messages) => {
                    args.push(SqlValue::Text(id.to_string()));
                    "conference = ?".to_string()
                }
                (Filter::Conference(id), Collection::Conferences) => {
                    args.push(SqlValue::Text(id.to_string()));
                    "uuid = ?".to_string()
                }
                (Filter::Participant(id), Collection::Conferences) => {
                    args.push(SqlValue::Text(id.to_string()));
                    "participant = ?".to_string()
                }
                (Filter::Participant(id), Collection::Messages) => {
                    args.push(SqlValue::Text(id.to_string()));
                    "conference IN (SELECT uuid FROM conferences WHERE participant = ?)".to_string()
                }
                (Filter::Participant(id), Collection::Users) => {
                    args.push(SqlValue::Text(id.to_string()));
                    "uuid = ?".to_string()
                }
                (Filter::Read(read), Collection::Messages) => {
                    args.push(SqlValue::Integer(i64::from(*read)));
                    "read = ?".to_string()
                }
                (Filter::Before(ts), _) => {
                    args.push(SqlValue::Integer(*ts));
                    format!("{time} < ?")
                }
                (Filter::After(ts), _) => {
                    args.push(SqlValue::Integer(*ts));
                    format!("{time} > ?")
                }
                _ => return None,
            };
            clauses.push(clause);
        }

        let sort_column = match (self.sort, collection) {
            (SortField::Time, _) => time,
            (SortField::ReadAt, Collection::Messages) => "read_at",
            (SortField::ReadAt, _) => return None,
        };
        let direction = match self.order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };

        let mut sql = format!("SELECT doc FROM {table}");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {sort_column} {direction}, uuid {direction}"));
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            args.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        Some((sql, args))
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl Database {
    /// Point lookup. A missing id yields `None`.
    pub fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>> {
        read_document(self.conn(), collection, id)
    }

    /// Indexed range query. Filters that do not apply to the collection
    /// match nothing.
    pub fn find(&self, collection: Collection, query: &Query) -> Result<Vec<Document>> {
        let Some((sql, args)) = query.to_sql(collection) else {
            tracing::debug!(collection = collection.name(), ?query, "query does not apply");
            return Ok(Vec::new());
        };

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(serde_json::from_str(&row?)?);
        }
        Ok(documents)
    }

    /// Read-merge-write one document. `merge` receives the stored document,
    /// or an empty one when absent.
    pub fn upsert<F>(&self, collection: Collection, id: Uuid, merge: F) -> Result<Document>
    where
        F: FnOnce(Document) -> Document,
    {
        let tx = self.conn().unchecked_transaction()?;
        let existing = read_document(&tx, collection, id)?.unwrap_or_default();
        let mut merged = merge(existing);
        merged.insert("uuid".into(), Value::String(id.to_string()));
        write_document(&tx, collection, id, &merged)?;
        tx.commit()?;
        Ok(merged)
    }

    /// Upsert many documents of one collection in a single transaction.
    /// Documents without a parseable `uuid` are skipped.
    pub fn bulk_upsert<F>(
        &self,
        collection: Collection,
        documents: Vec<Document>,
        merge: F,
    ) -> Result<Vec<Document>>
    where
        F: Fn(Document, Document) -> Document,
    {
        let tx = self.conn().unchecked_transaction()?;
        let mut written = Vec::with_capacity(documents.len());

        for incoming in documents {
            let Some(id) = document_id(&incoming) else {
                tracing::warn!(collection = collection.name(), "skipping document without uuid");
                continue;
            };
            let existing = read_document(&tx, collection, id)?.unwrap_or_default();
            let mut merged = merge(existing, incoming);
            merged.insert("uuid".into(), Value::String(id.to_string()));
            write_document(&tx, collection, id, &merged)?;
            written.push(merged);
        }

        tx.commit()?;
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The `uuid` field of a document, if present and well-formed.
pub fn document_id(doc: &Document) -> Option<Uuid> {
    doc.get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn int_field(doc: &Document, key: &str) -> Option<i64> {
    doc.get(key).and_then(Value::as_i64)
}

fn str_field(doc: &Document, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn read_document(conn: &Connection, collection: Collection, id: Uuid) -> Result<Option<Document>> {
    let doc: Option<String> = conn
        .query_row(
            &format!("SELECT doc FROM {} WHERE uuid = ?1", collection.name()),
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    doc.map(|d| serde_json::from_str(&d).map_err(Into::into))
        .transpose()
}

fn write_document(
    conn: &Connection,
    collection: Collection,
    id: Uuid,
    doc: &Document,
) -> Result<()> {
    let json = serde_json::to_string(doc)?;
    let id = id.to_string();

    match collection {
        Collection::Users => {
            conn.execute(
                "INSERT INTO users (uuid, last_seen, doc) VALUES (?1, ?2, ?3)
                 ON CONFLICT(uuid) DO UPDATE SET
                    last_seen = excluded.last_seen,
                    doc = excluded.doc",
                params![id, int_field(doc, "last_seen"), json],
            )?;
        }
        Collection::Conferences => {
            conn.execute(
                "INSERT INTO conferences (uuid, updated_at, participant, doc)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uuid) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    participant = excluded.participant,
                    doc = excluded.doc",
                params![
                    id,
                    int_field(doc, "updated_at").unwrap_or_default(),
                    str_field(doc, "participant"),
                    json,
                ],
            )?;
        }
        Collection::Messages => {
            let read = doc.get("read").and_then(Value::as_bool).unwrap_or(false);
            conn.execute(
                "INSERT INTO messages (uuid, conference, author, date, read, read_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(uuid) DO UPDATE SET
                    conference = excluded.conference,
                    author = excluded.author,
                    date = excluded.date,
                    read = excluded.read,
                    read_at = excluded.read_at,
                    doc = excluded.doc",
                params![
                    id,
                    str_field(doc, "conference").unwrap_or_default(),
                    str_field(doc, "author").unwrap_or_default(),
                    int_field(doc, "date").unwrap_or_default(),
                    read,
                    int_field(doc, "readAt"),
                    json,
                ],
            )?;
        }
    }
    Ok(())
}

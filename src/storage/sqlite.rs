//! SQLite persistence for locales, locale types, languages and documents.
//! Locale strings and refs are JSON columns; content and ref filters use the
//! JSON1 functions. Creation order is the table rowid.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{DocumentBackend, DocumentQuery};
use crate::error::StoreError;
use crate::locale::{Language, Locale, LocaleBackend, LocaleFilter, LocaleId, LocaleType};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS locales (
        id TEXT PRIMARY KEY,
        strings TEXT NOT NULL,
        refs TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS locale_types (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS languages (
        lang TEXT PRIMARY KEY,
        display_name TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );";

const LOCALE_COLUMNS: &str = "SELECT id, strings, refs FROM locales";

/// Row as stored: id plus the two JSON columns.
type LocaleRow = (String, String, String);

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let backend = Self::init(conn)?;
        info!(path = %db_path.display(), "SQLite locale store opened");
        Ok(backend)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn decode_locale((id, strings, refs): LocaleRow) -> Result<Locale, StoreError> {
    Ok(Locale {
        id: LocaleId::from(id),
        strings: serde_json::from_str(&strings)?,
        refs: serde_json::from_str(&refs)?,
    })
}

fn query_locales(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Locale>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<LocaleRow>, _>>()?;
    rows.into_iter().map(decode_locale).collect()
}

impl LocaleBackend for SqliteBackend {
    fn find_locale(&self, id: &LocaleId) -> Result<Option<Locale>, StoreError> {
        let conn = self.conn.lock();
        let row: Option<LocaleRow> = conn
            .query_row(
                &format!("{LOCALE_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(decode_locale).transpose()
    }

    fn find_locales(&self, filter: LocaleFilter<'_>) -> Result<Vec<Locale>, StoreError> {
        let conn = self.conn.lock();
        match filter {
            LocaleFilter::Text { text, lang } => query_locales(
                &conn,
                &format!(
                    "{LOCALE_COLUMNS} WHERE EXISTS (
                        SELECT 1 FROM json_each(locales.strings) s
                        WHERE json_extract(s.value, '$.text') = ?1
                          AND (?2 IS NULL OR json_extract(s.value, '$.lang') = ?2)
                     ) ORDER BY rowid"
                ),
                params![text, lang],
            ),
            LocaleFilter::Ref(reference) => query_locales(
                &conn,
                &format!(
                    "{LOCALE_COLUMNS} WHERE EXISTS (
                        SELECT 1 FROM json_each(locales.refs) r WHERE r.value = ?1
                     ) ORDER BY rowid"
                ),
                params![reference],
            ),
            LocaleFilter::MissingText => query_locales(
                &conn,
                &format!(
                    "{LOCALE_COLUMNS} WHERE EXISTS (
                        SELECT 1 FROM json_each(locales.strings) s
                        WHERE json_extract(s.value, '$.text') = ''
                     ) ORDER BY rowid"
                ),
                [],
            ),
            LocaleFilter::All => {
                query_locales(&conn, &format!("{LOCALE_COLUMNS} ORDER BY rowid"), [])
            }
        }
    }

    fn insert_locale(&self, locale: &Locale) -> Result<(), StoreError> {
        let strings = serde_json::to_string(&locale.strings)?;
        let refs = serde_json::to_string(&locale.refs)?;
        self.conn.lock().execute(
            "INSERT INTO locales (id, strings, refs) VALUES (?1, ?2, ?3)",
            params![locale.id.as_str(), strings, refs],
        )?;
        Ok(())
    }

    fn replace_locale(&self, locale: &Locale) -> Result<bool, StoreError> {
        let strings = serde_json::to_string(&locale.strings)?;
        let refs = serde_json::to_string(&locale.refs)?;
        let changed = self.conn.lock().execute(
            "UPDATE locales SET strings = ?2, refs = ?3 WHERE id = ?1",
            params![locale.id.as_str(), strings, refs],
        )?;
        Ok(changed > 0)
    }

    fn delete_locale(&self, id: &LocaleId) -> Result<bool, StoreError> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM locales WHERE id = ?1", params![id.as_str()])?;
        Ok(changed > 0)
    }

    fn find_or_insert_type(&self, kind: &str) -> Result<LocaleType, StoreError> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO locale_types (id, type) VALUES (?1, ?2) ON CONFLICT(type) DO NOTHING",
            params![uuid::Uuid::new_v4().to_string(), kind],
        )?;
        if inserted > 0 {
            debug!(kind, "locale type created");
        }
        let locale_type = conn.query_row(
            "SELECT id, type FROM locale_types WHERE type = ?1",
            params![kind],
            |row| {
                Ok(LocaleType {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                })
            },
        )?;
        Ok(locale_type)
    }

    fn find_type(&self, kind: &str) -> Result<Option<LocaleType>, StoreError> {
        let locale_type = self
            .conn
            .lock()
            .query_row(
                "SELECT id, type FROM locale_types WHERE type = ?1",
                params![kind],
                |row| {
                    Ok(LocaleType {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(locale_type)
    }

    fn list_types(&self) -> Result<Vec<LocaleType>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, type FROM locale_types ORDER BY rowid")?;
        let types = stmt
            .query_map([], |row| {
                Ok(LocaleType {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    fn upsert_language(&self, language: &Language) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO languages (lang, display_name) VALUES (?1, ?2)
             ON CONFLICT(lang) DO UPDATE SET display_name = excluded.display_name",
            params![language.lang, language.display_name],
        )?;
        Ok(())
    }

    fn languages(&self) -> Result<Vec<Language>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT lang, display_name FROM languages ORDER BY lang")?;
        let languages = stmt
            .query_map([], |row| {
                Ok(Language {
                    lang: row.get(0)?,
                    display_name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(languages)
    }
}

impl DocumentBackend for SqliteBackend {
    fn find_documents(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<Value>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY rowid")?;
        let bodies = stmt
            .query_map(params![collection], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut docs = Vec::with_capacity(bodies.len());
        for body in bodies {
            let doc: Value = serde_json::from_str(&body)?;
            if query.matches(&doc) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    fn find_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    fn insert_document(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)?;
        self.conn.lock().execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
            params![collection, id, body],
        )?;
        Ok(())
    }

    fn upsert_document(&self, collection: &str, id: &str, doc: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)?;
        self.conn.lock().execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
            params![collection, id, body],
        )?;
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let changed = self.conn.lock().execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::document::{DocumentSchema, Field, LocalizableCollection};
    use crate::locale::{LocaleStore, LocaleString};

    fn record(strings: &[(&str, &str)], refs: &[&str]) -> Locale {
        Locale {
            id: LocaleId::generate(),
            strings: strings.iter().map(|(l, t)| LocaleString::new(*l, *t)).collect(),
            refs: refs.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn locale_filters_use_json_columns() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let hello = record(&[("--", "Hello"), ("fr", "")], &["d1", "t1"]);
        let bye = record(&[("--", "Bye"), ("fr", "Au revoir")], &["d2"]);
        db.insert_locale(&hello).unwrap();
        db.insert_locale(&bye).unwrap();

        let by_text = db
            .find_locales(LocaleFilter::Text { text: "Au revoir", lang: Some("fr") })
            .unwrap();
        assert_eq!(by_text, vec![bye.clone()]);
        assert!(db
            .find_locales(LocaleFilter::Text { text: "Au revoir", lang: Some("--") })
            .unwrap()
            .is_empty());
        assert_eq!(
            db.find_locales(LocaleFilter::Text { text: "Hello", lang: None }).unwrap(),
            vec![hello.clone()]
        );
        assert_eq!(db.find_locales(LocaleFilter::Ref("t1")).unwrap(), vec![hello.clone()]);
        assert_eq!(db.find_locales(LocaleFilter::MissingText).unwrap(), vec![hello.clone()]);
        assert_eq!(db.find_locales(LocaleFilter::All).unwrap(), vec![hello, bye]);
    }

    #[test]
    fn replace_keeps_creation_order() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let mut first = record(&[("--", "One")], &["d1"]);
        let second = record(&[("--", "Two")], &["d1"]);
        db.insert_locale(&first).unwrap();
        db.insert_locale(&second).unwrap();

        first.refs.push("d2".into());
        assert!(db.replace_locale(&first).unwrap());
        let ids: Vec<LocaleId> = db
            .find_locales(LocaleFilter::Ref("d1"))
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

        assert!(db.delete_locale(&first.id).unwrap());
        assert!(!db.replace_locale(&first).unwrap());
        assert!(db.find_locale(&first.id).unwrap().is_none());
    }

    #[test]
    fn types_and_languages_upsert() {
        let db = SqliteBackend::open_in_memory().unwrap();
        let client = db.find_or_insert_type("client").unwrap();
        assert_eq!(db.find_or_insert_type("client").unwrap(), client);
        db.find_or_insert_type("server").unwrap();
        assert_eq!(db.list_types().unwrap().len(), 2);
        assert_eq!(db.find_type("client").unwrap(), Some(client));

        db.upsert_language(&Language { lang: "fr".into(), display_name: String::new() }).unwrap();
        db.upsert_language(&Language { lang: "fr".into(), display_name: "Français".into() }).unwrap();
        db.upsert_language(&Language { lang: "ca".into(), display_name: "Català".into() }).unwrap();
        let langs = db.languages().unwrap();
        assert_eq!(langs.iter().map(|l| l.lang.as_str()).collect::<Vec<_>>(), vec!["ca", "fr"]);
        assert_eq!(langs[1].display_name, "Français");
    }

    #[test]
    fn documents_round_trip() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.insert_document("pages", "a", &json!({ "id": "a", "slug": "home" })).unwrap();
        db.upsert_document("pages", "b", &json!({ "id": "b", "slug": "about" })).unwrap();
        db.upsert_document("pages", "a", &json!({ "id": "a", "slug": "index" })).unwrap();

        assert!(db.insert_document("pages", "a", &json!({ "id": "a" })).is_err());
        let found = db
            .find_documents("pages", &DocumentQuery::all().eq("slug", "index"))
            .unwrap();
        assert_eq!(found, vec![json!({ "id": "a", "slug": "index" })]);
        assert!(db.find_document("posts", "a").unwrap().is_none());
        assert!(db.delete_document("pages", "a").unwrap());
        assert_eq!(db.find_documents("pages", &DocumentQuery::all()).unwrap().len(), 1);
    }

    #[test]
    fn shared_locale_lifecycle_on_sqlite() {
        let db = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let store = Arc::new(LocaleStore::new(db.clone(), "en"));
        let pages = LocalizableCollection::new(
            DocumentSchema::new("pages").field(Field::localized("title")),
            db.clone(),
            Arc::clone(&store),
        );

        let a = pages.save(json!({ "title": "Hello" }), None).unwrap();
        let b = pages.save(json!({ "title": "Hello" }), None).unwrap();
        assert_eq!(a["title"], b["title"]);
        assert_eq!(db.find_locales(LocaleFilter::All).unwrap()[0].refs.len(), 2);

        pages.remove(a["id"].as_str().unwrap()).unwrap();
        assert_eq!(db.find_locales(LocaleFilter::All).unwrap()[0].refs.len(), 1);
        pages.remove(b["id"].as_str().unwrap()).unwrap();
        assert!(db.find_locales(LocaleFilter::All).unwrap().is_empty());
    }
}

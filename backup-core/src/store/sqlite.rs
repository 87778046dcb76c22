use super::connection::{create_pool, DbPool};
use super::migrate::migrate;
use super::{AppStore, CategoryRecord, ConfigSnapshot, ProductRecord, Record, UserRecord};
use crate::models::{EntityKind, EntityRef};
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// `AppStore` over the shop's SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn open(path: &Path, pool_size: u32) -> Result<Self> {
        let pool = create_pool(path, pool_size)?;
        migrate(&pool)?;
        Ok(Self { pool })
    }
}

fn row_to_user(row: &Row) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get("id")?,
        email: row.get("email")?,
        name: row.get("name")?,
        role: row.get("role")?,
        active: row.get("active")?,
    })
}

fn row_to_category(row: &Row) -> rusqlite::Result<CategoryRecord> {
    Ok(CategoryRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        parent_id: row.get("parent_id")?,
        active: row.get("active")?,
    })
}

fn row_to_product(row: &Row) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        price: row.get("price")?,
        active: row.get("active")?,
        category_id: row.get("category_id")?,
    })
}

fn export(conn: &Connection) -> Result<ConfigSnapshot> {
    let mut stmt = conn.prepare("SELECT id, email, name, role, active FROM users ORDER BY id")?;
    let users = stmt
        .query_map([], |row| row_to_user(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt =
        conn.prepare("SELECT id, name, slug, parent_id, active FROM categories ORDER BY id")?;
    let categories = stmt
        .query_map([], |row| row_to_category(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name, slug, price, active, category_id FROM products ORDER BY id",
    )?;
    let products = stmt
        .query_map([], |row| row_to_product(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(ConfigSnapshot {
        users,
        categories,
        products,
        exported_at: Utc::now(),
    })
}

fn upsert_one(conn: &Connection, record: &Record) -> rusqlite::Result<usize> {
    match record {
        Record::User(u) => conn.execute(
            "INSERT INTO users (id, email, name, role, active) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET email = excluded.email, name = excluded.name,
               role = excluded.role, active = excluded.active, updated_at = datetime('now')",
            params![u.id, u.email, u.name, u.role, u.active],
        ),
        Record::Category(c) => conn.execute(
            "INSERT INTO categories (id, name, slug, parent_id, active) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, slug = excluded.slug,
               parent_id = excluded.parent_id, active = excluded.active,
               updated_at = datetime('now')",
            params![c.id, c.name, c.slug, c.parent_id, c.active],
        ),
        Record::Product(p) => conn.execute(
            "INSERT INTO products (id, name, slug, price, active, category_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, slug = excluded.slug,
               price = excluded.price, active = excluded.active,
               category_id = excluded.category_id, updated_at = datetime('now')",
            params![p.id, p.name, p.slug, p.price, p.active, p.category_id],
        ),
    }
}

fn find_one(conn: &Connection, entity: EntityRef) -> rusqlite::Result<Option<Record>> {
    match entity.kind {
        EntityKind::User => conn
            .query_row(
                "SELECT id, email, name, role, active FROM users WHERE id = ?",
                params![entity.id],
                |row| row_to_user(row),
            )
            .optional()
            .map(|r| r.map(Record::User)),
        EntityKind::Category => conn
            .query_row(
                "SELECT id, name, slug, parent_id, active FROM categories WHERE id = ?",
                params![entity.id],
                |row| row_to_category(row),
            )
            .optional()
            .map(|r| r.map(Record::Category)),
        EntityKind::Product => conn
            .query_row(
                "SELECT id, name, slug, price, active, category_id FROM products WHERE id = ?",
                params![entity.id],
                |row| row_to_product(row),
            )
            .optional()
            .map(|r| r.map(Record::Product)),
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "users",
        EntityKind::Category => "categories",
        EntityKind::Product => "products",
    }
}

#[async_trait]
impl AppStore for SqliteStore {
    async fn export_config(&self) -> Result<ConfigSnapshot> {
        let db = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            export(&conn)
        })
        .await?
    }

    async fn upsert(&self, records: Vec<Record>) -> Result<usize> {
        let db = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut conn = db.get()?;
            let tx = conn.transaction()?;
            // Category parents may appear after their children
            tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
            let mut count = 0;
            for record in &records {
                count += upsert_one(&tx, record)?;
            }
            tx.commit()?;
            Ok(count)
        })
        .await?
    }

    async fn find(&self, entity: EntityRef) -> Result<Option<Record>> {
        let db = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Record>> {
            let conn = db.get()?;
            Ok(find_one(&conn, entity)?)
        })
        .await?
    }

    async fn delete(&self, entity: EntityRef) -> Result<bool> {
        let db = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get()?;
            let sql = format!("DELETE FROM {} WHERE id = ?", table_for(entity.kind));
            Ok(conn.execute(&sql, params![entity.id])? > 0)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn product(id: i64, name: &str, price: f64) -> Record {
        Record::Product(ProductRecord {
            id,
            name: name.into(),
            slug: format!("{}-{}", name.to_lowercase(), id),
            price,
            active: true,
            category_id: None,
        })
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("shop.db"), 2).unwrap();

        store.upsert(vec![product(42, "Original", 10.0)]).await.unwrap();
        store.upsert(vec![product(42, "Renamed", 11.5)]).await.unwrap();

        match store.find(EntityRef::product(42)).await.unwrap() {
            Some(Record::Product(p)) => {
                assert_eq!(p.name, "Renamed");
                assert_eq!(p.price, 11.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upsert_never_deletes() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("shop.db"), 2).unwrap();
        store
            .upsert(vec![product(1, "A", 1.0), product(2, "B", 2.0)])
            .await
            .unwrap();

        store.upsert(vec![product(1, "A2", 1.0)]).await.unwrap();
        assert!(store.find(EntityRef::product(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_child_category_before_parent() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("shop.db"), 2).unwrap();
        let child = Record::Category(CategoryRecord {
            id: 2,
            name: "Child".into(),
            slug: "child".into(),
            parent_id: Some(5),
            active: true,
        });
        let parent = Record::Category(CategoryRecord {
            id: 5,
            name: "Parent".into(),
            slug: "parent".into(),
            parent_id: None,
            active: true,
        });
        assert_eq!(store.upsert(vec![child, parent]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_export_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("shop.db"), 2).unwrap();
        store
            .upsert(vec![
                Record::User(UserRecord {
                    id: 9,
                    email: "ops@shop.test".into(),
                    name: "Ops".into(),
                    role: "ADMIN".into(),
                    active: true,
                }),
                product(7, "Other", 3.0),
            ])
            .await
            .unwrap();

        let snap = store.export_config().await.unwrap();
        assert_eq!(snap.users.len(), 1);
        assert_eq!(snap.products.len(), 1);

        assert!(store.delete(EntityRef::product(7)).await.unwrap());
        assert!(!store.delete(EntityRef::product(7)).await.unwrap());
        assert!(store.export_config().await.unwrap().products.is_empty());
    }
}

//! Application store port.
//!
//! The backup engines only need a curated slice of application state:
//! accounts, categories and minimal product records. Restores upsert by
//! primary key and never delete.

pub mod connection;
pub mod migrate;
pub mod sqlite;

use crate::models::{EntityKind, EntityRef};
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub price: f64,
    pub active: bool,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    User(UserRecord),
    Category(CategoryRecord),
    Product(ProductRecord),
}

impl Record {
    pub fn entity(&self) -> EntityRef {
        match self {
            Record::User(u) => EntityRef::user(u.id),
            Record::Category(c) => EntityRef::category(c.id),
            Record::Product(p) => EntityRef::product(p.id),
        }
    }
}

/// Contents of the config artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub categories: Vec<CategoryRecord>,
    #[serde(default)]
    pub products: Vec<ProductRecord>,
    pub exported_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    /// Every record, parents before children
    pub fn records(&self) -> Vec<Record> {
        self.users
            .iter()
            .cloned()
            .map(Record::User)
            .chain(self.categories.iter().cloned().map(Record::Category))
            .chain(self.products.iter().cloned().map(Record::Product))
            .collect()
    }

    pub fn find(&self, entity: EntityRef) -> Option<Record> {
        match entity.kind {
            EntityKind::User => self
                .users
                .iter()
                .find(|u| u.id == entity.id)
                .cloned()
                .map(Record::User),
            EntityKind::Category => self
                .categories
                .iter()
                .find(|c| c.id == entity.id)
                .cloned()
                .map(Record::Category),
            EntityKind::Product => self
                .products
                .iter()
                .find(|p| p.id == entity.id)
                .cloned()
                .map(Record::Product),
        }
    }
}

#[async_trait]
pub trait AppStore: Send + Sync {
    /// Curated export written to the config artifact
    async fn export_config(&self) -> Result<ConfigSnapshot>;

    /// Insert or update each record by primary key, in one transaction.
    /// Rows absent from `records` are left alone.
    async fn upsert(&self, records: Vec<Record>) -> Result<usize>;

    async fn find(&self, entity: EntityRef) -> Result<Option<Record>>;

    async fn delete(&self, entity: EntityRef) -> Result<bool>;
}

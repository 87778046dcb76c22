use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestoreMode {
    Full,
    DatabaseOnly,
    FilesOnly,
    ConfigOnly,
    Granular,
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestoreMode::Full => "FULL",
            RestoreMode::DatabaseOnly => "DATABASE_ONLY",
            RestoreMode::FilesOnly => "FILES_ONLY",
            RestoreMode::ConfigOnly => "CONFIG_ONLY",
            RestoreMode::Granular => "GRANULAR",
        };
        f.write_str(s)
    }
}

impl FromStr for RestoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "FULL" => Ok(RestoreMode::Full),
            "DATABASE_ONLY" | "DATABASE" => Ok(RestoreMode::DatabaseOnly),
            "FILES_ONLY" | "FILES" => Ok(RestoreMode::FilesOnly),
            "CONFIG_ONLY" | "CONFIG" => Ok(RestoreMode::ConfigOnly),
            "GRANULAR" => Ok(RestoreMode::Granular),
            other => Err(format!("unknown restore mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Category,
    User,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Product => "product",
            EntityKind::Category => "category",
            EntityKind::User => "user",
        };
        f.write_str(s)
    }
}

/// A single record addressed by a granular restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn product(id: i64) -> Self {
        Self { kind: EntityKind::Product, id }
    }

    pub fn category(id: i64) -> Self {
        Self { kind: EntityKind::Category, id }
    }

    pub fn user(id: i64) -> Self {
        Self { kind: EntityKind::User, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Parses `product:42`
impl FromStr for EntityRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected type:id, got '{}'", s))?;
        let kind = match kind.trim().to_ascii_lowercase().as_str() {
            "product" | "products" => EntityKind::Product,
            "category" | "categories" => EntityKind::Category,
            "user" | "users" => EntityKind::User,
            other => return Err(format!("unknown entity type '{}'", other)),
        };
        let id = id
            .trim()
            .parse()
            .map_err(|_| format!("invalid entity id '{}'", id))?;
        Ok(Self { kind, id })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granular: Option<Vec<String>>,
}

/// Outcome of one restore invocation. Built once at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub mode: RestoreMode,
    pub backup_id: String,
    pub restored_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub details: RestoreDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_ref() {
        assert_eq!("product:42".parse(), Ok(EntityRef::product(42)));
        assert_eq!("users: 7".parse(), Ok(EntityRef::user(7)));
        assert!("order:1".parse::<EntityRef>().is_err());
        assert!("product".parse::<EntityRef>().is_err());
        assert!("product:abc".parse::<EntityRef>().is_err());
        assert_eq!(EntityRef::category(3).to_string(), "category:3");
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("database_only".parse(), Ok(RestoreMode::DatabaseOnly));
        assert_eq!("FILES-ONLY".parse(), Ok(RestoreMode::FilesOnly));
        assert!("partial".parse::<RestoreMode>().is_err());
    }
}

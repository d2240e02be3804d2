//! Entities — the read-only real-world objects answers are about.
//!
//! People, organizations and projects are ingested by an external pipeline.
//! The core only reads them through the [`EntityStore`] trait, either by
//! attribute filter (structured retrieval) or by id (relationship context).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::RetrievalError;

/// Stable identifier of an entity in the relationship store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of object an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
    Project,
}

/// Typed attributes used for structured filtering and ranking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityAttributes {
    /// Territory the entity covers (e.g., "Nordics", "LATAM").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Job title for people, category for organizations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Formats the entity works in (e.g., "series", "feature", "podcast").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,

    /// Genre affinities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,

    /// Seniority rank, higher is more senior. Used as a ranking tie-break.
    #[serde(default)]
    pub seniority: u8,

    /// Organization-default contact: surfaced when no attribute matches.
    #[serde(default)]
    pub default_contact: bool,

    /// Last time the record was refreshed by ingestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A directed relationship to another entity ("reports to", "produced").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub relation: String,
    pub target: EntityId,
}

/// A named real-world object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,

    /// Alternative names used for mention detection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub attributes: EntityAttributes,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl Entity {
    /// How many of the filter's constraints this entity satisfies.
    pub fn matched_constraints(&self, filter: &AttributeFilter) -> usize {
        let mut matched = 0;
        if let Some(region) = &filter.region {
            if self
                .attributes
                .region
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case(region))
            {
                matched += 1;
            }
        }
        if let Some(format) = &filter.format {
            if contains_ignore_case(&self.attributes.formats, format) {
                matched += 1;
            }
        }
        if let Some(genre) = &filter.genre {
            if contains_ignore_case(&self.attributes.genres, genre) {
                matched += 1;
            }
        }
        if filter.entities.contains(&self.id) {
            matched += 1;
        }
        matched
    }
}

fn contains_ignore_case(values: &[String], needle: &str) -> bool {
    values.iter().any(|v| v.eq_ignore_ascii_case(needle))
}

/// Attribute constraints for a structured query. Every field is optional;
/// an empty filter means "organization-default scope".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,

    /// Named entities the query asks about.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub entities: BTreeSet<EntityId>,
}

impl AttributeFilter {
    /// Number of constraints set on this filter.
    pub fn constraint_count(&self) -> usize {
        usize::from(self.region.is_some())
            + usize::from(self.format.is_some())
            + usize::from(self.genre.is_some())
            + usize::from(!self.entities.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.constraint_count() == 0
    }

    /// Whether any descriptive attribute (region, format, genre) is set.
    pub fn has_attributes(&self) -> bool {
        self.region.is_some() || self.format.is_some() || self.genre.is_some()
    }
}

/// The names an entity can be referred to by. Used to build mention lexicons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityName {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Everything needed to recognize entities and attribute values in text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityCatalog {
    pub names: Vec<EntityName>,
    pub regions: BTreeSet<String>,
    pub formats: BTreeSet<String>,
    pub genres: BTreeSet<String>,
}

/// The read-only relationship store.
///
/// Implementations: in-memory (tests, embedded catalogs); production stores
/// live behind network clients owned by the ingestion side.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// The store name (e.g., "in_memory", "graph").
    fn name(&self) -> &str;

    /// Entities satisfying at least one constraint of the filter, plus
    /// organization-default contacts.
    async fn query(&self, filter: &AttributeFilter) -> Result<Vec<Entity>, RetrievalError>;

    /// Fetch a single entity by id.
    async fn get(&self, id: &EntityId) -> Result<Option<Entity>, RetrievalError>;

    /// Names and attribute vocabularies for mention detection.
    async fn catalog(&self) -> Result<EntityCatalog, RetrievalError>;
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use surrealdb::sql::Thing;

pub mod document;
pub mod ingest_request;
pub mod job;
pub mod paragraph;

/// A record persisted in the catalog under a fixed table name.
pub trait StoredObject: Serialize + for<'de> Deserialize<'de> {
    fn table_name() -> &'static str;
    fn get_id(&self) -> &str;
}

struct FlexibleIdVisitor;

impl<'de> Visitor<'de> for FlexibleIdVisitor {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or a Thing")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value.to_string())
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        // SurrealDB hands back record ids as Things; flatten to the raw key.
        let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(thing.id.to_raw())
    }
}

/// Accept either a plain string id or a SurrealDB `Thing`.
pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(FlexibleIdVisitor)
}

pub fn serialize_datetime<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    Into::<surrealdb::sql::Datetime>::into(*date).serialize(serializer)
}

pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let dt = surrealdb::sql::Datetime::deserialize(deserializer)?;
    Ok(DateTime::<Utc>::from(dt))
}

pub fn serialize_option_datetime<S>(
    date: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match date {
        Some(dt) => serializer.serialize_some(&Into::<surrealdb::sql::Datetime>::into(*dt)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize_option_datetime<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<surrealdb::sql::Datetime>::deserialize(deserializer)?;
    Ok(value.map(DateTime::<Utc>::from))
}

/// Define a catalog record: a struct with `id`, `created_at`, `updated_at`
/// plus the listed fields, wired for SurrealDB's id and datetime shapes,
/// implementing [`StoredObject`] against the given table.
#[macro_export]
macro_rules! stored_object {
    ($name:ident, $table:expr, {$($(#[$attr:meta])* $field:ident: $ty:ty),* $(,)?}) => {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
        pub struct $name {
            #[serde(deserialize_with = "crate::storage::types::deserialize_flexible_id")]
            pub id: String,
            #[serde(
                serialize_with = "crate::storage::types::serialize_datetime",
                deserialize_with = "crate::storage::types::deserialize_datetime",
                default
            )]
            pub created_at: chrono::DateTime<chrono::Utc>,
            #[serde(
                serialize_with = "crate::storage::types::serialize_datetime",
                deserialize_with = "crate::storage::types::deserialize_datetime",
                default
            )]
            pub updated_at: chrono::DateTime<chrono::Utc>,
            $( $(#[$attr])* pub $field: $ty),*
        }

        impl $crate::storage::types::StoredObject for $name {
            fn table_name() -> &'static str {
                $table
            }

            fn get_id(&self) -> &str {
                &self.id
            }
        }
    };
}

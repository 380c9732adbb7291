//! Record types and result destinations.
//!
//! The layer never knows a record's fields. A [`Record`] is any serde type bound to a table;
//! it is converted to and from a [`Row`] (a JSON object) at the engine boundary.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::db::errors::{DbError, Result};
use crate::db::query::Condition;
use crate::db::value::{Row, is_zero_json};

/// A struct stored as one row of [`Record::TABLE`].
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     #[serde(default)]
///     id: i64,
///     email: String,
///     #[serde(default, skip_serializing_if = "Vec::is_empty")]
///     orders: Vec<Order>,
/// }
///
/// impl Record for User {
///     const TABLE: &'static str = "users";
///
///     fn associations() -> &'static [Association] {
///         const ASSOCIATIONS: &[Association] = &[Association::has_many("orders", "orders", "user_id")];
///         ASSOCIATIONS
///     }
/// }
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = "id";

    /// Associations that can be preloaded by name.
    fn associations() -> &'static [Association] {
        &[]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Many child rows whose `foreign_key` points at the parent's `references` column
    HasMany,
    /// Like `HasMany`, attached as a single object
    HasOne,
    /// The parent's `foreign_key` points at the child's `references` column
    BelongsTo,
}

/// A named relation to another table, loaded with one extra statement per preload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    pub name: &'static str,
    pub table: &'static str,
    pub kind: AssociationKind,
    pub foreign_key: &'static str,
    pub references: &'static str,
}

impl Association {
    pub const fn has_many(name: &'static str, table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            table,
            kind: AssociationKind::HasMany,
            foreign_key,
            references: "id",
        }
    }

    pub const fn has_one(name: &'static str, table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            table,
            kind: AssociationKind::HasOne,
            foreign_key,
            references: "id",
        }
    }

    pub const fn belongs_to(name: &'static str, table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            table,
            kind: AssociationKind::BelongsTo,
            foreign_key,
            references: "id",
        }
    }

    pub const fn references(mut self, column: &'static str) -> Self {
        self.references = column;
        self
    }

    /// Column read from the parent rows.
    pub(crate) fn parent_key(&self) -> &'static str {
        match self.kind {
            AssociationKind::HasMany | AssociationKind::HasOne => self.references,
            AssociationKind::BelongsTo => self.foreign_key,
        }
    }

    /// Column of the associated table matched against the parent keys.
    pub(crate) fn child_key(&self) -> &'static str {
        match self.kind {
            AssociationKind::HasMany | AssociationKind::HasOne => self.foreign_key,
            AssociationKind::BelongsTo => self.references,
        }
    }
}

/// A target that result rows can be written into.
pub trait Destination: Send {
    fn load(&mut self, rows: Vec<Row>) -> Result<()>;
}

/// Replaced by every returned row.
impl<T: DeserializeOwned + Send> Destination for Vec<T> {
    fn load(&mut self, rows: Vec<Row>) -> Result<()> {
        *self = rows.into_iter().map(from_row).collect::<Result<_>>()?;
        Ok(())
    }
}

/// Set to the first returned row, or `None`.
impl<T: DeserializeOwned + Send> Destination for Option<T> {
    fn load(&mut self, rows: Vec<Row>) -> Result<()> {
        *self = rows.into_iter().next().map(from_row).transpose()?;
        Ok(())
    }
}

pub(crate) fn to_row<T: Serialize>(record: &T) -> Result<Row> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(row) => Ok(row),
        _ => Err(DbError::Encoding("record must serialize to an object".to_string())),
    }
}

pub(crate) fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::Object(row))?)
}

/// Columns written by an insert: nulls, association fields and an unset primary key are left
/// to the database defaults.
pub(crate) fn insert_fields<T: Record>(record: &T) -> Result<Row> {
    let mut row = to_row(record)?;
    for association in T::associations() {
        row.remove(association.name);
    }
    if row.get(T::PRIMARY_KEY).is_some_and(is_zero_json) {
        row.remove(T::PRIMARY_KEY);
    }
    row.retain(|_, value| !value.is_null());
    Ok(row)
}

/// The primary key filter of a serialized record, if its key is set.
pub(crate) fn identity<T: Record>(row: &Row) -> Option<Condition> {
    let key = row.get(T::PRIMARY_KEY).filter(|v| !is_zero_json(v))?;
    let mut fields = serde_json::Map::new();
    fields.insert(T::PRIMARY_KEY.to_string(), key.clone());
    Some(Condition::Template(fields))
}

/// Overlay the columns the database returned onto `record`.
pub(crate) fn merge_into<T: Record>(record: &mut T, returned: Row) -> Result<()> {
    let mut row = to_row(record)?;
    row.extend(returned);
    *record = from_row(row)?;
    Ok(())
}

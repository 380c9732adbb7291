//! Eager loading of associations.
//!
//! Each requested association costs one extra statement, whatever the number of parent rows:
//! the parent keys are collected, the associated rows fetched in one go, then distributed back
//! onto the parents under the association's name.

use std::collections::BTreeSet;

use anyhow::anyhow;
use tracing::debug;

use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::errors::EngineError;
use crate::db::query::preload_statement;
use crate::db::record::{AssociationKind, Record};
use crate::db::value::Row;

pub(crate) async fn attach<T: Record>(
    db: &Database,
    ctx: &Context,
    rows: &mut [Row],
    names: &[String],
) -> Result<(), EngineError> {
    if rows.is_empty() {
        return Ok(());
    }

    for name in names {
        let association = T::associations()
            .iter()
            .find(|a| a.name == name.as_str())
            .ok_or_else(|| anyhow!("unknown association {name:?} on {}", T::TABLE))?;

        let parent_key = association.parent_key();
        let child_key = association.child_key();

        let mut seen = BTreeSet::new();
        let keys: Vec<serde_json::Value> = rows
            .iter()
            .filter_map(|row| row.get(parent_key))
            .filter(|key| !key.is_null() && seen.insert(key.to_string()))
            .cloned()
            .collect();

        let children = if keys.is_empty() {
            Vec::new()
        } else {
            db.fetch(ctx, &preload_statement(association.table, child_key, keys)).await?
        };
        debug!(association = association.name, children = children.len(), "Preloaded association");

        for row in rows.iter_mut() {
            let key = row.get(parent_key).filter(|k| !k.is_null()).cloned();
            let mut matching = children
                .iter()
                .filter(|child| key.is_some() && child.get(child_key) == key.as_ref())
                .cloned()
                .map(serde_json::Value::Object);

            let value = match association.kind {
                AssociationKind::HasMany => serde_json::Value::Array(matching.collect()),
                AssociationKind::HasOne | AssociationKind::BelongsTo => matching.next().unwrap_or_default(),
            };
            row.insert(association.name.to_string(), value);
        }
    }
    Ok(())
}

//! Precondition checks shared by every operation.
//!
//! These are pure functions: they inspect their inputs and either pass them through or return
//! the matching [`DbError`]. The facade calls them before building any statement, so a failed
//! check never reaches the engine.

use crate::db::context::Context;
use crate::db::errors::{DbError, Result};
use crate::db::query::{Condition, JoinConfig, UpdateSet};

pub fn validate_context(ctx: Option<&Context>) -> Result<&Context> {
    ctx.ok_or(DbError::ContextRequired)
}

pub fn validate_model(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        return Err(DbError::ModelRequired);
    }
    Ok(())
}

pub fn validate_updates(updates: &UpdateSet) -> Result<()> {
    if updates.is_empty() {
        return Err(DbError::UpdatesRequired);
    }
    Ok(())
}

/// Used where a filter is mandatory; elsewhere an empty condition simply means "no filter".
pub fn validate_condition(condition: &Condition) -> Result<()> {
    if condition.is_empty() {
        return Err(DbError::ConditionRequired);
    }
    Ok(())
}

pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(DbError::QueryRequired);
    }
    Ok(())
}

/// Base table is checked before the join list.
pub fn validate_join_config(config: &JoinConfig) -> Result<()> {
    if config.base_table.trim().is_empty() {
        return Err(DbError::BaseTableRequired);
    }
    if config.joins.is_empty() {
        return Err(DbError::JoinsRequired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::{JoinClause, JoinKind};

    #[test]
    fn missing_context_is_rejected() {
        assert_eq!(validate_context(None).unwrap_err(), DbError::ContextRequired);
        let ctx = Context::new();
        assert!(validate_context(Some(&ctx)).is_ok());
    }

    #[test]
    fn blank_inputs_are_rejected() {
        assert_eq!(validate_model(""), Err(DbError::ModelRequired));
        assert_eq!(validate_query("   \n"), Err(DbError::QueryRequired));
        assert_eq!(validate_updates(&UpdateSet::new()), Err(DbError::UpdatesRequired));
        assert_eq!(validate_condition(&Condition::raw("", vec![])), Err(DbError::ConditionRequired));
        assert!(validate_condition(&Condition::eq("email", "a@example.com")).is_ok());
    }

    #[test]
    fn join_config_checks_base_table_before_joins() {
        let empty = JoinConfig::default();
        assert_eq!(validate_join_config(&empty), Err(DbError::BaseTableRequired));

        let no_joins = JoinConfig::new("users");
        assert_eq!(validate_join_config(&no_joins), Err(DbError::JoinsRequired));

        let ok = JoinConfig::new("users").join(JoinClause::new(JoinKind::Left, "orders", "orders.user_id = users.id"));
        assert!(validate_join_config(&ok).is_ok());
    }
}

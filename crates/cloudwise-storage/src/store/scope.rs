//! Ownership scoping for the shared fact tables.
//!
//! `cost_data`, `resources`, and `recommendations` have no `user_id`
//! column; a row belongs to whoever owns the `(provider, account_id)`
//! pair it points at. Every query against those tables must be filtered
//! through [`scope_condition`] built from the caller's resolved
//! [`OwnedAccountIds`].

use cloudwise_common::types::{OwnedAccountIds, Provider};
use sea_orm::sea_query::Condition;
use sea_orm::ColumnTrait;

/// Build the ownership filter: a disjunction of
/// `(provider = p AND account_id IN owned_p)` clauses, one per provider
/// with a non-empty id list.
///
/// Providers with no owned accounts are omitted entirely rather than
/// emitted as a degenerate `IN ()` clause. When all three lists are
/// empty this returns `None` and the caller must short-circuit to an
/// empty result without touching the database — a user with no
/// connected accounts is a valid state, not an error.
///
/// The returned condition composes with caller-supplied narrowing
/// predicates (status, type, date range) by AND.
pub fn scope_condition<C>(
    provider_col: C,
    account_col: C,
    owned: &OwnedAccountIds,
) -> Option<Condition>
where
    C: ColumnTrait,
{
    if owned.is_empty() {
        return None;
    }

    let mut any = Condition::any();
    for provider in Provider::ALL {
        let ids = owned.for_provider(provider);
        if ids.is_empty() {
            continue;
        }
        any = any.add(
            Condition::all()
                .add(provider_col.eq(provider.as_str()))
                .add(account_col.is_in(ids.iter().cloned())),
        );
    }
    Some(any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::cost_datum::Column;

    fn owned(aws: &[&str], azure: &[&str], gcp: &[&str]) -> OwnedAccountIds {
        OwnedAccountIds {
            aws: aws.iter().map(|s| s.to_string()).collect(),
            azure: azure.iter().map(|s| s.to_string()).collect(),
            gcp: gcp.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn all_empty_yields_none() {
        assert!(scope_condition(Column::Provider, Column::AccountId, &owned(&[], &[], &[])).is_none());
    }

    #[test]
    fn empty_provider_clause_is_omitted() {
        let cond = scope_condition(
            Column::Provider,
            Column::AccountId,
            &owned(&["a1", "a2"], &[], &["g1"]),
        )
        .unwrap();
        let rendered = format!("{cond:?}");
        // aws and gcp clauses present, azure absent
        assert!(rendered.contains("aws"));
        assert!(rendered.contains("gcp"));
        assert!(!rendered.contains("azure"));
    }

    #[test]
    fn single_provider_scope_builds() {
        let cond =
            scope_condition(Column::Provider, Column::AccountId, &owned(&[], &["s1"], &[]));
        assert!(cond.is_some());
    }
}

//! Authorization seam.
//!
//! A [`Policy`] answers "may this actor perform this ability on this record".
//! Anonymous callers are `None`, never an error. Actions pick how they are
//! authorized through [`Authorization`].

use crate::model::{Actor, Record};
use std::fmt;
use std::sync::Arc;

pub trait Policy: Send + Sync {
    fn allows(&self, actor: Option<&Actor>, ability: &str, record: Option<&Record>) -> bool;
}

impl<F> Policy for F
where
    F: Fn(Option<&Actor>, &str, Option<&Record>) -> bool + Send + Sync,
{
    fn allows(&self, actor: Option<&Actor>, ability: &str, record: Option<&Record>) -> bool {
        self(actor, ability, record)
    }
}

type Check = dyn Fn(Option<&Actor>, Option<&Record>) -> bool + Send + Sync;

#[derive(Clone, Default)]
pub enum Authorization {
    #[default]
    Allow,
    /// Any actor, no anonymous callers.
    Authenticated,
    /// Delegates to the entity's policy under this ability name. Denied when
    /// the entity has no policy.
    Ability(String),
    Custom(Arc<Check>),
}

impl Authorization {
    pub fn ability(name: impl Into<String>) -> Self {
        Authorization::Ability(name.into())
    }

    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(Option<&Actor>, Option<&Record>) -> bool + Send + Sync + 'static,
    {
        Authorization::Custom(Arc::new(check))
    }

    pub fn check(
        &self,
        policy: Option<&dyn Policy>,
        actor: Option<&Actor>,
        record: Option<&Record>,
    ) -> bool {
        match self {
            Authorization::Allow => true,
            Authorization::Authenticated => actor.is_some(),
            Authorization::Ability(ability) => {
                policy.is_some_and(|policy| policy.allows(actor, ability, record))
            }
            Authorization::Custom(check) => check(actor, record),
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Allow => f.write_str("Allow"),
            Authorization::Authenticated => f.write_str("Authenticated"),
            Authorization::Ability(name) => write!(f, "Ability({})", name),
            Authorization::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_only(actor: Option<&Actor>, ability: &str, record: Option<&Record>) -> bool {
        match (ability, actor, record) {
            ("view", _, _) => true,
            ("update", Some(actor), Some(record)) => record.u64_attr("user_id") == Some(actor.id),
            _ => false,
        }
    }

    fn owned_by(user_id: u64) -> Record {
        let mut record = Record::new(1, serde_json::Map::new());
        record.attributes.insert("user_id".into(), user_id.into());
        record
    }

    #[test]
    fn ability_delegates_to_policy() {
        let record = owned_by(5);
        let auth = Authorization::ability("update");
        assert!(auth.check(Some(&owner_only), Some(&Actor::new(5)), Some(&record)));
        assert!(!auth.check(Some(&owner_only), Some(&Actor::new(6)), Some(&record)));
        assert!(!auth.check(Some(&owner_only), None, Some(&record)));
    }

    #[test]
    fn ability_without_policy_is_denied() {
        let auth = Authorization::ability("view");
        assert!(!auth.check(None, Some(&Actor::new(1)), None));
    }

    #[test]
    fn authenticated_rejects_anonymous() {
        assert!(!Authorization::Authenticated.check(None, None, None));
        assert!(Authorization::Authenticated.check(None, Some(&Actor::new(1)), None));
        assert!(Authorization::Allow.check(None, None, None));
    }

    #[test]
    fn custom_predicate_sees_actor_and_record() {
        let auth = Authorization::custom(|actor, _| actor.is_some_and(|a| a.has_role("admin")));
        assert!(auth.check(None, Some(&Actor::new(1).with_role("admin")), None));
        assert!(!auth.check(None, Some(&Actor::new(1)), None));
    }
}

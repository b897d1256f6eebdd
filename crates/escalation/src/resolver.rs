//! Target resolution - turns rule targets into notifiable users.
//!
//! Resolution happens when a level fires, not when the run starts, so
//! schedule lookups use the on-call user at that instant.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::model::{ContactMethod, EscalationRule, EscalationTarget, TargetType, User};
use crate::store::{ScheduleResolver, TeamStore, UserDirectory};

/// A user to notify, with the contact methods to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: String,
    pub name: String,
    pub contact_methods: Vec<ContactMethod>,
}

impl From<User> for Recipient {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            name: user.name,
            contact_methods: user.contact_methods,
        }
    }
}

/// A target that yielded no recipients, and why.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: EscalationTarget,
    pub error: ResolveError,
}

/// Outcome of resolving every target of a rule.
#[derive(Debug, Default)]
pub struct RuleResolution {
    /// Distinct recipients in target order
    pub recipients: Vec<Recipient>,
    pub failures: Vec<TargetFailure>,
}

/// Resolves escalation targets against the directory stores.
#[derive(Clone)]
pub struct TargetResolver {
    users: Arc<dyn UserDirectory>,
    teams: Arc<dyn TeamStore>,
    schedules: Arc<dyn ScheduleResolver>,
}

impl TargetResolver {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        teams: Arc<dyn TeamStore>,
        schedules: Arc<dyn ScheduleResolver>,
    ) -> Self {
        Self {
            users,
            teams,
            schedules,
        }
    }

    /// Resolve one target to the users it designates at `at`.
    ///
    /// Team members that no longer exist are skipped; an empty team
    /// resolves to no recipients.
    pub async fn resolve(
        &self,
        target: &EscalationTarget,
        at: DateTime<Utc>,
    ) -> Result<Vec<Recipient>, ResolveError> {
        match target.kind() {
            Some(TargetType::User) => Ok(vec![self.user(&target.target_id).await?]),
            Some(TargetType::Team) => self.team(&target.target_id).await,
            Some(TargetType::Schedule) => {
                let user_id = self
                    .schedules
                    .on_call_user(&target.target_id, at)
                    .await?
                    .ok_or_else(|| ResolveError::NoOnCall(target.target_id.clone()))?;
                debug!(
                    schedule_id = %target.target_id,
                    user_id = %user_id,
                    "Resolved on-call user"
                );
                Ok(vec![self.user(&user_id).await?])
            }
            None => Err(ResolveError::UnknownTargetType(target.target_type.clone())),
        }
    }

    /// Resolve every target of a rule concurrently.
    ///
    /// A failing target never blocks the others. A user reached through
    /// several targets is listed once, at its first position.
    pub async fn resolve_rule(&self, rule: &EscalationRule, at: DateTime<Utc>) -> RuleResolution {
        let results = join_all(rule.targets.iter().map(|t| self.resolve(t, at))).await;

        let mut resolution = RuleResolution::default();
        let mut seen = HashSet::new();
        for (target, result) in rule.targets.iter().zip(results) {
            match result {
                Ok(recipients) => resolution.recipients.extend(
                    recipients
                        .into_iter()
                        .filter(|r| seen.insert(r.user_id.clone())),
                ),
                Err(error) => resolution.failures.push(TargetFailure {
                    target: target.clone(),
                    error,
                }),
            }
        }
        resolution
    }

    async fn user(&self, user_id: &str) -> Result<Recipient, ResolveError> {
        self.users
            .get_user(user_id)
            .await?
            .map(Recipient::from)
            .ok_or_else(|| ResolveError::UserNotFound(user_id.to_string()))
    }

    async fn team(&self, team_id: &str) -> Result<Vec<Recipient>, ResolveError> {
        let members = self
            .teams
            .team_members(team_id)
            .await?
            .ok_or_else(|| ResolveError::TeamNotFound(team_id.to_string()))?;

        let lookups = join_all(members.iter().map(|id| self.user(id))).await;
        let mut recipients = Vec::with_capacity(members.len());
        for (member, lookup) in members.iter().zip(lookups) {
            match lookup {
                Ok(recipient) => recipients.push(recipient),
                Err(ResolveError::UserNotFound(_)) => {
                    warn!(team_id = %team_id, user_id = %member, "Team member no longer exists, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(recipients)
    }
}

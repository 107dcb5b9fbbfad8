use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use super::command::SnippetCommand;
use crate::types::{Decision, Destination, SnippetProposal};

/// Result of applying a command to the live store.
///
/// Terminal variants carry the removed record by value; only the caller that receives it
/// may notify about it.
#[derive(Debug, Clone)]
pub enum Transition {
    NotFound,
    Expired(SnippetProposal),
    Confirmed(SnippetProposal),
    Canceled(SnippetProposal),
    /// Still pending, carries a snapshot with the new deadline.
    Extended(SnippetProposal),
}

/// Live set of pending proposals.
///
/// Only `Pending` records live here. Every check-then-mutate sequence runs under one lock,
/// and a terminal transition removes the record in the same critical section, so two actors
/// can never both commit a terminal decision for the same id. Nothing awaits while the lock
/// is held.
#[derive(Debug, Default)]
pub struct SnippetStore {
    records: Mutex<HashMap<Uuid, SnippetProposal>>,
}

impl SnippetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SnippetProposal>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a pending record unless its destination already has one.
    /// On conflict returns the id of the record already pending there.
    pub fn admit(&self, proposal: SnippetProposal) -> Result<Uuid, Uuid> {
        let mut records = self.lock();
        if let Some(existing) = latest_for(&records, &proposal.destination) {
            return Err(existing);
        }
        let id = proposal.id;
        records.insert(id, proposal);
        Ok(id)
    }

    pub fn has_pending(&self, destination: &Destination) -> bool {
        self.lock().values().any(|p| &p.destination == destination)
    }

    /// Most recently created pending record for `destination`.
    pub fn pending_for(&self, destination: &Destination) -> Option<SnippetProposal> {
        let records = self.lock();
        latest_for(&records, destination).and_then(|id| records.get(&id).cloned())
    }

    pub fn get(&self, id: Uuid) -> Option<SnippetProposal> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply `command` to the latest pending record for `destination` as of `now`.
    ///
    /// Expiry wins over every command: a record strictly past its deadline becomes
    /// `Expired` no matter which keyword arrived.
    pub fn resolve(
        &self,
        destination: &Destination,
        now: DateTime<Utc>,
        command: SnippetCommand,
        extension: TimeDelta,
    ) -> Transition {
        let mut records = self.lock();
        let Some(id) = latest_for(&records, destination) else {
            return Transition::NotFound;
        };
        let expired = records.get(&id).is_some_and(|p| p.is_expired(now));

        if expired {
            return match records.remove(&id) {
                Some(p) => Transition::Expired(terminal(p, Decision::Expired)),
                None => Transition::NotFound,
            };
        }

        match command {
            SnippetCommand::Extend => match records.get_mut(&id) {
                Some(record) => {
                    record.expires_at = record
                        .expires_at
                        .checked_add_signed(extension)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    Transition::Extended(record.clone())
                }
                None => Transition::NotFound,
            },
            SnippetCommand::Confirm => match records.remove(&id) {
                Some(p) => Transition::Confirmed(terminal(p, Decision::Confirmed)),
                None => Transition::NotFound,
            },
            SnippetCommand::Cancel => match records.remove(&id) {
                Some(p) => Transition::Canceled(terminal(p, Decision::Canceled)),
                None => Transition::NotFound,
            },
        }
    }

    /// Mark every record older than `warn_after` that has not been alerted yet.
    /// Returns snapshots of exactly the records flagged by this call.
    pub fn flag_unattended(&self, now: DateTime<Utc>, warn_after: TimeDelta) -> Vec<SnippetProposal> {
        let mut records = self.lock();
        let mut flagged: Vec<SnippetProposal> = records
            .values_mut()
            .filter(|p| !p.alerted && p.age(now) > warn_after)
            .map(|p| {
                p.alerted = true;
                p.clone()
            })
            .collect();
        flagged.sort_by_key(|p| (p.created_at, p.id));
        flagged
    }

    /// Oldest record whose age exceeds `hard_timeout`, if any.
    pub fn overdue(&self, now: DateTime<Utc>, hard_timeout: TimeDelta) -> Option<SnippetProposal> {
        self.lock()
            .values()
            .filter(|p| p.age(now) > hard_timeout)
            .min_by_key(|p| (p.created_at, p.id))
            .cloned()
    }

    /// Remove every record strictly past its deadline and return them marked `Expired`.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> Vec<SnippetProposal> {
        let mut records = self.lock();
        let expired: Vec<Uuid> = records
            .values()
            .filter(|p| p.is_expired(now))
            .map(|p| p.id)
            .collect();
        let mut reaped: Vec<SnippetProposal> = expired
            .into_iter()
            .filter_map(|id| records.remove(&id))
            .map(|p| terminal(p, Decision::Expired))
            .collect();
        reaped.sort_by_key(|p| (p.created_at, p.id));
        reaped
    }
}

/// Latest `created_at` wins; ties broken by id so the choice is deterministic.
fn latest_for(records: &HashMap<Uuid, SnippetProposal>, destination: &Destination) -> Option<Uuid> {
    records
        .values()
        .filter(|p| &p.destination == destination)
        .max_by_key(|p| (p.created_at, p.id))
        .map(|p| p.id)
}

fn terminal(mut proposal: SnippetProposal, decision: Decision) -> SnippetProposal {
    proposal.decision = decision;
    proposal
}

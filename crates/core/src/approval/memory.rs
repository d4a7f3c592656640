//! In-memory [`ApprovalStore`] for tests and embedding hosts.

use std::collections::HashMap;

use tokio::sync::RwLock;

use checkpoint_shared::types::{GroupId, RequestId, RuleId, UserId};

use crate::approval::request::{Request, RequestLog, TransitionCommit};
use crate::approval::rule::{Rule, Step};
use crate::approval::store::{ApprovalStore, RequestFilter, RuleFilter, StoreError};

#[derive(Debug, Default)]
struct Inner {
    rules: HashMap<RuleId, Rule>,
    requests: HashMap<RequestId, Request>,
    logs: Vec<RequestLog>,
    groups: HashMap<GroupId, Vec<UserId>>,
}

impl Inner {
    fn pending_for(&self, candidate: &Request) -> Option<RequestId> {
        self.requests
            .values()
            .find(|r| {
                r.is_pending()
                    && r.rule_id == candidate.rule_id
                    && r.record_type == candidate.record_type
                    && r.record_id == candidate.record_id
            })
            .map(|r| r.id)
    }
}

/// Store keeping everything behind one lock.
///
/// Every write happens under the write lock, so the pending-uniqueness check
/// and the insert cannot interleave with another writer.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the members of an approver group.
    pub async fn set_group_members(&self, group_id: GroupId, members: Vec<UserId>) {
        self.inner.write().await.groups.insert(group_id, members);
    }
}

fn newest_first(requests: &mut [Request]) {
    requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
}

impl ApprovalStore for InMemoryStore {
    async fn insert_rule(&self, mut rule: Rule) -> Result<(), StoreError> {
        rule.sort_steps();
        self.inner.write().await.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn insert_step(&self, step: Step) -> Result<Rule, StoreError> {
        let mut inner = self.inner.write().await;
        let rule = inner
            .rules
            .get_mut(&step.rule_id)
            .ok_or(StoreError::RuleNotFound(step.rule_id))?;
        rule.steps.push(step);
        rule.sort_steps();
        Ok(rule.clone())
    }

    async fn set_rule_active(&self, rule_id: RuleId, active: bool) -> Result<Rule, StoreError> {
        let mut inner = self.inner.write().await;
        let rule = inner
            .rules
            .get_mut(&rule_id)
            .ok_or(StoreError::RuleNotFound(rule_id))?;
        rule.active = active;
        Ok(rule.clone())
    }

    async fn delete_rule(&self, rule_id: RuleId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.rules.contains_key(&rule_id) {
            return Err(StoreError::RuleNotFound(rule_id));
        }
        if inner.requests.values().any(|r| r.rule_id == rule_id) {
            return Err(StoreError::RuleInUse(rule_id));
        }
        inner.rules.remove(&rule_id);
        Ok(())
    }

    async fn find_rule(&self, rule_id: RuleId) -> Result<Option<Rule>, StoreError> {
        Ok(self.inner.read().await.rules.get(&rule_id).cloned())
    }

    async fn find_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError> {
        let inner = self.inner.read().await;
        let mut rules: Vec<Rule> = inner
            .rules
            .values()
            .filter(|rule| filter.matches(rule))
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.id);
        Ok(rules)
    }

    async fn insert_requests(&self, requests: Vec<Request>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for (i, request) in requests.iter().enumerate() {
            if let Some(existing) = inner.pending_for(request) {
                return Err(StoreError::DuplicatePending(existing));
            }
            let clash = requests[..i].iter().find(|earlier| {
                earlier.rule_id == request.rule_id
                    && earlier.record_type == request.record_type
                    && earlier.record_id == request.record_id
            });
            if let Some(earlier) = clash {
                return Err(StoreError::DuplicatePending(earlier.id));
            }
        }
        for request in requests {
            inner.requests.insert(request.id, request);
        }
        Ok(())
    }

    async fn find_request(&self, request_id: RequestId) -> Result<Option<Request>, StoreError> {
        Ok(self.inner.read().await.requests.get(&request_id).cloned())
    }

    async fn find_requests(&self, filter: &RequestFilter) -> Result<Vec<Request>, StoreError> {
        let inner = self.inner.read().await;
        let mut requests: Vec<Request> = inner
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        newest_first(&mut requests);
        if let Some(limit) = filter.limit {
            requests.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(requests)
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Request, StoreError> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get_mut(&commit.request_id)
            .ok_or(StoreError::RequestNotFound(commit.request_id))?;

        let at_expected = request
            .current_step
            .as_ref()
            .is_some_and(|step| step.id == commit.expected_step);
        if !request.is_pending() || !at_expected {
            return Err(StoreError::Stale {
                request_id: request.id,
                state: request.state,
            });
        }

        request.state = commit.state;
        request.current_step = commit.current_step;
        let updated = request.clone();
        if let Some(log) = commit.log {
            inner.logs.push(log);
        }
        Ok(updated)
    }

    async fn request_logs(&self, request_id: RequestId) -> Result<Vec<RequestLog>, StoreError> {
        let inner = self.inner.read().await;
        let mut logs: Vec<RequestLog> = inner
            .logs
            .iter()
            .filter(|log| log.request_id == request_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.decided_at.cmp(&a.decided_at).then(b.id.cmp(&a.id)));
        Ok(logs)
    }

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .groups
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
}

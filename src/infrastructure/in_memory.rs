use crate::domain::payout::{
    CorrelationHandle, Creation, NewPayout, PayoutId, PayoutInstruction, Resolution,
    ResolutionEffect, ResolveKey, ResolveResult, cutoff,
};
use crate::domain::ports::{PayoutLedger, ReconciliationLog};
use crate::domain::reconciliation::ReconciliationRun;
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    payouts: HashMap<PayoutId, PayoutInstruction>,
    by_reference: HashMap<String, PayoutId>,
    by_handle: HashMap<String, PayoutId>,
}

impl LedgerState {
    fn payout_mut(&mut self, id: PayoutId) -> Result<&mut PayoutInstruction> {
        self.payouts
            .get_mut(&id)
            .ok_or_else(|| PayoutError::NotFound(id.to_string()))
    }

    fn id_for(&self, key: &ResolveKey) -> Result<PayoutId> {
        match key {
            ResolveKey::Id(id) => Ok(*id),
            ResolveKey::Handle(handle) => self
                .by_handle
                .get(handle.as_str())
                .copied()
                .ok_or_else(|| PayoutError::NotFound(key.to_string())),
        }
    }
}

/// A thread-safe in-memory payout ledger.
///
/// All indexes live behind one `RwLock`, so every transition is checked and
/// applied under a single write guard.
#[derive(Default, Clone)]
pub struct InMemoryPayoutLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryPayoutLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutLedger for InMemoryPayoutLedger {
    async fn create(&self, payout: NewPayout) -> Result<Creation> {
        let mut state = self.state.write().await;
        if let Some(id) = state.by_reference.get(&payout.reference)
            && let Some(existing) = state.payouts.get(id)
        {
            return Ok(Creation::Duplicate(existing.clone()));
        }

        let instruction = PayoutInstruction::new(payout, Utc::now());
        state
            .by_reference
            .insert(instruction.reference.clone(), instruction.id);
        state.payouts.insert(instruction.id, instruction.clone());
        Ok(Creation::New(instruction))
    }

    async fn mark_dispatched(
        &self,
        id: PayoutId,
        handle: CorrelationHandle,
        aliases: Vec<String>,
    ) -> Result<PayoutInstruction> {
        let mut state = self.state.write().await;
        let payout = state.payout_mut(id)?;
        payout.dispatch(handle, aliases, Utc::now())?;
        let payout = payout.clone();

        for identifier in payout.identifiers() {
            state.by_handle.insert(identifier.to_string(), id);
        }
        Ok(payout)
    }

    async fn record_attempt(
        &self,
        id: PayoutId,
        error: Option<String>,
    ) -> Result<PayoutInstruction> {
        let mut state = self.state.write().await;
        let payout = state.payout_mut(id)?;
        payout.record_attempt(error, Utc::now());
        Ok(payout.clone())
    }

    async fn resolve(&self, key: &ResolveKey, resolution: Resolution) -> Result<ResolveResult> {
        let mut state = self.state.write().await;
        let id = state.id_for(key)?;
        let payout = state.payout_mut(id)?;

        let result = match payout.apply_resolution(resolution)? {
            ResolutionEffect::Applied => ResolveResult {
                instruction: payout.clone(),
                applied: true,
                conflict: None,
            },
            ResolutionEffect::AlreadyTerminal { conflict } => ResolveResult {
                instruction: payout.clone(),
                applied: false,
                conflict,
            },
        };
        Ok(result)
    }

    async fn mark_stale_alerted(&self, id: PayoutId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.payout_mut(id)?.mark_stale_alerted(Utc::now()))
    }

    async fn list_unresolved(&self, older_than: Duration) -> Result<Vec<PayoutInstruction>> {
        let Some(cutoff) = cutoff(older_than, Utc::now()) else {
            return Ok(Vec::new());
        };
        let state = self.state.read().await;
        let mut unresolved: Vec<_> = state
            .payouts
            .values()
            .filter(|payout| payout.unresolved_since(cutoff))
            .cloned()
            .collect();
        unresolved.sort_by_key(|payout| payout.updated_at);
        Ok(unresolved)
    }

    async fn get(&self, id: PayoutId) -> Result<Option<PayoutInstruction>> {
        let state = self.state.read().await;
        Ok(state.payouts.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PayoutInstruction>> {
        let state = self.state.read().await;
        Ok(state
            .by_reference
            .get(reference)
            .and_then(|id| state.payouts.get(id))
            .cloned())
    }

    async fn find_by_handle(&self, identifier: &str) -> Result<Option<PayoutInstruction>> {
        let state = self.state.read().await;
        Ok(state
            .by_handle
            .get(identifier)
            .and_then(|id| state.payouts.get(id))
            .cloned())
    }
}

/// A thread-safe in-memory log of reconciliation runs.
#[derive(Default, Clone)]
pub struct InMemoryReconciliationLog {
    runs: Arc<RwLock<Vec<ReconciliationRun>>>,
}

impl InMemoryReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconciliationLog for InMemoryReconciliationLog {
    async fn record(&self, run: ReconciliationRun) -> Result<()> {
        self.runs.write().await.push(run);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ReconciliationRun>> {
        let runs = self.runs.read().await;
        Ok(runs.iter().rev().take(limit).cloned().collect())
    }
}

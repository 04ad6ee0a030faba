use crate::domain::payout::{
    CorrelationHandle, Creation, NewPayout, PayoutId, PayoutInstruction, Resolution,
    ResolutionEffect, ResolveKey, ResolveResult, cutoff,
};
use crate::domain::ports::{PayoutLedger, ReconciliationLog};
use crate::domain::reconciliation::ReconciliationRun;
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Column Family for payout instructions, keyed by id.
pub const CF_PAYOUTS: &str = "payouts";
/// Column Family mapping references to payout ids.
pub const CF_REFERENCES: &str = "references";
/// Column Family mapping correlation handles and aliases to payout ids.
pub const CF_HANDLES: &str = "handles";
/// Column Family for reconciliation runs, keyed by start time.
pub const CF_RUNS: &str = "runs";

/// A persistent ledger implementation using RocksDB.
///
/// Writers serialize on `write_lock`, so each compare-and-set reads and writes
/// the instruction without interleaving. Index updates go in the same
/// `WriteBatch` as the instruction they point to.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the payout, index and run column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PAYOUTS, CF_REFERENCES, CF_HANDLES, CF_RUNS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PayoutError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn load(&self, id: PayoutId) -> Result<Option<PayoutInstruction>> {
        let cf = self.cf(CF_PAYOUTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_existing(&self, id: PayoutId) -> Result<PayoutInstruction> {
        self.load(id)?
            .ok_or_else(|| PayoutError::NotFound(id.to_string()))
    }

    fn id_in(&self, cf_name: &str, key: &str) -> Result<Option<PayoutId>> {
        let cf = self.cf(cf_name)?;
        let Some(bytes) = self.db.get_pinned_cf(cf, key.as_bytes())? else {
            return Ok(None);
        };
        let bytes: [u8; 16] = bytes.as_ref().try_into().map_err(|_| {
            PayoutError::InternalError(Box::new(std::io::Error::other(format!(
                "Corrupt payout id in {cf_name} for {key}"
            ))))
        })?;
        Ok(Some(PayoutId::from_bytes(bytes)))
    }

    fn put_payout(&self, batch: &mut WriteBatch, payout: &PayoutInstruction) -> Result<()> {
        let cf = self.cf(CF_PAYOUTS)?;
        batch.put_cf(cf, payout.id.as_bytes(), serde_json::to_vec(payout)?);
        Ok(())
    }

    fn save(&self, payout: &PayoutInstruction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put_payout(&mut batch, payout)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl PayoutLedger for RocksDbStore {
    async fn create(&self, payout: NewPayout) -> Result<Creation> {
        let _guard = self.write_lock.lock().await;
        if let Some(id) = self.id_in(CF_REFERENCES, &payout.reference)? {
            return Ok(Creation::Duplicate(self.load_existing(id)?));
        }

        let instruction = PayoutInstruction::new(payout, Utc::now());
        let mut batch = WriteBatch::default();
        self.put_payout(&mut batch, &instruction)?;
        batch.put_cf(
            self.cf(CF_REFERENCES)?,
            instruction.reference.as_bytes(),
            instruction.id.as_bytes(),
        );
        self.db.write(batch)?;
        Ok(Creation::New(instruction))
    }

    async fn mark_dispatched(
        &self,
        id: PayoutId,
        handle: CorrelationHandle,
        aliases: Vec<String>,
    ) -> Result<PayoutInstruction> {
        let _guard = self.write_lock.lock().await;
        let mut payout = self.load_existing(id)?;
        payout.dispatch(handle, aliases, Utc::now())?;

        let mut batch = WriteBatch::default();
        self.put_payout(&mut batch, &payout)?;
        let handles = self.cf(CF_HANDLES)?;
        for identifier in payout.identifiers() {
            batch.put_cf(handles, identifier.as_bytes(), id.as_bytes());
        }
        self.db.write(batch)?;
        Ok(payout)
    }

    async fn record_attempt(
        &self,
        id: PayoutId,
        error: Option<String>,
    ) -> Result<PayoutInstruction> {
        let _guard = self.write_lock.lock().await;
        let mut payout = self.load_existing(id)?;
        payout.record_attempt(error, Utc::now());
        self.save(&payout)?;
        Ok(payout)
    }

    async fn resolve(&self, key: &ResolveKey, resolution: Resolution) -> Result<ResolveResult> {
        let _guard = self.write_lock.lock().await;
        let id = match key {
            ResolveKey::Id(id) => *id,
            ResolveKey::Handle(handle) => self
                .id_in(CF_HANDLES, handle.as_str())?
                .ok_or_else(|| PayoutError::NotFound(key.to_string()))?,
        };
        let mut payout = self.load_existing(id)?;

        match payout.apply_resolution(resolution)? {
            ResolutionEffect::Applied => {
                self.save(&payout)?;
                Ok(ResolveResult {
                    instruction: payout,
                    applied: true,
                    conflict: None,
                })
            }
            ResolutionEffect::AlreadyTerminal { conflict } => {
                if conflict.is_some() {
                    self.save(&payout)?;
                }
                Ok(ResolveResult {
                    instruction: payout,
                    applied: false,
                    conflict,
                })
            }
        }
    }

    async fn mark_stale_alerted(&self, id: PayoutId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut payout = self.load_existing(id)?;
        if !payout.mark_stale_alerted(Utc::now()) {
            return Ok(false);
        }
        self.save(&payout)?;
        Ok(true)
    }

    async fn list_unresolved(&self, older_than: Duration) -> Result<Vec<PayoutInstruction>> {
        let Some(cutoff) = cutoff(older_than, Utc::now()) else {
            return Ok(Vec::new());
        };
        let cf = self.cf(CF_PAYOUTS)?;

        let mut unresolved = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let payout: PayoutInstruction = serde_json::from_slice(&value)?;
            if payout.unresolved_since(cutoff) {
                unresolved.push(payout);
            }
        }
        unresolved.sort_by_key(|payout| payout.updated_at);
        Ok(unresolved)
    }

    async fn get(&self, id: PayoutId) -> Result<Option<PayoutInstruction>> {
        self.load(id)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<PayoutInstruction>> {
        match self.id_in(CF_REFERENCES, reference)? {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }

    async fn find_by_handle(&self, identifier: &str) -> Result<Option<PayoutInstruction>> {
        match self.id_in(CF_HANDLES, identifier)? {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ReconciliationLog for RocksDbStore {
    async fn record(&self, run: ReconciliationRun) -> Result<()> {
        let cf = self.cf(CF_RUNS)?;
        // Big-endian start time first, so iteration order is chronological.
        let mut key = run.started_at.timestamp_millis().to_be_bytes().to_vec();
        key.extend_from_slice(run.id.as_bytes());
        self.db.put_cf(cf, key, serde_json::to_vec(&run)?)?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ReconciliationRun>> {
        let cf = self.cf(CF_RUNS)?;
        let mut runs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_key, value) = item?;
            runs.push(serde_json::from_slice(&value)?);
        }
        Ok(runs)
    }
}

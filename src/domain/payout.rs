use crate::domain::reconciliation::ResolutionConflict;
use crate::error::{PayoutError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

const MAX_REFERENCE_LEN: usize = 64;

/// Ledger-assigned identifier of a payout instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutId(Uuid);

impl PayoutId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for PayoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Represents a positive monetary amount for a payout.
///
/// The currency is a deployment-level setting; the ledger only guarantees the
/// amount is strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PayoutError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PayoutError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Provider-assigned identifier returned at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationHandle(String);

impl CorrelationHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payment-rail-specific address of the beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Destination {
    MobileMoney {
        phone: String,
    },
    BankAccount {
        account_number: String,
        bank_code: String,
    },
}

impl Destination {
    pub fn validate(&self) -> Result<()> {
        match self {
            Destination::MobileMoney { phone } => {
                let digits = phone.strip_prefix('+').unwrap_or(phone);
                if !(9..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(PayoutError::ValidationError(format!(
                        "Invalid mobile money number: {phone:?}"
                    )));
                }
            }
            Destination::BankAccount {
                account_number,
                bank_code,
            } => {
                if !(5..=34).contains(&account_number.len())
                    || !account_number.bytes().all(|b| b.is_ascii_alphanumeric())
                {
                    return Err(PayoutError::ValidationError(format!(
                        "Invalid bank account number: {account_number:?}"
                    )));
                }
                if !(2..=11).contains(&bank_code.len())
                    || !bank_code.bytes().all(|b| b.is_ascii_alphanumeric())
                {
                    return Err(PayoutError::ValidationError(format!(
                        "Invalid bank code: {bank_code:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutState {
    Created,
    Dispatched,
    Success,
    Failed,
}

impl PayoutState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PayoutState::Success | PayoutState::Failed)
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayoutState::Created => "CREATED",
            PayoutState::Dispatched => "DISPATCHED",
            PayoutState::Success => "SUCCESS",
            PayoutState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Final outcome of a payout as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failed,
}

impl From<Outcome> for PayoutState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => PayoutState::Success,
            Outcome::Failed => PayoutState::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        PayoutState::from(*self).fmt(f)
    }
}

/// Which path delivered a resolution to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Callback,
    Sweep,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionSource::Callback => f.write_str("callback"),
            ResolutionSource::Sweep => f.write_str("sweep"),
        }
    }
}

/// The "why" of a terminal transition, kept on the instruction for audits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Provider result or reason code.
    pub reason_code: String,
    /// Human-readable result description, when the provider supplies one.
    #[serde(default)]
    pub description: Option<String>,
    /// Provider transaction reference, when the provider supplies one.
    pub provider_reference: Option<String>,
    pub source: ResolutionSource,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    pub fn new(
        outcome: Outcome,
        reason_code: impl Into<String>,
        provider_reference: Option<String>,
        source: ResolutionSource,
    ) -> Self {
        Self {
            outcome,
            reason_code: reason_code.into(),
            description: None,
            provider_reference,
            source,
            resolved_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// A validated request to create a payout instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayout {
    pub reference: String,
    pub beneficiary_id: String,
    pub amount: Amount,
    pub destination: Destination,
}

impl NewPayout {
    pub fn new(
        reference: &str,
        beneficiary_id: &str,
        amount: Decimal,
        destination: Destination,
    ) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() || reference.len() > MAX_REFERENCE_LEN {
            return Err(PayoutError::ValidationError(format!(
                "Reference must be 1 to {MAX_REFERENCE_LEN} characters"
            )));
        }
        let beneficiary_id = beneficiary_id.trim();
        if beneficiary_id.is_empty() {
            return Err(PayoutError::ValidationError(
                "Beneficiary id is required".to_string(),
            ));
        }
        destination.validate()?;

        Ok(Self {
            reference: reference.to_string(),
            beneficiary_id: beneficiary_id.to_string(),
            amount: Amount::new(amount)?,
            destination,
        })
    }
}

/// Effect of applying a resolution to an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionEffect {
    Applied,
    AlreadyTerminal { conflict: Option<ResolutionConflict> },
}

/// One intended money movement and its lifecycle.
///
/// State only moves forward: `CREATED -> DISPATCHED -> SUCCESS | FAILED`.
/// Instructions are never deleted; a terminal instruction is the permanent
/// audit record of the transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub id: PayoutId,
    pub reference: String,
    pub beneficiary_id: String,
    pub amount: Amount,
    pub destination: Destination,
    pub correlation_handle: Option<CorrelationHandle>,
    /// Other identifiers the provider may use for this transfer in callbacks.
    #[serde(default)]
    pub handle_aliases: Vec<String>,
    pub state: PayoutState,
    pub resolution: Option<Resolution>,
    pub last_resolved_at: Option<DateTime<Utc>>,
    /// Later resolutions that disagreed with the recorded outcome, kept for audit.
    #[serde(default)]
    pub conflicts: Vec<ResolutionConflict>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub stale_alerted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutInstruction {
    pub fn new(payout: NewPayout, now: DateTime<Utc>) -> Self {
        Self {
            id: PayoutId::new(),
            reference: payout.reference,
            beneficiary_id: payout.beneficiary_id,
            amount: payout.amount,
            destination: payout.destination,
            correlation_handle: None,
            handle_aliases: Vec::new(),
            state: PayoutState::Created,
            resolution: None,
            last_resolved_at: None,
            conflicts: Vec::new(),
            attempt_count: 0,
            last_error: None,
            dispatched_at: None,
            stale_alerted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether a creation request carries the same money movement as this instruction.
    pub fn same_details(&self, payout: &NewPayout) -> bool {
        self.beneficiary_id == payout.beneficiary_id
            && self.amount == payout.amount
            && self.destination == payout.destination
    }

    /// Records the provider handle. Only valid from `CREATED`.
    pub fn dispatch(
        &mut self,
        handle: CorrelationHandle,
        aliases: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != PayoutState::Created || self.correlation_handle.is_some() {
            return Err(PayoutError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: PayoutState::Dispatched,
            });
        }

        self.handle_aliases = aliases
            .into_iter()
            .filter(|alias| !alias.is_empty() && alias != handle.as_str())
            .collect();
        self.correlation_handle = Some(handle);
        self.state = PayoutState::Dispatched;
        self.last_error = None;
        self.dispatched_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn record_attempt(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_error = error;
        self.updated_at = now;
    }

    /// Moves a dispatched instruction to its terminal state.
    ///
    /// The outcome of a terminal instruction never changes. A resolution
    /// disagreeing with it is appended to `conflicts` and reported.
    pub fn apply_resolution(&mut self, resolution: Resolution) -> Result<ResolutionEffect> {
        match self.state {
            PayoutState::Success | PayoutState::Failed => {
                let recorded = match self.state {
                    PayoutState::Success => Outcome::Success,
                    _ => Outcome::Failed,
                };
                let conflict = (recorded != resolution.outcome).then(|| ResolutionConflict {
                    payout_id: self.id,
                    reference: self.reference.clone(),
                    recorded,
                    reported: resolution.outcome,
                    source: resolution.source,
                    detected_at: resolution.resolved_at,
                });
                if let Some(conflict) = &conflict {
                    self.conflicts.push(conflict.clone());
                }
                Ok(ResolutionEffect::AlreadyTerminal { conflict })
            }
            PayoutState::Dispatched => {
                self.state = resolution.outcome.into();
                self.last_resolved_at = Some(resolution.resolved_at);
                self.updated_at = resolution.resolved_at;
                self.resolution = Some(resolution);
                Ok(ResolutionEffect::Applied)
            }
            PayoutState::Created => Err(PayoutError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: resolution.outcome.into(),
            }),
        }
    }

    /// Sets the stale-alert marker. Returns `false` if it was already set.
    pub fn mark_stale_alerted(&mut self, now: DateTime<Utc>) -> bool {
        if self.stale_alerted_at.is_some() {
            return false;
        }
        self.stale_alerted_at = Some(now);
        true
    }

    /// The handle followed by every alias.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.correlation_handle
            .iter()
            .map(CorrelationHandle::as_str)
            .chain(self.handle_aliases.iter().map(String::as_str))
    }

    pub fn answers_to(&self, identifier: &str) -> bool {
        self.identifiers().any(|id| id == identifier)
    }

    /// Dispatched and not updated since `cutoff`.
    pub fn unresolved_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == PayoutState::Dispatched && self.updated_at <= cutoff
    }

    /// Dispatched for at least `ceiling`.
    pub fn is_stale(&self, ceiling: Duration, now: DateTime<Utc>) -> bool {
        if self.state != PayoutState::Dispatched {
            return false;
        }
        match (self.dispatched_at, cutoff(ceiling, now)) {
            (Some(dispatched_at), Some(cutoff)) => dispatched_at <= cutoff,
            _ => false,
        }
    }
}

/// `now - age`, or `None` when the age reaches before the representable range.
pub fn cutoff(age: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
}

/// How a resolution addresses its instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveKey {
    Id(PayoutId),
    Handle(CorrelationHandle),
}

impl fmt::Display for ResolveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveKey::Id(id) => write!(f, "id {id}"),
            ResolveKey::Handle(handle) => write!(f, "handle {handle}"),
        }
    }
}

/// Result of `PayoutLedger::resolve`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveResult {
    pub instruction: PayoutInstruction,
    /// `false` when the instruction was already terminal.
    pub applied: bool,
    pub conflict: Option<ResolutionConflict>,
}

/// Result of `PayoutLedger::create`.
#[derive(Debug, Clone, PartialEq)]
pub enum Creation {
    New(PayoutInstruction),
    /// The reference already existed; the stored instruction is returned.
    Duplicate(PayoutInstruction),
}

impl Creation {
    pub fn instruction(&self) -> &PayoutInstruction {
        match self {
            Creation::New(instruction) | Creation::Duplicate(instruction) => instruction,
        }
    }

    pub fn into_instruction(self) -> PayoutInstruction {
        match self {
            Creation::New(instruction) | Creation::Duplicate(instruction) => instruction,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Creation::Duplicate(_))
    }
}

//! Persisted event schemas (bit-exact wire format for the journal).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{AccountId, Amount, Delta, TransactionId};

/// The staged operation recorded alongside a `TransactionStarted`/`Cleared`/
/// `Reversed` event — deposit and withdrawal carry their own variant so the
/// amount's sign is never ambiguous on replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StagedOp {
    /// Funds were deposited.
    FundsDeposited {
        /// Account the funds were deposited into.
        account_id: AccountId,
        /// Amount deposited.
        #[serde(with = "rust_decimal::serde::str")]
        amount: Amount,
    },
    /// Funds were withdrawn.
    FundsWithdrawn {
        /// Account the funds were withdrawn from.
        account_id: AccountId,
        /// Amount withdrawn.
        #[serde(with = "rust_decimal::serde::str")]
        amount: Amount,
    },
}

impl StagedOp {
    /// Build a `StagedOp` from a `Delta` staged against `account_id`.
    #[must_use]
    pub fn from_delta(account_id: AccountId, delta: Delta) -> Self {
        match delta {
            Delta::Deposit { amount } => Self::FundsDeposited { account_id, amount },
            Delta::Withdraw { amount } => Self::FundsWithdrawn { account_id, amount },
        }
    }

    /// The signed effect on a pending/committed balance.
    #[must_use]
    pub fn signed(&self) -> Amount {
        match self {
            Self::FundsDeposited { amount, .. } => *amount,
            Self::FundsWithdrawn { amount, .. } => -*amount,
        }
    }
}

/// Why a `StartTransaction` was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Withdrawal would leave `balance + pendingBalance < 0`.
    InsufficientFunds,
    /// The account has not been created yet.
    Uninitialized,
    /// The stash was full when the command arrived.
    Busy,
    /// The staged amount was not strictly positive.
    InvalidAmount,
}

/// Events persisted to a bank account's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccountEvent {
    /// The account was created.
    BankAccountCreated {
        /// Owning customer's identifier.
        customer_number: String,
        /// This account's identifier.
        account_number: AccountId,
    },
    /// A transaction staged a delta against the account.
    TransactionStarted {
        /// The saga transaction this belongs to.
        tx_id: TransactionId,
        /// The staged operation.
        inner: StagedOp,
    },
    /// A transaction's delta was durably applied to the balance.
    TransactionCleared {
        /// The saga transaction this belongs to.
        tx_id: TransactionId,
        /// The operation that was applied.
        inner: StagedOp,
    },
    /// A transaction's staged delta was discarded.
    TransactionReversed {
        /// The saga transaction this belongs to.
        tx_id: TransactionId,
        /// The operation that was reversed.
        inner: StagedOp,
    },
}

impl AccountEvent {
    /// The transaction id this event is about, if any.
    #[must_use]
    pub fn tx_id(&self) -> Option<&TransactionId> {
        match self {
            Self::BankAccountCreated { .. } => None,
            Self::TransactionStarted { tx_id, .. }
            | Self::TransactionCleared { tx_id, .. }
            | Self::TransactionReversed { tx_id, .. } => Some(tx_id),
        }
    }
}

/// The final outcome of a saga.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaOutcome {
    /// Every participant cleared its staged delta.
    Committed,
    /// Every participant reversed its staged delta (or never staged one).
    RolledBack,
}

/// Events persisted to a saga's event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SagaEvent {
    /// The saga was started with a fixed command set and deadline.
    SagaStarted {
        /// Participants in declaration order, paired with their delta.
        commands: Vec<(AccountId, Delta)>,
        /// Absolute prepare-phase deadline.
        deadline: DateTime<Utc>,
    },
    /// A participant acknowledged readiness.
    ParticipantReady {
        /// The participant that acknowledged.
        account_id: AccountId,
    },
    /// A participant refused to stage its delta.
    ParticipantRejected {
        /// The participant that refused.
        account_id: AccountId,
        /// Why it refused.
        reason: RejectionReason,
    },
    /// The coordinator decided to commit.
    CommitDecided,
    /// The coordinator decided to roll back.
    RollbackDecided,
    /// A participant acknowledged a clear.
    ParticipantCleared {
        /// The participant that cleared.
        account_id: AccountId,
    },
    /// A participant acknowledged a reversal.
    ParticipantReversed {
        /// The participant that reversed.
        account_id: AccountId,
    },
    /// The saga reached its terminal state.
    SagaCompleted {
        /// The final outcome.
        outcome: SagaOutcome,
    },
}

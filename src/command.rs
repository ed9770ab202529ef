//! Wire-level command envelopes (spec §6).

use serde::{Deserialize, Serialize};

use crate::common::{AccountId, Amount, Delta, TransactionId};

/// Commands accepted by a `BankAccount` entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AccountCommand {
    /// Create the account. Idempotent: a no-op if already created.
    CreateBankAccount {
        /// Owning customer's identifier.
        customer_number: String,
        /// This account's identifier.
        account_number: AccountId,
    },
    /// Stage a deposit or withdrawal under `tx_id`.
    StartTransaction {
        /// The saga transaction this belongs to.
        tx_id: TransactionId,
        /// The delta to stage.
        op: Delta,
    },
    /// Durably apply a previously staged transaction.
    CommitTransaction {
        /// The transaction to commit.
        tx_id: TransactionId,
    },
    /// Discard a previously staged transaction.
    RollbackTransaction {
        /// The transaction to roll back.
        tx_id: TransactionId,
    },
    /// Query the account's current state; has no effect.
    GetBankAccountState,
}

/// Commands accepted by a `SagaCoordinator` entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SagaCommand {
    /// Start a saga driving `commands` to a single global outcome.
    StartSaga {
        /// The participants and their deltas, in declaration order.
        commands: Vec<(AccountId, Delta)>,
        /// How long the prepare phase may run before aborting.
        prepare_timeout_ms: u64,
    },
    /// A participant acknowledged readiness.
    Ready {
        /// The acknowledging participant.
        account_id: AccountId,
    },
    /// A participant refused to stage its delta.
    Rejected {
        /// The refusing participant.
        account_id: AccountId,
        /// Why it refused.
        reason: crate::event::RejectionReason,
    },
    /// A participant acknowledged a clear.
    Cleared {
        /// The acknowledging participant.
        account_id: AccountId,
    },
    /// A participant acknowledged a reversal.
    Reversed {
        /// The acknowledging participant.
        account_id: AccountId,
    },
    /// A timeout tick; the saga checks its deadline against this instant.
    Tick,
}

/// Acknowledgement an account entity sends back to the saga coordinator that
/// addressed it (the `replyTo` carried by the command envelope).
#[derive(Clone, Debug, PartialEq)]
pub enum AccountAck {
    /// The staged delta was accepted.
    Ready {
        /// Which account acknowledged.
        account_id: AccountId,
    },
    /// The staged delta was refused.
    Rejected {
        /// Which account refused.
        account_id: AccountId,
        /// Why.
        reason: crate::event::RejectionReason,
    },
    /// The staged delta was durably applied.
    Cleared {
        /// Which account acknowledged.
        account_id: AccountId,
    },
    /// The staged delta was discarded.
    Reversed {
        /// Which account acknowledged.
        account_id: AccountId,
    },
    /// The command referenced a transaction the account does not recognize.
    UnknownTransaction {
        /// Which account replied.
        account_id: AccountId,
    },
}

/// CSV-friendly scenario record for the demo harness (spec §10 bootstrap).
///
/// Mirrors the teacher's flat, internally-untagged CSV record shape: one
/// column per possible field, an explicit `kind` discriminator, and a
/// `TryFrom` conversion into the richer typed command — CSV cannot represent
/// an internally tagged enum directly.
pub mod csv_scenario {
    use super::*;
    use std::io;

    #[derive(Deserialize, Debug)]
    pub struct ScenarioRecord {
        kind: RecordKind,
        account: String,
        customer: Option<String>,
        #[serde(default)]
        amount: Option<Amount>,
        #[serde(default)]
        tx_id: Option<String>,
        #[serde(default)]
        participants: Option<String>,
    }

    #[derive(Deserialize, Debug, Copy, Clone)]
    #[serde(rename_all = "snake_case")]
    enum RecordKind {
        CreateAccount,
        Deposit,
        Withdraw,
        Saga,
    }

    /// A scenario line, resolved into either an account-level command or a
    /// saga definition (`commands` is only populated for `Saga` rows).
    pub enum ScenarioLine {
        /// A single account command, fed directly to the account entity.
        Account(AccountId, AccountCommand),
        /// A saga spanning the listed `(account, delta)` pairs.
        Saga(TransactionId, Vec<(AccountId, Delta)>),
    }

    impl TryFrom<ScenarioRecord> for ScenarioLine {
        type Error = io::Error;

        fn try_from(rec: ScenarioRecord) -> Result<Self, Self::Error> {
            let bad = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
            let account_id = AccountId::new(rec.account.clone())
                .map_err(|_| bad("account id must not be empty"))?;

            match rec.kind {
                RecordKind::CreateAccount => {
                    let customer = rec.customer.ok_or_else(|| bad("missing customer"))?;
                    Ok(ScenarioLine::Account(
                        account_id.clone(),
                        AccountCommand::CreateBankAccount {
                            customer_number: customer,
                            account_number: account_id,
                        },
                    ))
                }
                RecordKind::Deposit | RecordKind::Withdraw => {
                    let amount = rec.amount.ok_or_else(|| bad("missing amount"))?;
                    let tx_id = rec
                        .tx_id
                        .and_then(|s| TransactionId::new(s).ok())
                        .ok_or_else(|| bad("missing tx_id"))?;
                    let op = match rec.kind {
                        RecordKind::Deposit => Delta::Deposit { amount },
                        RecordKind::Withdraw => Delta::Withdraw { amount },
                        _ => unreachable!(),
                    };
                    Ok(ScenarioLine::Account(
                        account_id,
                        AccountCommand::StartTransaction { tx_id, op },
                    ))
                }
                RecordKind::Saga => {
                    let tx_id = rec
                        .tx_id
                        .and_then(|s| TransactionId::new(s).ok())
                        .ok_or_else(|| bad("missing tx_id"))?;
                    let amount = rec.amount.ok_or_else(|| bad("missing amount"))?;
                    let participants = rec.participants.unwrap_or_default();
                    let mut commands = vec![(
                        account_id,
                        if amount >= Amount::ZERO {
                            Delta::Deposit { amount }
                        } else {
                            Delta::Withdraw { amount: -amount }
                        },
                    )];
                    for extra in participants.split(';').filter(|s| !s.is_empty()) {
                        let (acc, amt) = extra
                            .split_once(':')
                            .ok_or_else(|| bad("participant must be account:amount"))?;
                        let acc = AccountId::new(acc).map_err(|_| bad("bad participant id"))?;
                        let amt: Amount = amt.parse().map_err(|_| bad("bad participant amount"))?;
                        let delta = if amt >= Amount::ZERO {
                            Delta::Deposit { amount: amt }
                        } else {
                            Delta::Withdraw { amount: -amt }
                        };
                        commands.push((acc, delta));
                    }
                    Ok(ScenarioLine::Saga(tx_id, commands))
                }
            }
        }
    }

}

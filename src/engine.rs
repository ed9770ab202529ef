//! `SagaEngine`: the orchestration facade wiring the Bank Account and Saga
//! Coordinator entity routers together, generalizing the teacher's
//! top-level `Engine` (`feed`/`finish`/`run`) into a two-router system where
//! a saga's directives are translated into account commands and the
//! resulting acks are fed back as saga commands (spec §4.2's protocol).

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::account::{self, AccountSnapshot, BankAccountState};
use crate::clock::Clock;
use crate::command::{AccountAck, AccountCommand, SagaCommand};
use crate::common::{AccountId, Delta, TransactionId};
use crate::event::{AccountEvent, SagaEvent, SagaOutcome};
use crate::journal::{EventJournal, JournalError};
use crate::router::{EntityLogic, EntityRouter, RouterError};
use crate::saga::{self, AccountDirective, SagaState};

/// Errors raised by `SagaEngine`.
#[derive(Debug, Error)]
pub enum Error {
    /// A command could not be routed to its entity.
    #[error(transparent)]
    Router(#[from] RouterError),
    /// An event failed to persist.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// The saga referenced an account that rejected with an unexpected ack.
    #[error("account {0} replied with an ack the saga protocol doesn't expect")]
    UnexpectedAck(AccountId),
}

/// Wraps `BankAccountState` so the router can activate and drive it.
struct AccountEntity(BankAccountState);

/// An account command's reply: the ack (if any) owed to the caller, a state
/// snapshot when the command was a `GetBankAccountState` query, and any acks
/// produced by draining the stash, tagged with the transaction id each
/// actually belongs to (never the caller's own) — these must be routed by
/// the engine to the saga that started that transaction, not assumed to be
/// for whoever sent this command.
type AccountReply = (
    Option<AccountAck>,
    Option<AccountSnapshot>,
    Vec<(TransactionId, AccountAck)>,
);

impl EntityLogic for AccountEntity {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Reply = AccountReply;
    type Config = Option<usize>;

    fn hydrate(key: &str, stash_bound: &Option<usize>, events: &[AccountEvent]) -> Self {
        let id = AccountId::new(key).expect("router keys are non-empty");
        Self(BankAccountState::replay(id, events, *stash_bound))
    }

    fn apply(&mut self, cmd: AccountCommand) -> (Vec<AccountEvent>, AccountReply) {
        let is_query = matches!(cmd, AccountCommand::GetBankAccountState);
        let applied = self.0.handle(cmd);
        let snapshot = is_query.then(|| self.0.snapshot());
        (applied.events, (applied.ack, snapshot, applied.side_effects))
    }
}

/// Wraps `SagaState` plus the injected clock so the router can activate and
/// drive it.
struct SagaEntity {
    state: SagaState,
    clock: Arc<dyn Clock>,
}

/// What a saga command reply carries back to the engine loop: directives to
/// forward to participants, and the final outcome once settled.
type SagaReply = (Vec<(AccountId, AccountDirective)>, Option<SagaOutcome>);

impl EntityLogic for SagaEntity {
    type Command = SagaCommand;
    type Event = SagaEvent;
    type Reply = SagaReply;
    type Config = Arc<dyn Clock>;

    fn hydrate(_key: &str, clock: &Arc<dyn Clock>, events: &[SagaEvent]) -> Self {
        Self {
            state: SagaState::replay(events),
            clock: Arc::clone(clock),
        }
    }

    fn apply(&mut self, cmd: SagaCommand) -> (Vec<SagaEvent>, SagaReply) {
        let applied = self.state.handle(cmd, self.clock.now());
        (applied.events, (applied.dispatch, applied.outcome))
    }
}

/// A directive translated into the account command that carries it out.
fn directive_to_command(tx_id: TransactionId, directive: AccountDirective) -> AccountCommand {
    match directive {
        AccountDirective::Start(op) => AccountCommand::StartTransaction { tx_id, op },
        AccountDirective::Commit => AccountCommand::CommitTransaction { tx_id },
        AccountDirective::Rollback => AccountCommand::RollbackTransaction { tx_id },
    }
}

/// An ack translated into the saga command reporting it, or `None` for acks
/// the saga protocol doesn't react to (`UnknownTransaction`, which only
/// happens on a redelivered or stale directive).
fn ack_to_command(ack: AccountAck) -> Option<SagaCommand> {
    match ack {
        AccountAck::Ready { account_id } => Some(SagaCommand::Ready { account_id }),
        AccountAck::Rejected { account_id, reason } => {
            Some(SagaCommand::Rejected { account_id, reason })
        }
        AccountAck::Cleared { account_id } => Some(SagaCommand::Cleared { account_id }),
        AccountAck::Reversed { account_id } => Some(SagaCommand::Reversed { account_id }),
        AccountAck::UnknownTransaction { .. } => None,
    }
}

/// Wires an account router and a saga router together behind one API.
pub struct SagaEngine<JA, JS>
where
    JA: EventJournal<AccountEvent> + Send + Sync + 'static,
    JS: EventJournal<SagaEvent> + Send + Sync + 'static,
{
    accounts: EntityRouter<AccountEntity, JA>,
    sagas: EntityRouter<SagaEntity, JS>,
}

impl<JA, JS> SagaEngine<JA, JS>
where
    JA: EventJournal<AccountEvent> + Send + Sync + 'static,
    JS: EventJournal<SagaEvent> + Send + Sync + 'static,
{
    /// Build an engine with `n_workers` per router.
    #[must_use]
    pub fn new(
        n_workers: usize,
        account_journal: Arc<JA>,
        saga_journal: Arc<JS>,
        stash_bound: Option<usize>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts: EntityRouter::new(n_workers, account_journal, stash_bound),
            sagas: EntityRouter::new(n_workers, saga_journal, clock),
        }
    }

    /// Create a bank account (idempotent).
    pub fn create_account(
        &self,
        account_number: AccountId,
        customer_number: String,
    ) -> Result<(), Error> {
        self.accounts.send(
            account_number.as_str(),
            AccountCommand::CreateBankAccount {
                customer_number,
                account_number: account_number.clone(),
            },
        )?;
        Ok(())
    }

    /// Read an account's current snapshot without mutating it.
    ///
    /// `GetBankAccountState` never emits an event, so this is safe to call
    /// from any phase; the router still serializes it behind any in-flight
    /// mutation on the same key.
    pub fn account_state(&self, account_id: &AccountId) -> Result<AccountSnapshot, Error> {
        let (_, snapshot, _) = self
            .accounts
            .send(account_id.as_str(), AccountCommand::GetBankAccountState)?;
        Ok(snapshot.expect("GetBankAccountState always yields a snapshot"))
    }

    /// Run a saga to completion, driving participants through prepare,
    /// commit/rollback, and confirmation (spec §4.2's full protocol).
    pub fn submit_saga(
        &self,
        tx_id: TransactionId,
        commands: Vec<(AccountId, Delta)>,
        prepare_timeout_ms: u64,
    ) -> Result<SagaOutcome, Error> {
        let saga_key = tx_id.as_str();
        let (mut dispatch, mut outcome) = self.sagas.send(
            saga_key,
            SagaCommand::StartSaga {
                commands,
                prepare_timeout_ms,
            },
        )?;

        while outcome.is_none() {
            if dispatch.is_empty() {
                // No participant acks are pending and the saga hasn't
                // reached a verdict; only the deadline can move it now.
                let (next_dispatch, next_outcome) =
                    self.sagas.send(saga_key, SagaCommand::Tick)?;
                dispatch = next_dispatch;
                outcome = next_outcome;
                continue;
            }

            let saga_replies = self.pump(&tx_id, dispatch)?;

            let mut next_dispatch = Vec::new();
            for saga_cmd in saga_replies {
                let (d, o) = self.sagas.send(saga_key, saga_cmd)?;
                next_dispatch.extend(d);
                if o.is_some() {
                    outcome = o;
                }
            }
            dispatch = next_dispatch;
        }

        debug!(saga = %tx_id, ?outcome, "saga run complete");
        Ok(outcome.expect("loop only exits once outcome is Some"))
    }

    /// Forward each directive in `dispatch` to its account and collect the
    /// replies addressed to `tx_id`'s own saga.
    ///
    /// A commit/rollback can also drain a participant's stash, producing an
    /// ack for a wholly different transaction (`AccountReply`'s third
    /// element) — that ack is never for `tx_id`, so it's routed straight to
    /// the saga that actually owns it via `route_to_saga` rather than folded
    /// into this call's return value. Without that, the owning saga — which
    /// may be driven by a different thread that's only polling via `Tick` —
    /// would never learn its participant settled and would spin until its
    /// own deadline.
    fn pump(
        &self,
        tx_id: &TransactionId,
        dispatch: Vec<(AccountId, AccountDirective)>,
    ) -> Result<Vec<SagaCommand>, Error> {
        let mut saga_replies = Vec::new();
        for (account_id, directive) in dispatch {
            let cmd = directive_to_command(tx_id.clone(), directive);
            let (ack, _, side_effects) = self.accounts.send(account_id.as_str(), cmd)?;
            if let Some(saga_cmd) = ack.and_then(ack_to_command) {
                saga_replies.push(saga_cmd);
            }
            for (owner_tx, owner_ack) in side_effects {
                if let Some(saga_cmd) = ack_to_command(owner_ack) {
                    self.route_to_saga(&owner_tx, saga_cmd)?;
                }
            }
        }
        Ok(saga_replies)
    }

    /// Deliver `cmd` to the saga that owns `tx_id` and drive whatever
    /// directives it produces to convergence, without waiting for that
    /// saga's own outcome — its owning `submit_saga` call (on whatever
    /// thread started it) will observe completion on its next `Tick` thanks
    /// to `SagaState` replaying its stored outcome once `Completed`.
    fn route_to_saga(&self, tx_id: &TransactionId, cmd: SagaCommand) -> Result<(), Error> {
        let (dispatch, _) = self.sagas.send(tx_id.as_str(), cmd)?;
        self.drive_to_convergence(tx_id, dispatch)
    }

    /// Keep pumping directives and feeding resulting acks back to the saga
    /// until it stops producing new directives.
    fn drive_to_convergence(
        &self,
        tx_id: &TransactionId,
        mut dispatch: Vec<(AccountId, AccountDirective)>,
    ) -> Result<(), Error> {
        while !dispatch.is_empty() {
            let saga_replies = self.pump(tx_id, dispatch)?;
            let mut next_dispatch = Vec::new();
            for saga_cmd in saga_replies {
                let (d, _) = self.sagas.send(tx_id.as_str(), saga_cmd)?;
                next_dispatch.extend(d);
            }
            dispatch = next_dispatch;
        }
        Ok(())
    }

    /// Tear down both routers, draining in-flight commands first.
    pub fn shutdown(self) {
        self.accounts.shutdown();
        self.sagas.shutdown();
    }
}

//! The Saga Coordinator entity: drives a set of account deltas to a single
//! global commit or rollback (spec §4.2).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::command::SagaCommand;
use crate::common::{AccountId, Delta};
use crate::event::{RejectionReason, SagaEvent, SagaOutcome};

/// The coordinator's current phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SagaPhase {
    /// No `SagaStarted` event has been applied yet.
    Pending,
    /// Waiting for every participant to acknowledge readiness, or reject.
    AwaitingReady,
    /// Every participant was ready; broadcasting `CommitTransaction`.
    Committing,
    /// At least one participant rejected, or the deadline passed; broadcasting
    /// `RollbackTransaction`.
    RollingBack,
    /// Every participant acknowledged the decision; the saga is done.
    Completed,
}

/// Side effects the router must carry out after a command is applied: which
/// account commands to send, and whether the saga reached a terminal state.
#[derive(Debug, Default)]
pub struct Applied {
    /// The events to append to the journal, in order, if the command had an
    /// effect. A single command can produce more than one event — e.g. the
    /// last `Ready` both records itself and immediately decides to commit.
    pub events: Vec<SagaEvent>,
    /// `AccountCommand`s to dispatch to participants, paired with their id.
    pub dispatch: Vec<(AccountId, AccountDirective)>,
    /// Set once the saga reaches `Completed`.
    pub outcome: Option<SagaOutcome>,
}

/// What to tell a participant to do, decoupled from `AccountCommand` so this
/// module doesn't need to depend on `command::AccountCommand`'s full shape.
#[derive(Clone, Debug, PartialEq)]
pub enum AccountDirective {
    /// Stage `delta` under this saga's transaction id.
    Start(Delta),
    /// Durably apply the previously staged delta.
    Commit,
    /// Discard the previously staged delta.
    Rollback,
}

/// The persistent, in-memory state of one saga, reconstructed by folding its
/// event stream (spec §3/§4.2).
#[derive(Debug)]
pub struct SagaState {
    phase: SagaPhase,
    participants: Vec<(AccountId, Delta)>,
    deadline: Option<DateTime<Utc>>,
    ready: HashSet<AccountId>,
    rejected: HashSet<AccountId>,
    settled: HashSet<AccountId>,
    /// Set once `phase` reaches `Completed`, so a re-delivered or late
    /// command still gets a meaningful reply instead of a silent no-op
    /// (needed when another saga's driving thread routes an ack here
    /// after this saga already finished; see `SagaEngine::route_to_saga`).
    final_outcome: Option<SagaOutcome>,
}

impl SagaState {
    /// A fresh, pending saga.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: SagaPhase::Pending,
            participants: Vec::new(),
            deadline: None,
            ready: HashSet::new(),
            rejected: HashSet::new(),
            settled: HashSet::new(),
            final_outcome: None,
        }
    }

    /// Rebuild state by folding a replayed event stream in journal order.
    #[must_use]
    pub fn replay(events: &[SagaEvent]) -> Self {
        let mut state = Self::new();
        for event in events {
            state.apply_event(event);
        }
        state
    }

    /// The coordinator's current phase.
    #[must_use]
    pub fn phase(&self) -> SagaPhase {
        self.phase
    }

    /// The participant set and their deltas, in declaration order.
    #[must_use]
    pub fn participants(&self) -> &[(AccountId, Delta)] {
        &self.participants
    }

    /// Participants that refused to stage their delta — they never received
    /// a commit/rollback directive, since they have nothing to undo.
    #[must_use]
    pub fn rejected(&self) -> &HashSet<AccountId> {
        &self.rejected
    }

    fn apply_event(&mut self, event: &SagaEvent) {
        match event {
            SagaEvent::SagaStarted { commands, deadline } => {
                self.participants = commands.clone();
                self.deadline = Some(*deadline);
                self.phase = SagaPhase::AwaitingReady;
            }
            SagaEvent::ParticipantReady { account_id } => {
                self.ready.insert(account_id.clone());
            }
            SagaEvent::ParticipantRejected { account_id, .. } => {
                self.rejected.insert(account_id.clone());
            }
            SagaEvent::CommitDecided => {
                self.phase = SagaPhase::Committing;
                self.settled.clear();
            }
            SagaEvent::RollbackDecided => {
                self.phase = SagaPhase::RollingBack;
                self.settled.clear();
            }
            SagaEvent::ParticipantCleared { account_id }
            | SagaEvent::ParticipantReversed { account_id } => {
                self.settled.insert(account_id.clone());
            }
            SagaEvent::SagaCompleted { outcome } => {
                self.phase = SagaPhase::Completed;
                self.final_outcome = Some(*outcome);
            }
        }
    }

    fn all_participants_ready(&self) -> bool {
        self.participants
            .iter()
            .all(|(id, _)| self.ready.contains(id))
    }

    /// Whether every participant that actually staged a delta (i.e. is in
    /// `ready`) has settled. Participants that were rejected, or never
    /// responded before a deadline rollback, never staged anything and so
    /// are never dispatched a commit/rollback directive — they must not be
    /// required to settle (spec §4.2 step 4: "participants not in `ready`
    /// have nothing to undo").
    fn all_participants_settled(&self) -> bool {
        self.ready.iter().all(|id| self.settled.contains(id))
    }

    /// Process one command, returning the event to persist (if any), the
    /// participant directives to dispatch, and the terminal outcome (if the
    /// saga just completed).
    ///
    /// Per spec §4.2, each state transition is persisted before its
    /// directives are dispatched — this method only computes the
    /// transition; persistence and dispatch ordering is the router's job.
    pub fn handle(&mut self, cmd: SagaCommand, now: DateTime<Utc>) -> Applied {
        if self.phase == SagaPhase::Completed {
            // A re-delivered ack, or an ack routed here by another saga's
            // driving thread after this one already settled — report the
            // stored outcome instead of silently dropping it, so a caller
            // that's only polling via `Tick` still notices completion.
            return Applied {
                events: Vec::new(),
                dispatch: Vec::new(),
                outcome: self.final_outcome,
            };
        }
        match cmd {
            SagaCommand::StartSaga {
                commands,
                prepare_timeout_ms,
            } => self.handle_start(commands, prepare_timeout_ms, now),
            SagaCommand::Ready { account_id } => self.handle_ready(account_id),
            SagaCommand::Rejected { account_id, reason } => {
                self.handle_rejected(account_id, reason)
            }
            SagaCommand::Cleared { account_id } => self.handle_settled(account_id, true),
            SagaCommand::Reversed { account_id } => self.handle_settled(account_id, false),
            SagaCommand::Tick => self.handle_tick(now),
        }
    }

    fn handle_start(
        &mut self,
        commands: Vec<(AccountId, Delta)>,
        prepare_timeout_ms: u64,
        now: DateTime<Utc>,
    ) -> Applied {
        if self.phase != SagaPhase::Pending {
            debug!("duplicate StartSaga ignored");
            return Applied::default();
        }
        let deadline = now + chrono::Duration::milliseconds(prepare_timeout_ms as i64);
        let event = SagaEvent::SagaStarted {
            commands: commands.clone(),
            deadline,
        };
        self.apply_event(&event);
        let dispatch = commands
            .into_iter()
            .map(|(id, delta)| (id, AccountDirective::Start(delta)))
            .collect();
        info!(participants = self.participants.len(), "saga started");
        Applied {
            events: vec![event],
            dispatch,
            outcome: None,
        }
    }

    fn handle_ready(&mut self, account_id: AccountId) -> Applied {
        if self.phase != SagaPhase::AwaitingReady || self.ready.contains(&account_id) {
            return Applied::default();
        }
        let event = SagaEvent::ParticipantReady {
            account_id: account_id.clone(),
        };
        self.apply_event(&event);
        if self.all_participants_ready() {
            let mut applied = self.decide(SagaOutcome::Committed);
            applied.events.insert(0, event);
            return applied;
        }
        Applied {
            events: vec![event],
            dispatch: Vec::new(),
            outcome: None,
        }
    }

    fn handle_rejected(&mut self, account_id: AccountId, reason: RejectionReason) -> Applied {
        if self.phase != SagaPhase::AwaitingReady {
            return Applied::default();
        }
        warn!(account = %account_id, "participant rejected, rolling back saga");
        let event = SagaEvent::ParticipantRejected { account_id, reason };
        self.apply_event(&event);
        let mut applied = self.decide(SagaOutcome::RolledBack);
        applied.events.insert(0, event);
        applied
    }

    /// Persist the commit/rollback decision, then broadcast the matching
    /// directive to every participant in `ready` — the only ones that
    /// actually staged a delta. Participants that were rejected, or never
    /// responded before a deadline rollback, are skipped entirely: they
    /// have nothing to commit or undo (spec §4.2 steps 3-4).
    fn decide(&mut self, outcome: SagaOutcome) -> Applied {
        let decision_event = match outcome {
            SagaOutcome::Committed => SagaEvent::CommitDecided,
            SagaOutcome::RolledBack => SagaEvent::RollbackDecided,
        };
        self.apply_event(&decision_event);
        let directive = match outcome {
            SagaOutcome::Committed => AccountDirective::Commit,
            SagaOutcome::RolledBack => AccountDirective::Rollback,
        };
        let dispatch: Vec<_> = self
            .participants
            .iter()
            .filter(|(id, _)| self.ready.contains(id))
            .map(|(id, _)| (id.clone(), directive.clone()))
            .collect();
        info!(outcome = ?outcome, "saga decided");
        let mut events = vec![decision_event];
        let mut final_outcome = None;
        if self.all_participants_settled() {
            // Nobody staged anything (every participant was rejected, or a
            // deadline fired before anyone acked) — there's nothing to wait
            // for, so complete right away instead of hanging for acks that
            // will never arrive.
            let completed = SagaEvent::SagaCompleted { outcome };
            self.apply_event(&completed);
            info!(?outcome, "saga completed");
            events.push(completed);
            final_outcome = Some(outcome);
        }
        Applied {
            events,
            dispatch,
            outcome: final_outcome,
        }
    }

    fn handle_settled(&mut self, account_id: AccountId, cleared: bool) -> Applied {
        let expected = match self.phase {
            SagaPhase::Committing => true,
            SagaPhase::RollingBack => false,
            _ => return Applied::default(),
        };
        if cleared != expected || self.settled.contains(&account_id) {
            return Applied::default();
        }
        let event = if cleared {
            SagaEvent::ParticipantCleared { account_id }
        } else {
            SagaEvent::ParticipantReversed { account_id }
        };
        self.apply_event(&event);
        if self.all_participants_settled() {
            let outcome = if self.phase == SagaPhase::Committing {
                SagaOutcome::Committed
            } else {
                SagaOutcome::RolledBack
            };
            let completed = SagaEvent::SagaCompleted { outcome };
            self.apply_event(&completed);
            info!(?outcome, "saga completed");
            return Applied {
                events: vec![event, completed],
                dispatch: Vec::new(),
                outcome: Some(outcome),
            };
        }
        Applied {
            events: vec![event],
            dispatch: Vec::new(),
            outcome: None,
        }
    }

    fn handle_tick(&mut self, now: DateTime<Utc>) -> Applied {
        if self.phase != SagaPhase::AwaitingReady {
            return Applied::default();
        }
        let Some(deadline) = self.deadline else {
            return Applied::default();
        };
        if now < deadline {
            return Applied::default();
        }
        warn!("prepare-phase deadline passed, rolling back saga");
        self.decide(SagaOutcome::RolledBack)
    }
}

impl Default for SagaState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn deposit(n: i64) -> Delta {
        Delta::Deposit {
            amount: crate::common::Amount::new(n, 0),
        }
    }

    #[test]
    fn start_saga_dispatches_to_every_participant() {
        let mut saga = SagaState::new();
        let applied = saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10)), (acct("A2"), deposit(5))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        assert_eq!(saga.phase(), SagaPhase::AwaitingReady);
        assert_eq!(applied.dispatch.len(), 2);
        assert!(matches!(applied.dispatch[0].1, AccountDirective::Start(_)));
    }

    #[test]
    fn all_ready_commits() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10)), (acct("A2"), deposit(5))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Ready {
                account_id: acct("A1"),
            },
            epoch(),
        );
        let applied = saga.handle(
            SagaCommand::Ready {
                account_id: acct("A2"),
            },
            epoch(),
        );
        assert_eq!(saga.phase(), SagaPhase::Committing);
        assert_eq!(applied.dispatch.len(), 2);
        assert!(applied
            .dispatch
            .iter()
            .all(|(_, d)| matches!(d, AccountDirective::Commit)));
    }

    #[test]
    fn one_rejection_rolls_back() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10)), (acct("A2"), deposit(5))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Ready {
                account_id: acct("A1"),
            },
            epoch(),
        );
        let applied = saga.handle(
            SagaCommand::Rejected {
                account_id: acct("A2"),
                reason: RejectionReason::InsufficientFunds,
            },
            epoch(),
        );
        assert_eq!(saga.phase(), SagaPhase::RollingBack);
        assert!(applied
            .dispatch
            .iter()
            .all(|(_, d)| matches!(d, AccountDirective::Rollback)));
    }

    #[test]
    fn rejection_reason_is_preserved_verbatim() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        let applied = saga.handle(
            SagaCommand::Rejected {
                account_id: acct("A1"),
                reason: RejectionReason::Uninitialized,
            },
            epoch(),
        );
        assert!(applied.events.iter().any(|e| matches!(
            e,
            SagaEvent::ParticipantRejected {
                reason: RejectionReason::Uninitialized,
                ..
            }
        )));
    }

    #[test]
    fn completed_saga_reports_outcome_to_a_late_command() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Ready {
                account_id: acct("A1"),
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Cleared {
                account_id: acct("A1"),
            },
            epoch(),
        );
        assert_eq!(saga.phase(), SagaPhase::Completed);

        let late = saga.handle(SagaCommand::Tick, epoch());
        assert_eq!(late.outcome, Some(SagaOutcome::Committed));
        assert!(late.events.is_empty());
    }

    #[test]
    fn commit_completes_once_all_cleared() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10)), (acct("A2"), deposit(5))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Ready {
                account_id: acct("A1"),
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Ready {
                account_id: acct("A2"),
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Cleared {
                account_id: acct("A1"),
            },
            epoch(),
        );
        let applied = saga.handle(
            SagaCommand::Cleared {
                account_id: acct("A2"),
            },
            epoch(),
        );
        assert_eq!(saga.phase(), SagaPhase::Completed);
        assert_eq!(applied.outcome, Some(SagaOutcome::Committed));
    }

    #[test]
    fn tick_past_deadline_rolls_back() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        let past_deadline = epoch() + chrono::Duration::seconds(2);
        let applied = saga.handle(SagaCommand::Tick, past_deadline);
        // A1 never acked, so it was never dispatched a rollback (nothing to
        // undo) and the saga completes immediately with no one left to settle.
        assert_eq!(saga.phase(), SagaPhase::Completed);
        assert_eq!(applied.outcome, Some(SagaOutcome::RolledBack));
        assert!(applied.dispatch.is_empty());
    }

    #[test]
    fn tick_before_deadline_is_noop() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10))],
                prepare_timeout_ms: 10_000,
            },
            epoch(),
        );
        let applied = saga.handle(SagaCommand::Tick, epoch() + chrono::Duration::seconds(1));
        assert_eq!(saga.phase(), SagaPhase::AwaitingReady);
        assert!(applied.events.is_empty());
    }

    #[test]
    fn replay_reconstructs_phase() {
        let mut saga = SagaState::new();
        saga.handle(
            SagaCommand::StartSaga {
                commands: vec![(acct("A1"), deposit(10))],
                prepare_timeout_ms: 1_000,
            },
            epoch(),
        );
        saga.handle(
            SagaCommand::Ready {
                account_id: acct("A1"),
            },
            epoch(),
        );

        let events = vec![
            SagaEvent::SagaStarted {
                commands: vec![(acct("A1"), deposit(10))],
                deadline: epoch() + chrono::Duration::milliseconds(1_000),
            },
            SagaEvent::ParticipantReady {
                account_id: acct("A1"),
            },
            SagaEvent::CommitDecided,
        ];
        let replayed = SagaState::replay(&events);
        assert_eq!(replayed.phase(), SagaPhase::Committing);
    }
}

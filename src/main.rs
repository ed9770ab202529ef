//! Demo CLI: replay a CSV scenario of account creations and saga-driven
//! deposits/withdrawals through a `SagaEngine`, then print final balances.
//!
//! Single-account `deposit`/`withdraw` rows are run as one-participant
//! sagas rather than raw account commands, since an account only ever
//! stages a transaction on a saga coordinator's instruction (spec §4.1).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use saga_bank::account::AccountSnapshot;
use saga_bank::clock::SystemClock;
use saga_bank::command::csv_scenario::{ScenarioLine, ScenarioRecord};
use saga_bank::command::AccountCommand;
use saga_bank::common::AccountId;
use saga_bank::engine::SagaEngine;
use saga_bank::error::Error;
use saga_bank::event::{AccountEvent, SagaEvent};
use saga_bank::journal::{EventJournal, InMemoryJournal, RedbJournal};

#[derive(Parser)]
struct Cmd {
    /// Input file of account and saga scenario records.
    path: PathBuf,
    /// Output file for final account balances, defaults to stdout.
    output_file: Option<PathBuf>,
    /// Directory for the two `redb` journal files; kept in memory if omitted.
    #[arg(long)]
    db_dir: Option<PathBuf>,
    /// Worker threads per entity router.
    #[arg(long, default_value_t = num_cpus::get())]
    workers: usize,
    /// How many out-of-order commands an account stashes before replying Busy.
    #[arg(long, default_value_t = 64)]
    stash_bound: usize,
    /// Default prepare-phase timeout for sagas, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    prepare_timeout_ms: u64,
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();
    let cmd = Cmd::parse();
    match &cmd.db_dir {
        Some(dir) => {
            let engine = SagaEngine::new(
                cmd.workers,
                Arc::new(RedbJournal::open(dir.join("accounts.redb"))?),
                Arc::new(RedbJournal::open(dir.join("sagas.redb"))?),
                Some(cmd.stash_bound),
                Arc::new(SystemClock),
            );
            run(engine, &cmd)
        }
        None => {
            let engine = SagaEngine::new(
                cmd.workers,
                Arc::new(InMemoryJournal::new()),
                Arc::new(InMemoryJournal::new()),
                Some(cmd.stash_bound),
                Arc::new(SystemClock),
            );
            run(engine, &cmd)
        }
    }
}

fn run<JA, JS>(engine: SagaEngine<JA, JS>, cmd: &Cmd) -> Result<(), Error>
where
    JA: EventJournal<AccountEvent> + Send + Sync + 'static,
    JS: EventJournal<SagaEvent> + Send + Sync + 'static,
{
    let mut seen = BTreeSet::new();
    let records = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(&cmd.path)?
        .into_deserialize::<ScenarioRecord>();

    for record in records {
        match ScenarioLine::try_from(record?)? {
            ScenarioLine::Account(id, AccountCommand::CreateBankAccount { customer_number, .. }) => {
                seen.insert(id.clone());
                engine.create_account(id, customer_number)?;
            }
            ScenarioLine::Account(id, AccountCommand::StartTransaction { tx_id, op }) => {
                seen.insert(id.clone());
                engine.submit_saga(tx_id, vec![(id, op)], cmd.prepare_timeout_ms)?;
            }
            ScenarioLine::Account(_, _) => {}
            ScenarioLine::Saga(tx_id, commands) => {
                seen.extend(commands.iter().map(|(id, _)| id.clone()));
                engine.submit_saga(tx_id, commands, cmd.prepare_timeout_ms)?;
            }
        }
    }

    let balances: Vec<(AccountId, AccountSnapshot)> = seen
        .into_iter()
        .map(|id| {
            let snapshot = engine.account_state(&id)?;
            Ok::<_, Error>((id, snapshot))
        })
        .collect::<Result<_, _>>()?;

    engine.shutdown();

    match &cmd.output_file {
        Some(path) => write_balances_to_csv(balances, std::fs::File::create(path)?),
        None => write_balances_to_csv(balances, std::io::stdout()),
    }
    .map_err(Error::from)
}

fn write_balances_to_csv<W: std::io::Write>(
    balances: Vec<(AccountId, AccountSnapshot)>,
    writer: W,
) -> std::io::Result<()> {
    #[derive(serde::Serialize)]
    struct Record {
        account: String,
        status: &'static str,
        balance: saga_bank::Amount,
        pending: saga_bank::Amount,
    }

    let mut writer = csv::Writer::from_writer(writer);
    for (id, snapshot) in balances {
        writer.serialize(Record {
            account: id.to_string(),
            status: match snapshot.status {
                saga_bank::AccountStatus::Uninitialized => "uninitialized",
                saga_bank::AccountStatus::Active => "active",
                saga_bank::AccountStatus::InTransaction => "in_transaction",
            },
            balance: snapshot.balance,
            pending: snapshot.pending_balance,
        })?;
    }
    writer.flush()
}

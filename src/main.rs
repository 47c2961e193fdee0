use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use rota::config::EngineConfig;
use rota::engine::{run_reconciler, ConfirmationQueue, Engine, EngineError};
use rota::gateway::InMemoryGateway;
use rota::model::{Assignee, ShiftDraft, Table};
use rota::normalize::RawWindow;
use rota::notify::ChangeFeed;

/// A recorded sequence of gestures replayed against an in-memory store.
#[derive(Debug, Deserialize)]
struct Scenario {
    week_of: NaiveDate,
    #[serde(default)]
    rows: RawWindow,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    /// How the decision-maker answers any override prompt this step raises.
    #[serde(default, rename = "override")]
    accept_override: bool,
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Action {
    Create {
        draft: ShiftDraft,
    },
    Update {
        shift_id: Ulid,
        draft: ShiftDraft,
    },
    Move {
        shift_id: Ulid,
        employee_id: Option<Ulid>,
        date: NaiveDate,
    },
    Delete {
        shift_id: Ulid,
    },
    Assess {
        draft: ShiftDraft,
        #[serde(default)]
        exclude: Option<Ulid>,
    },
    /// A write by someone else, delivered through the change feed.
    External {
        table: Table,
        row: Value,
    },
    Scan,
    NextWeek,
    PrevWeek,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let metrics_port: Option<u16> = std::env::var("ROTA_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    rota::observability::init(metrics_port)?;

    let config = EngineConfig::from_env();
    let raw = match std::env::args().nth(1) {
        Some(path) => tokio::fs::read_to_string(&path).await?,
        None => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
            buf
        }
    };
    let scenario: Scenario = serde_json::from_str(&raw)?;

    let org = config.org_id.clone();
    let feed = Arc::new(ChangeFeed::new());
    let gateway = Arc::new(InMemoryGateway::new(config.timezone).with_feed(feed.clone()));
    gateway.seed(&org, scenario.rows);

    let (queue, mut prompts) = ConfirmationQueue::new();
    let engine = Arc::new(Engine::new(config, gateway.clone(), Arc::new(queue)));

    let accept = Arc::new(AtomicBool::new(false));
    let responder = {
        let accept = accept.clone();
        tokio::spawn(async move {
            while let Some(prompt) = prompts.recv().await {
                let answer = accept.load(Ordering::SeqCst);
                info!(prompt = prompt.id, answer, "{}", prompt.message);
                prompt.answer(answer);
            }
        })
    };
    let reconciler = tokio::spawn(run_reconciler(engine.clone(), feed.subscribe(&org)));

    let window = engine.load_window(scenario.week_of).await?;
    info!(org = %org, start = %window.start, end = %window.end(), "window loaded");

    for (n, step) in scenario.steps.into_iter().enumerate() {
        accept.store(step.accept_override, Ordering::SeqCst);
        let result = run_step(&engine, &gateway, &org, step.action).await;
        let line = match result {
            Ok(value) => json!({ "step": n, "ok": value }),
            Err(e) => json!({ "step": n, "error": e.to_string() }),
        };
        println!("{line}");
    }

    let view = engine.view().await;
    let mut shifts: Vec<_> = view.shifts().into_iter().cloned().collect();
    shifts.sort_by_key(|s| (s.span.start, s.id));
    println!(
        "{}",
        json!({
            "shifts": shifts,
            "worked_minutes": engine.worked_minutes().await,
            "conflicts": engine.conflicts_in_window().await.len(),
        })
    );

    feed.remove(&org);
    let _ = reconciler.await;
    responder.abort();
    Ok(())
}

async fn run_step(
    engine: &Engine,
    gateway: &InMemoryGateway,
    org: &str,
    action: Action,
) -> Result<Value, EngineError> {
    let value = match action {
        Action::Create { draft } => json!(engine.create_shift(draft).await?),
        Action::Update { shift_id, draft } => json!(engine.update_shift(shift_id, draft).await?),
        Action::Move {
            shift_id,
            employee_id,
            date,
        } => json!(
            engine
                .move_shift(shift_id, Assignee::from_employee(employee_id), date)
                .await?
        ),
        Action::Delete { shift_id } => json!(engine.delete_shift(shift_id).await?),
        Action::Assess { draft, exclude } => json!(engine.assess_draft(&draft, exclude).await?),
        Action::External { table, row } => {
            gateway.external_write(org, table, row);
            // Apply now rather than racing the background sweep.
            engine.reconcile().await?;
            json!({ "shifts": engine.view().await.shift_count() })
        }
        Action::Scan => {
            let found: Vec<Value> = engine
                .conflicts_in_window()
                .await
                .into_iter()
                .map(|(shift, assessment)| json!({ "shift": shift.id, "assessment": assessment }))
                .collect();
            json!(found)
        }
        Action::NextWeek => json!(engine.next_window().await?),
        Action::PrevWeek => json!(engine.prev_window().await?),
    };
    Ok(value)
}

//! `exitplan serve` - readiness server wired to a shutdown plan

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use exitplan_core::{
    CancellationToken, ExitContext, OperationStatus, Plan, ProcessExit, Readiness, ShutdownReport,
};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// HTTP port for the readiness server
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds to keep draining after a signal before cleanup starts
    #[arg(long)]
    pub grade_period: Option<u64>,

    /// Seconds cleanup may take before the process is forced down
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Also register an operation that takes this many seconds
    #[arg(long)]
    pub slow_op: Option<u64>,

    /// Also register an operation that always fails
    #[arg(long)]
    pub fail_op: bool,
}

pub fn run(args: ServeArgs, config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(serve(args, config))
}

async fn serve(args: ServeArgs, config: &Config) -> Result<()> {
    let mut plan_config = config.plan.to_plan_config();
    if let Some(secs) = args.grade_period {
        plan_config.grade_period = Duration::from_secs(secs);
    }
    if let Some(secs) = args.timeout {
        plan_config.timeout = Duration::from_secs(secs);
    }
    let plan = Plan::from_config(plan_config).context("Invalid plan configuration")?;
    let plan = Arc::new(plan.with_abort(Arc::new(ProcessExit {
        code: config.plan.force_exit_code,
    })));

    let addr = SocketAddr::new(config.server.bind, args.port.unwrap_or(config.server.port));
    let stop = CancellationToken::new();
    let stopped = CancellationToken::new();

    let app = Router::new()
        .route("/readyz", get(readyz))
        .with_state(plan.clone());
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("Cannot bind {addr}"))?
        .serve(app.into_make_service())
        .with_graceful_shutdown({
            let stop = stop.clone();
            async move { stop.cancelled().await }
        });
    tokio::spawn({
        let stopped = stopped.clone();
        async move {
            if let Err(e) = server.await {
                log::error!("HTTP server error: {e}");
            }
            stopped.cancel();
        }
    });

    plan.add("http", move |_ctx: ExitContext| {
        let stop = stop.clone();
        let stopped = stopped.clone();
        async move {
            stop.cancel();
            stopped.cancelled().await;
            anyhow::Ok(())
        }
    });
    if let Some(secs) = args.slow_op {
        plan.add("slow", move |ctx: ExitContext| async move {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(secs)) => Ok(()),
                () = ctx.cancelled() => anyhow::bail!("cancelled"),
            }
        });
    }
    if args.fail_op {
        plan.add("broken", |_ctx: ExitContext| async {
            Err::<(), _>(anyhow::anyhow!("simulated cleanup failure"))
        });
    }
    plan.finally(|_ctx: ExitContext| async {
        log::info!("final callback made");
        anyhow::Ok(())
    });

    let listener = plan.new_listener();
    tokio::spawn(async move {
        listener.await;
        log::info!("shutdown has begun, readiness now failing");
    });

    log::info!("Server running, readiness probe at http://{addr}/readyz");
    let report = plan.wait(CancellationToken::new()).await;
    eprintln!("\n{}", report_table(&report));
    if !report.is_clean() {
        log::warn!("shutdown finished with failures");
    }
    Ok(())
}

async fn readyz(State(plan): State<Arc<Plan>>) -> (StatusCode, &'static str) {
    let readiness = plan.readiness();
    let status = match readiness {
        Readiness::Ready => StatusCode::OK,
        Readiness::Terminating => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, readiness.body())
}

fn status_cell(status: &OperationStatus) -> Cell {
    match status {
        OperationStatus::Ok => Cell::new("ok").fg(Color::Green),
        OperationStatus::Failed(e) => Cell::new(format!("failed: {e}")).fg(Color::Red),
        OperationStatus::Panicked(e) => Cell::new(format!("panicked: {e}")).fg(Color::Red),
    }
}

fn report_table(report: &ShutdownReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Operation").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Elapsed").fg(Color::Cyan),
        ]);
    for op in &report.operations {
        table.add_row(vec![
            Cell::new(&op.name),
            status_cell(&op.status),
            Cell::new(format!("{:.2}s", op.elapsed.as_secs_f64())),
        ]);
    }
    if let Some(status) = &report.final_callback {
        table.add_row(vec![Cell::new("(final)"), status_cell(status), Cell::new("")]);
    }
    table
}

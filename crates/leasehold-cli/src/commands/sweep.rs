use crate::support::{
    Context, GlobalArgs, context_or_exit, exit_checkout_error, print_json, resource_or_exit,
};
use chrono::Utc;
use leasehold_kernel::{ResourceId, SweepReport};
use serde_json::{Value, json};
use std::process;
use std::sync::Arc;
use std::time::Duration;

pub struct Args {
    pub resource: Option<String>,
    pub watch: bool,
    pub interval_seconds: Option<u64>,
    pub json: bool,
}

pub fn run(globals: &GlobalArgs, args: Args) {
    let ctx = context_or_exit(globals);
    let resource = args.resource.as_deref().map(resource_or_exit);

    if args.watch {
        let interval = args
            .interval_seconds
            .unwrap_or(ctx.config.sweep.interval_seconds);
        run_watch(ctx, resource, Duration::from_secs(interval), args.json);
        return;
    }

    let report = ctx
        .service()
        .sweep(ctx.now, resource.as_ref())
        .unwrap_or_else(|err| exit_checkout_error("checkout.sweep", &err, args.json));

    if args.json {
        print_json(&report_json(&ctx, resource.as_ref(), &report));
    } else {
        print_report(&report);
    }
    if !report.all_succeeded() {
        process::exit(1);
    }
}

/// Sweep on every tick until Ctrl-C. Each pass runs at the wall clock.
fn run_watch(ctx: Context, resource: Option<ResourceId>, interval: Duration, json_output: bool) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("error: failed to create tokio runtime: {e}");
            process::exit(1);
        });

    eprintln!(
        "leasehold sweep: watching {} every {}s",
        ctx.root().display(),
        interval.as_secs()
    );
    let service = Arc::new(ctx.service());
    let ctx = Arc::new(ctx);

    runtime.block_on(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("sweep watch interrupted");
                    break;
                }
            }

            let pass_service = Arc::clone(&service);
            let pass_resource = resource.clone();
            let result = tokio::task::spawn_blocking(move || {
                pass_service.sweep(Utc::now(), pass_resource.as_ref())
            })
            .await;

            match result {
                Ok(Ok(report)) if json_output => {
                    println!(
                        "{}",
                        serde_json::to_string(&report_json(&ctx, resource.as_ref(), &report))
                            .expect("json serialization")
                    );
                }
                Ok(Ok(report)) => print_report(&report),
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, class = err.class(), "sweep pass failed");
                }
                Err(join) => {
                    eprintln!("error: sweep task failed: {join}");
                    process::exit(1);
                }
            }
        }
    });
}

fn report_json(ctx: &Context, resource: Option<&ResourceId>, report: &SweepReport) -> Value {
    json!({
        "action": "checkout.sweep",
        "root": ctx.root().display().to_string(),
        "resource": resource.map(|r| r.as_str()),
        "revoked": report.revoked,
        "reconciled": report.reconciled,
        "failures": report.failures.iter().map(|failure| json!({
            "resource": failure.resource.as_str(),
            "holder": failure.holder.as_str(),
            "class": failure.error.class(),
            "message": failure.error.to_string(),
        })).collect::<Vec<_>>(),
    })
}

fn print_report(report: &SweepReport) {
    println!(
        "leasehold sweep\n  Revoked: {}\n  Reconciled: {}\n  Failed: {}",
        report.revoked,
        report.reconciled,
        report.failures.len()
    );
    for failure in &report.failures {
        println!(
            "    - {} / {}: {}",
            failure.resource, failure.holder, failure.error
        );
    }
}

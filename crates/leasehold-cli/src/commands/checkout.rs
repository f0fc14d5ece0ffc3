use crate::support::{
    GlobalArgs, context_or_exit, exit_checkout_error, holder_or_exit, print_json,
    resource_or_exit, timestamp,
};
use leasehold_kernel::GrantOutcome;
use serde_json::json;

pub fn run_checkout(globals: &GlobalArgs, resource: String, holder: String, json_output: bool) {
    let ctx = context_or_exit(globals);
    let resource = resource_or_exit(&resource);
    let holder = holder_or_exit(&holder);

    let grant = ctx
        .service()
        .grant(&resource, &holder, ctx.now)
        .unwrap_or_else(|err| exit_checkout_error("checkout.grant", &err, json_output));

    if json_output {
        print_json(&json!({
            "action": "checkout.grant",
            "root": ctx.root().display().to_string(),
            "resource": grant.resource.as_str(),
            "holder": grant.holder.as_str(),
            "outcome": grant.outcome,
            "expiresAt": timestamp(grant.expires_at),
        }));
    } else {
        let verb = match grant.outcome {
            GrantOutcome::Created => "Checked out",
            GrantOutcome::AlreadyHeld => "Already checked out",
        };
        let until = grant
            .expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "leasehold checkout\n  {verb}: {} -> {}\n  Expires: {until}",
            grant.resource, grant.holder
        );
    }
}

pub fn run_return(
    globals: &GlobalArgs,
    resource: String,
    holder: String,
    sweep: bool,
    json_output: bool,
) {
    let ctx = context_or_exit(globals);
    let resource = resource_or_exit(&resource);
    let holder = holder_or_exit(&holder);
    let service = ctx.service();

    service
        .revoke(&resource, &holder, ctx.now)
        .unwrap_or_else(|err| exit_checkout_error("checkout.return", &err, json_output));

    let report = if sweep {
        Some(
            service
                .sweep(ctx.now, Some(&resource))
                .unwrap_or_else(|err| exit_checkout_error("checkout.return", &err, json_output)),
        )
    } else {
        None
    };

    if json_output {
        print_json(&json!({
            "action": "checkout.return",
            "root": ctx.root().display().to_string(),
            "resource": resource.as_str(),
            "holder": holder.as_str(),
            "sweep": report.as_ref().map(|report| json!({
                "revoked": report.revoked,
                "reconciled": report.reconciled,
                "failed": report.failures.len(),
            })),
        }));
    } else {
        println!("leasehold return\n  Returned: {resource} <- {holder}");
        if let Some(report) = report {
            println!(
                "  Sweep: {} revoked, {} reconciled, {} failed",
                report.revoked,
                report.reconciled,
                report.failures.len()
            );
        }
    }
}

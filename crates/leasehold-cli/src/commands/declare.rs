use crate::support::{GlobalArgs, context_or_exit, print_json, resource_or_exit};
use leasehold_kernel::{DeclarationError, declare, parse_declaration, undeclare};
use serde_json::json;
use std::fs;

pub fn run_declare(
    globals: &GlobalArgs,
    resource: String,
    source: Option<String>,
    source_file: Option<String>,
    json_output: bool,
) {
    let ctx = context_or_exit(globals);
    let resource = resource_or_exit(&resource);
    let source = match (source, source_file) {
        (Some(source), _) => source,
        (None, Some(path)) => fs::read_to_string(&path).unwrap_or_else(|e| {
            eprintln!("error: failed to read {path}: {e}");
            std::process::exit(1);
        }),
        (None, None) => {
            eprintln!("error: one of --source or --source-file is required");
            std::process::exit(1);
        }
    };

    let outcome = parse_declaration(&source)
        .and_then(|policy| {
            declare(ctx.stores.policies.as_ref(), &resource, &policy).map(|o| (policy, o))
        });
    let (policy, outcome) = match outcome {
        Ok(declared) => declared,
        Err(err) => exit_declaration_error("checkout.declare", &err, json_output),
    };

    if json_output {
        print_json(&json!({
            "action": "checkout.declare",
            "root": ctx.root().display().to_string(),
            "resource": resource.as_str(),
            "outcome": outcome.as_str(),
            "policy": {
                "maxConcurrent": policy.max_concurrent(),
                "leaseSeconds": policy.lease_duration().num_seconds(),
                "membershipDocument": policy.membership_document().as_str(),
            }
        }));
    } else {
        println!(
            "leasehold declare\n  Resource: {}\n  Outcome: {}\n  Capacity: {}\n  Lease: {} day(s)\n  Holders document: {}",
            resource,
            outcome.as_str(),
            policy.max_concurrent(),
            policy.lease_duration().num_days(),
            policy.membership_document()
        );
    }
}

pub fn run_undeclare(globals: &GlobalArgs, resource: String, json_output: bool) {
    let ctx = context_or_exit(globals);
    let resource = resource_or_exit(&resource);
    let removed = undeclare(ctx.stores.policies.as_ref(), &resource).unwrap_or_else(|err| {
        exit_declaration_error("checkout.undeclare", &err, json_output)
    });

    if json_output {
        print_json(&json!({
            "action": "checkout.undeclare",
            "root": ctx.root().display().to_string(),
            "resource": resource.as_str(),
            "removed": removed,
        }));
    } else if removed {
        println!("leasehold undeclare\n  Removed policy: {resource}");
    } else {
        println!("leasehold undeclare\n  No policy for: {resource}");
    }
}

fn exit_declaration_error(action: &str, err: &DeclarationError, json_output: bool) -> ! {
    if json_output {
        print_json(&json!({
            "action": action,
            "result": "rejected",
            "class": err.class(),
            "message": err.to_string(),
        }));
    }
    eprintln!("error: {err}");
    std::process::exit(1);
}

use crate::support::{
    GlobalArgs, context_or_exit, holder_or_exit, print_json, resource_or_exit, status_json,
    status_wording, timestamp,
};
use leasehold_kernel::{ExpiryIndex, MembershipDocuments, PolicyStore, membership_digest};
use serde_json::json;

pub fn run_status(
    globals: &GlobalArgs,
    resource: String,
    holder: Option<String>,
    json_output: bool,
) {
    let ctx = context_or_exit(globals);
    let resource = resource_or_exit(&resource);
    let holder = holder.as_deref().map(holder_or_exit);

    let status = ctx
        .service()
        .status(&resource, holder.as_ref(), ctx.now)
        .unwrap_or_else(|e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        });

    if json_output {
        print_json(&json!({
            "action": "checkout.status",
            "resource": resource.as_str(),
            "holder": holder.as_ref().map(|h| h.as_str()),
            "now": ctx.now.to_rfc3339(),
            "status": status_json(&status, ctx.now),
        }));
    } else {
        println!(
            "leasehold status\n  Resource: {resource}\n  {}",
            status_wording(&status, ctx.now)
        );
    }
}

pub fn run_holders(globals: &GlobalArgs, resource: String, json_output: bool) {
    let ctx = context_or_exit(globals);
    let resource = resource_or_exit(&resource);

    let policy = PolicyStore::get(ctx.stores.policies.as_ref(), &resource)
        .unwrap_or_else(|e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        })
        .unwrap_or_else(|| {
            eprintln!("error: checkout is not configured for {resource}");
            std::process::exit(1);
        });
    let document = policy.membership_document();
    let snapshot = ctx.stores.documents.read(document).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        std::process::exit(1);
    });

    let mut rows = Vec::with_capacity(snapshot.len());
    for holder in &snapshot.holders {
        let expires_at = ExpiryIndex::get(ctx.stores.expiry.as_ref(), &resource, holder)
            .unwrap_or_else(|e| {
                eprintln!("error: {e}");
                std::process::exit(1);
            });
        rows.push((holder, expires_at));
    }

    if json_output {
        print_json(&json!({
            "action": "checkout.holders",
            "resource": resource.as_str(),
            "document": document.as_str(),
            "version": snapshot.version.0,
            "digest": membership_digest(&snapshot.holders),
            "maxConcurrent": policy.max_concurrent(),
            "holders": rows.iter().map(|(holder, expires_at)| json!({
                "holder": holder.as_str(),
                "expiresAt": timestamp(*expires_at),
                "expired": expires_at.is_some_and(|at| at < ctx.now),
            })).collect::<Vec<_>>(),
        }));
    } else {
        println!(
            "leasehold holders\n  Resource: {resource}\n  Document: {document} ({})\n  Holders: {}/{}",
            snapshot.version,
            snapshot.len(),
            policy.max_concurrent()
        );
        for (holder, expires_at) in rows {
            let until = expires_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "no expiry row".to_string());
            println!("    - {holder} (until {until})");
        }
    }
}

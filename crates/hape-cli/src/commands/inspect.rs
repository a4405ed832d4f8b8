use hape_core::{TargetKind, WorkerKey};
use hape_target::TargetStore;

pub fn show(store: &dyn TargetStore, worker: &WorkerKey, kind: Option<TargetKind>) -> anyhow::Result<()> {
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => TargetKind::ALL.to_vec(),
    };
    for kind in kinds {
        match store.read(worker, kind) {
            Some(target) => {
                println!("── {kind} ──");
                println!("{}", serde_json::to_string_pretty(&target)?);
            }
            None => println!("── {kind} ── (none)"),
        }
    }
    Ok(())
}

/// One line per worker: identity, pending command and reported status.
pub fn list(store: &dyn TargetStore, domain: Option<&str>) -> anyhow::Result<()> {
    let domains = match domain {
        Some(domain) => vec![domain.to_string()],
        None => store.list_domains()?,
    };
    let mut count = 0;
    for domain in domains {
        for worker in store.list_domain_workers(&domain)? {
            println!("{}", describe(store, &worker));
            count += 1;
        }
    }
    if count == 0 {
        println!("no workers");
    }
    Ok(())
}

fn describe(store: &dyn TargetStore, worker: &WorkerKey) -> String {
    let pending = store
        .read(worker, TargetKind::UserTarget)
        .and_then(|t| t.user_cmd)
        .map_or_else(|| "-".to_string(), |cmd| cmd.to_string());
    let status = store
        .read(worker, TargetKind::Heartbeat)
        .map_or_else(|| "-".to_string(), |hb| format!("{:?}", hb.reported_status()).to_lowercase());
    let stopped = store
        .read(worker, TargetKind::FinalTarget)
        .is_some_and(|f| f.status == hape_core::WorkerStatus::Stopped);
    format!(
        "{:<40} pending={:<13} status={}{}",
        worker.to_string(),
        pending,
        status,
        if stopped { " (stopped)" } else { "" }
    )
}

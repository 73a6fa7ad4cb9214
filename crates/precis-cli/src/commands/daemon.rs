use std::path::Path;
use std::sync::Arc;

use crate::commands::common::open_service;
use crate::error::CliError;
use crate::scheduler::{run_schedule, DaemonScheduler};

/// Run background sync until interrupted.
pub async fn run_daemon(db_path: &Path) -> Result<(), CliError> {
    let (scheduler, period) = DaemonScheduler::new();
    let service = open_service(db_path, Arc::new(scheduler))?;

    if !service.session().is_logged_in {
        return Err(precis_core::SyncError::NotLoggedIn.into());
    }

    service.reconcile_schedule();
    service.trigger_sync();
    println!("Background sync running; press Ctrl-C to stop");

    tokio::select! {
        () = run_schedule(service.clone(), period) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Stopping background sync");
        }
    }
    Ok(())
}

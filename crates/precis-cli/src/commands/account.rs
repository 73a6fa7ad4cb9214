use std::path::Path;
use std::sync::Arc;

use precis_core::sync::{CommandReply, NoopScheduler};
use precis_core::{SyncCommand, SyncOutcome};

use crate::commands::common::{format_outcome_lines, format_status_lines, open_service};
use crate::error::CliError;

pub async fn run_login(db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;

    if let CommandReply::LoggedIn(profile) = service.handle(SyncCommand::Login).await? {
        let account = profile
            .as_ref()
            .and_then(|profile| profile.email.as_deref())
            .unwrap_or("(unknown account)");
        println!("Signed in as {account}");
    }

    // The queued first cycle would not outlive this process.
    if let CommandReply::Synced(outcome) = service.handle(SyncCommand::SyncNow).await? {
        print_outcome(&outcome);
    }
    Ok(())
}

pub async fn run_logout(revoke: bool, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;
    service.handle(SyncCommand::Logout { revoke }).await?;
    println!("Signed out");
    Ok(())
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;
    let CommandReply::Status(status) = service.handle(SyncCommand::Status).await? else {
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp_millis();
    for line in format_status_lines(&status, now) {
        println!("{line}");
    }
    Ok(())
}

pub fn print_outcome(outcome: &SyncOutcome) {
    for line in format_outcome_lines(outcome) {
        println!("{line}");
    }
}

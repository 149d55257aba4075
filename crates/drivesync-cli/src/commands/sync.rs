use crate::commands::common::{open_sync_service, report_sync_result, CliContext};
use crate::error::CliError;

pub async fn run_init(folder: Option<&str>, context: &CliContext) -> Result<(), CliError> {
    let service = open_sync_service(context)?;
    report_sync_result(service.initialize_sync(folder).await)
}

pub async fn run_sync(context: &CliContext) -> Result<(), CliError> {
    let service = open_sync_service(context)?;
    report_sync_result(service.sync_now().await)
}

pub async fn run_touch(context: &CliContext) -> Result<(), CliError> {
    let service = open_sync_service(context)?;
    report_sync_result(service.sync_after_local_change().await)
}

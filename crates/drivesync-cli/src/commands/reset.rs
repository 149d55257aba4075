use crate::commands::common::{open_state_store, CliContext};
use crate::error::CliError;

pub fn run_reset(keep_device: bool, context: &CliContext) -> Result<(), CliError> {
    let store = open_state_store(context)?;

    if keep_device {
        store.clear_sync_metadata()?;
        println!("Sync state cleared; device identity kept. Run `drivesync init` to reconnect.");
    } else {
        store.clear_all()?;
        println!("Sync state and device identity cleared.");
    }
    Ok(())
}

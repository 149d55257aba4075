use crate::commands::common::{open_state_store, CliContext};
use crate::error::CliError;

pub fn run_device_name(new_name: Option<&str>, context: &CliContext) -> Result<(), CliError> {
    let store = open_state_store(context)?;

    match new_name {
        Some(name) => {
            store.set_device_name(name)?;
            println!("Device renamed to {}", store.device_name()?);
        }
        None => println!("{}", store.device_name()?),
    }
    Ok(())
}

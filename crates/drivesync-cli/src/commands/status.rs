use crate::commands::common::{format_status_lines, open_state_store, status_item, CliContext};
use crate::error::CliError;

pub fn run_status(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let store = open_state_store(context)?;
    let item = status_item(&store, &context.config.local_path)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        for line in format_status_lines(&item) {
            println!("{line}");
        }
    }
    Ok(())
}

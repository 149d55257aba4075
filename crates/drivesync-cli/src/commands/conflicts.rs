use crate::commands::common::{
    conflict_files, conflict_to_item, format_conflict_lines, open_state_store, CliContext,
    ConflictItem,
};
use crate::error::CliError;

pub fn run_conflicts(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let store = open_state_store(context)?;
    let conflicts = conflict_files(store.sync_metadata()?);

    if as_json {
        let json_items = conflicts
            .iter()
            .map(|conflict| conflict_to_item(conflict, &context.config.local_path))
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflict copies recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    println!("Review each copy, merge what you need, then delete it.");
    Ok(())
}

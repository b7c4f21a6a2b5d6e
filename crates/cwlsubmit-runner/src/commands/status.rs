use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use cwlsubmit_core::model::{RecordState, WorkRecord};

use crate::{cli::StatusArgs, commands::AppContext, error::CliError};

fn state_color(state: RecordState) -> Color {
    match state {
        RecordState::Complete | RecordState::Final => Color::Green,
        RecordState::Cancelled | RecordState::Failed => Color::Red,
        RecordState::Running | RecordState::Locked => Color::Yellow,
        _ => Color::Reset,
    }
}

fn records_table(records: &[WorkRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            ["UUID", "Name", "State", "Exit code", "Output"]
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );

    for record in records {
        table.add_row(vec![
            Cell::new(&record.uuid).fg(Color::Yellow),
            Cell::new(record.name.as_deref().unwrap_or("-")),
            Cell::new(record.state.to_string()).fg(state_color(record.state)),
            Cell::new(
                record
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(record.output.as_deref().unwrap_or("-")),
        ]);
    }
    table
}

pub fn handle_status(args: StatusArgs, context: &AppContext<'_>) -> Result<(), CliError> {
    let record = context.client.get_record(&args.uuid)?;
    let mut records = vec![record.clone()];
    if let Some(container_uuid) = &record.container_uuid {
        records.push(context.client.get_record(container_uuid)?);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("{}", records_table(&records));
    }
    Ok(())
}

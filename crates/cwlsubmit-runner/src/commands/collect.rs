use colored::Colorize;
use cwlsubmit_client::{
    runner::{handle_completion, ProcessEntry, ProcessTable},
    submission::tracking_uuid,
    targets::infixes,
};
use cwlsubmit_core::model::{ProcessStatus, WorkApi};

use crate::{cli::CollectArgs, commands::AppContext, error::CliError};

pub fn handle_collect(args: CollectArgs, context: &AppContext<'_>) -> Result<(), CliError> {
    let record = context
        .client
        .get_final_record(&args.uuid)?
        .ok_or_else(|| CliError::NotFinished(args.uuid.clone()))?;

    let work_api = if record.uuid.split('-').nth(1) == Some(infixes::JOB) {
        WorkApi::Jobs
    } else {
        WorkApi::Containers
    };
    let mut processes = ProcessTable::new();
    processes.insert(
        tracking_uuid(&record),
        ProcessEntry {
            name: record.name.clone().unwrap_or_else(|| args.uuid.clone()),
            work_api,
        },
    );

    let mut collected = None;
    let status = handle_completion(
        context.client.cluster(),
        &record,
        &mut processes,
        &mut |outputs, _| collected = outputs,
    );

    println!("- {} finished: {}", record.uuid, status.to_string().bold());
    match &collected {
        Some(outputs) => println!("{}", serde_json::to_string_pretty(outputs)?),
        None => println!("{}", "No output object could be read.".yellow()),
    }

    if status == ProcessStatus::Success {
        Ok(())
    } else {
        Err(CliError::WorkflowFailed {
            uuid: record.uuid,
            status,
        })
    }
}

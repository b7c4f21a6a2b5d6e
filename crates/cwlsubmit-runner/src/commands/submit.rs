use colored::Colorize;
use cwlsubmit_client::{
    inputs::{empty_job_order, load_job_order},
    ClientEvent, RunnerOptions, SubmitOptions,
};
use cwlsubmit_core::model::{ProcessStatus, RecordState};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread;
use std::time::Duration;

use crate::{cli::SubmitArgs, commands::AppContext, error::CliError};

fn runner_options(args: &SubmitArgs, context: &AppContext<'_>) -> RunnerOptions {
    let mut options = RunnerOptions::from_config(&context.config.submit);
    if let Some(api) = args.work_api {
        options.work_api = api;
    }
    options.name = args.name.clone();
    options.project_uuid = args.project_uuid.clone();
    if let Some(priority) = args.priority {
        options.priority = priority;
    }
    options.enable_reuse = !args.disable_reuse;
    if let Some(on_error) = args.on_error {
        options.on_error = on_error;
    }
    options.debug = context.debug;
    options.output_name = args.output_name.clone();
    options.output_tags = args.output_tags.clone();
    options.storage_classes = args.storage_classes.clone();
    if let Some(ttl) = args.intermediate_output_ttl {
        options.intermediate_output_ttl = ttl;
    }
    options.trash_intermediate = args.trash_intermediate;
    if let Some(ram) = args.submit_runner_ram {
        options.runner_ram_mb = ram;
    }
    if let Some(cache) = args.collection_cache_size {
        options.collection_cache_mb = cache;
    }
    if let Some(image) = &args.submit_runner_image {
        options.runner_image = image.clone();
    }
    if let Some(timeout) = args.eval_timeout {
        options.eval_timeout = timeout;
    }
    if let Some(threads) = args.thread_count {
        options.thread_count = threads;
    }
    options
}

fn status_label(status: ProcessStatus) -> colored::ColoredString {
    match status {
        ProcessStatus::Success => status.to_string().green().bold(),
        ProcessStatus::UnsupportedRequirement => status.to_string().yellow().bold(),
        ProcessStatus::PermanentFail => status.to_string().red().bold(),
    }
}

fn state_label(state: RecordState) -> colored::ColoredString {
    match state {
        RecordState::Complete => state.to_string().green(),
        RecordState::Cancelled | RecordState::Failed => state.to_string().red(),
        RecordState::Running | RecordState::Locked => state.to_string().yellow(),
        _ => state.to_string().normal(),
    }
}

pub fn handle_submit(args: SubmitArgs, context: &AppContext<'_>) -> Result<(), CliError> {
    let options = runner_options(&args, context);
    let job_order = match &args.job_order {
        Some(path) => load_job_order(path)?,
        None => empty_job_order(),
    };
    let mut runner = context
        .client
        .load_runner(&args.workflow, job_order, options.enable_reuse)?;

    println!(
        "- Submitting '{}' using the {} API...",
        runner.name.cyan(),
        options.work_api.to_string().cyan()
    );

    let wait = !args.no_wait;
    let stop = Arc::new(AtomicBool::new(false));
    if wait {
        let flag = stop.clone();
        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        });
    }

    let (tx, rx) = mpsc::channel();
    let client = context.client.clone();
    let submit_options = SubmitOptions {
        runner: options,
        wait,
        poll_interval: Duration::from_secs(context.config.submit.poll_interval_secs.max(1)),
        event_sender: Some(tx),
        stop: Some(stop.clone()),
    };
    let submission_thread = thread::spawn(move || client.submit(&mut runner, submit_options));

    let mut spinner: Option<ProgressBar> = None;
    for event in rx {
        match event {
            ClientEvent::UploadingDependencies { name } => {
                println!("- Uploading dependencies of '{}'...", name);
            }
            ClientEvent::BuildingRequest { work_api } => {
                tracing::debug!("Building {} request", work_api);
            }
            ClientEvent::Submitted { uuid, work_api } => {
                println!("  {} {} ({})", "Submitted".green().bold(), uuid, work_api);
                if wait {
                    let pb = ProgressBar::new_spinner();
                    pb.set_style(
                        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    pb.enable_steady_tick(Duration::from_millis(120));
                    pb.set_message(format!("Waiting for {} (Ctrl-C stops waiting)", uuid));
                    spinner = Some(pb);
                }
            }
            ClientEvent::StateChanged { uuid, state } => {
                if let Some(pb) = spinner.as_ref() {
                    pb.set_message(format!("{} is {}", uuid, state_label(state)));
                } else {
                    println!("  {} is {}", uuid, state_label(state));
                }
            }
            ClientEvent::Finished { uuid, status } => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                println!("- {} finished: {}", uuid, status_label(status));
            }
        }
    }
    if let Some(pb) = spinner.take() {
        pb.finish_and_clear();
    }

    let outcome = submission_thread
        .join()
        .map_err(|_| CliError::ExecutionFailed {
            message: "Submission thread panicked".to_string(),
            log_summary: "see the session log for details".to_string(),
        })??;

    if stop.load(Ordering::SeqCst) && outcome.status.is_none() {
        println!(
            "- Stopped waiting. {} keeps running on the cluster.",
            outcome.uuid
        );
    }

    if let Some(outputs) = &outcome.outputs {
        println!("{}", serde_json::to_string_pretty(outputs)?);
    }

    match outcome.status {
        Some(ProcessStatus::Success) | None => Ok(()),
        Some(status) => Err(CliError::WorkflowFailed {
            uuid: outcome.uuid,
            status,
        }),
    }
}

use clap::{Args, Parser, Subcommand};
use cwlsubmit_core::model::{OnError, WorkApi};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cwl-submit",
    author,
    version,
    about = "Submit CWL workflows to a compute cluster.",
    long_about = "Uploads a workflow's local dependencies to cluster storage, rewrites its references \
                  and submits a runner container (or legacy job) that executes it on the cluster."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,

    #[arg(
        long,
        global = true,
        help = "Print debug logging to stderr and run the workflow runner in debug mode"
    )]
    pub debug: bool,

    #[arg(
        long,
        global = true,
        help = "Root directory of the local cluster. Overrides config.toml."
    )]
    pub base_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Upload a workflow with its inputs and submit it")]
    Submit(SubmitArgs),
    #[command(about = "Show the state of submitted work")]
    Status(StatusArgs),
    #[command(about = "Collect the output object of finished work")]
    Collect(CollectArgs),
}

#[derive(Args)]
pub struct SubmitArgs {
    #[arg(value_name = "WORKFLOW", help = "Workflow file or storage address")]
    pub workflow: String,

    #[arg(value_name = "JOB_ORDER", help = "YAML or JSON file with the workflow inputs")]
    pub job_order: Option<PathBuf>,

    #[arg(long = "api", value_name = "API", help = "Work API to use: 'containers' or 'jobs'")]
    pub work_api: Option<WorkApi>,

    #[arg(long, help = "Name for the submitted work (defaults to the workflow file name)")]
    pub name: Option<String>,

    #[arg(long, help = "Project that owns uploaded collections and submitted work")]
    pub project_uuid: Option<String>,

    #[arg(long, help = "Scheduling priority of the runner container")]
    pub priority: Option<u32>,

    #[arg(long, help = "Never reuse results of earlier identical work")]
    pub disable_reuse: bool,

    #[arg(long, value_name = "POLICY", help = "What the runner does when a step fails: 'stop' or 'continue'")]
    pub on_error: Option<OnError>,

    #[arg(long, help = "Name of the final output collection")]
    pub output_name: Option<String>,

    #[arg(long, help = "Comma-separated tags for the final output collection")]
    pub output_tags: Option<String>,

    #[arg(long, help = "Storage classes for intermediate and final outputs")]
    pub storage_classes: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Trash intermediate outputs this many seconds after the run (0 keeps them)"
    )]
    pub intermediate_output_ttl: Option<u64>,

    #[arg(long, help = "Trash intermediate outputs as soon as the workflow finishes")]
    pub trash_intermediate: bool,

    #[arg(long, value_name = "MB", help = "RAM for the workflow runner")]
    pub submit_runner_ram: Option<u64>,

    #[arg(long, value_name = "MB", help = "Collection cache size for the workflow runner")]
    pub collection_cache_size: Option<u64>,

    #[arg(long, value_name = "IMAGE", help = "Container image for the workflow runner")]
    pub submit_runner_image: Option<String>,

    #[arg(long, value_name = "SECONDS", help = "Time limit for evaluating expressions")]
    pub eval_timeout: Option<u64>,

    #[arg(long, help = "Number of threads the workflow runner uses")]
    pub thread_count: Option<u32>,

    #[arg(long, help = "Exit after submitting instead of waiting for completion")]
    pub no_wait: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(help = "UUID of a container request, container or job")]
    pub uuid: String,

    #[arg(long, help = "Print the raw records as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct CollectArgs {
    #[arg(help = "UUID of a finished container request, container or job")]
    pub uuid: String,
}

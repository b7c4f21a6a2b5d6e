use clap::Parser;
use colored::Colorize;
use cwlsubmit_runner::cli::Cli;

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cwlsubmit_runner::run(cli) {
        eprintln!("{}", format!("[ERROR] {}", e).red());
        std::process::exit(e.exit_code());
    }
}

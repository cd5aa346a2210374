use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "scan-operator")]
#[command(about = "Runs ScanRequests as Kubernetes Jobs and CronJobs", long_about = None)]
#[command(version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Watch ScanRequests and reconcile them until interrupted
	Run(commands::run::RunArgs),

	/// Print the ScanRequest CustomResourceDefinition
	Crd(commands::crd::CrdArgs),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	match cli.command {
		Commands::Run(args) => commands::run::run(args),
		Commands::Crd(args) => commands::crd::run(args, std::io::stdout()),
	}
}

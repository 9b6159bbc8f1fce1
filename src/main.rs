use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, ValueEnum};
use serde::Serialize;

use corral::config::ClusterConfig;
use corral::protocol::{JobDetail, WorkerDetail};
use corral::scheduler::{CommandJob, EchoJob, Job, JobStrategy};
use corral::shutdown::install_shutdown_handler;
use corral::worker::spawn_local_workers;
use corral::{Manager, ManagerClient, Worker};

#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(version)]
#[command(about = "A minimal cluster manager with heartbeat-tracked workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a manager, plus in-process workers unless --workers is 0
    Manager(ManagerArgs),

    /// Run a single worker against a remote manager
    Worker(WorkerArgs),

    /// Worker registry commands
    Workers {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkersCommands,
    },

    /// Job commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Process Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ManagerArgs {
    /// Address to bind the registration and API listeners to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// Bootstrap registration port; worker ports are allocated above it
    #[arg(long, default_value = "4000")]
    port: u16,

    /// API port
    #[arg(long, default_value = "3999")]
    api_port: u16,

    /// Number of in-process workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Seconds without a heartbeat before a worker counts as dead
    #[arg(long, default_value = "5")]
    dead_threshold: u64,

    /// Log verbosity, 0 (errors) to 3 (debug). RUST_LOG overrides it.
    #[arg(long, default_value = "3")]
    log_level: u8,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Manager address
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    manager: IpAddr,

    /// Manager registration port
    #[arg(long, default_value = "4000")]
    port: u16,

    /// Log verbosity, 0 (errors) to 3 (debug). RUST_LOG overrides it.
    #[arg(long, default_value = "3")]
    log_level: u8,
}

// =============================================================================
// Client Arguments (shared by workers and job commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Manager API address
    #[arg(long, short = 'a', default_value = "127.0.0.1:3999")]
    addr: SocketAddr,

    /// Seconds to wait for a reply
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum WorkersCommands {
    /// List every registered worker
    List,
    /// Show one worker
    Show {
        /// Worker name, e.g. worker-1
        name: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Dispatch a job immediately and print its id
    Run(JobArgs),
    /// Queue a job for the manager's next dispatch pass
    Queue(JobArgs),
    /// Get status of a dispatched job
    Status {
        /// The job id
        job_id: u64,
    },
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false, id = "kind")]
struct JobKind {
    /// Print a line of text on the targeted workers
    #[arg(long)]
    echo: Option<String>,

    /// Run a shell command on the targeted workers
    #[arg(long)]
    command: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct JobArgs {
    /// Run on every live worker or on one random live worker
    #[arg(long, default_value = "one")]
    strategy: StrategyArg,

    #[command(flatten)]
    kind: JobKind,
}

#[derive(Debug, Clone, ValueEnum)]
enum StrategyArg {
    All,
    One,
}

impl JobArgs {
    fn into_job(self) -> Result<Job, Box<dyn std::error::Error>> {
        let strategy = match self.strategy {
            StrategyArg::All => JobStrategy::RunOnAll,
            StrategyArg::One => JobStrategy::RunOnOne,
        };
        match (self.kind.echo, self.kind.command) {
            (Some(line), None) => Ok(EchoJob::new(strategy, line).into()),
            (None, Some(command)) => Ok(CommandJob::new(strategy, command).into()),
            _ => Err("exactly one of --echo or --command is required".into()),
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobRunOutput {
    dispatched: bool,
    job: Option<JobDetail>,
}

#[derive(Serialize)]
struct JobQueueOutput {
    queued: bool,
}

// =============================================================================
// Process Implementation
// =============================================================================

fn init_logging(config: &ClusterConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .init();
}

async fn run_manager(args: ManagerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClusterConfig::new(args.bind, args.port, args.api_port)
        .with_worker_count(args.workers)
        .with_dead_threshold(Duration::from_secs(args.dead_threshold))
        .with_log_level(args.log_level);
    init_logging(&config);

    let manager = Manager::bind(config.clone()).await?;
    let shutdown = install_shutdown_handler()?;

    tracing::info!(
        bind = %config.bind_addr,
        registration_port = config.registration_port,
        api_port = config.api_port,
        workers = config.worker_count,
        "Starting corral manager"
    );

    let workers = spawn_local_workers(&config, shutdown.clone());
    manager.run(shutdown).await?;
    workers.await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClusterConfig {
        bind_addr: args.manager,
        registration_port: args.port,
        ..ClusterConfig::default()
    }
    .with_log_level(args.log_level);
    init_logging(&config);

    let shutdown = install_shutdown_handler()?;
    let worker = Worker::register(&config).await?;
    worker.run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn print_workers_table(workers: &[WorkerDetail]) {
    if workers.is_empty() {
        println!("No workers registered.");
        return;
    }
    println!("{:<16} {:<8} LAST HEARTBEAT", "NAME", "PORT");
    println!("{}", "-".repeat(56));
    for worker in workers {
        println!(
            "{:<16} {:<8} {}",
            worker.name,
            worker.assigned_port,
            worker.last_heartbeat.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        );
    }
}

async fn handle_workers(
    client: &ManagerClient,
    command: WorkersCommands,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers = match command {
        WorkersCommands::List => client.all_worker_details().await?,
        WorkersCommands::Show { name } => match client.worker_detail(&name).await? {
            Some(detail) => vec![detail],
            None => return Err(format!("Worker not found: {}", name).into()),
        },
    };

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&workers)?),
        OutputFormat::Table => print_workers_table(&workers),
    }
    Ok(())
}

async fn handle_job(
    client: &ManagerClient,
    command: JobCommands,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        JobCommands::Run(job) => {
            let detail = client.execute_job(&job.into_job()?).await?;
            match output_format {
                OutputFormat::Json => {
                    let output = JobRunOutput {
                        dispatched: detail.is_some(),
                        job: detail,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Table => println!("{}", run_summary(detail.as_ref())),
            }
        }
        JobCommands::Queue(job) => {
            client.queue_job(&job.into_job()?).await?;
            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&JobQueueOutput { queued: true })?)
                }
                OutputFormat::Table => println!("Job queued."),
            }
        }
        JobCommands::Status { job_id } => {
            let detail = client.job_status(job_id).await?;
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&detail)?),
                OutputFormat::Table => match detail {
                    Some(detail) => {
                        let status = if detail.is_complete { "COMPLETE" } else { "RUNNING" };
                        println!("Job ID: {}", detail.job_id);
                        println!("Status: {}", status);
                    }
                    None => return Err(format!("Job not found: {}", job_id).into()),
                },
            }
        }
    }
    Ok(())
}

/// Table output for `job run`. A job without a detail was either dropped or
/// put back on the queue for a later iteration.
fn run_summary(detail: Option<&JobDetail>) -> String {
    match detail {
        Some(detail) => format!("Job dispatched!\nJob ID: {}", detail.job_id),
        None => "Job not dispatched now; it was dropped or requeued.".to_string(),
    }
}

async fn connect(args: &ClientArgs) -> Result<ManagerClient, Box<dyn std::error::Error>> {
    Ok(ManagerClient::connect(args.addr, Duration::from_secs(args.timeout)).await?)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Manager(manager_args) => {
            run_manager(manager_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Workers { client, command } => {
            let manager = connect(&client).await?;
            handle_workers(&manager, command, &client.output).await?;
        }
        Commands::Job { client, command } => {
            let manager = connect(&client).await?;
            handle_job(&manager, command, &client.output).await?;
        }
    }

    Ok(())
}

use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `simworker` binary.
///
/// One worker instance is started per port in
/// `start_port .. start_port + num_workers`. Each instance keeps its own
/// broker registry and can serve any number of brokers concurrently.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "simworker",
    version,
    about = "Simulation workers serving one or more brokers"
)]
pub struct CliArgs {
    /// Interface the worker instances bind to.
    ///
    /// Environment variable: `WORKER_HOST`
    #[arg(long, env = "WORKER_HOST", default_value_t = String::from("127.0.0.1"))]
    pub host: String,

    /// First port to listen on.
    ///
    /// Environment variable: `WORKER_START_PORT`
    #[arg(long, env = "WORKER_START_PORT", default_value_t = 6000)]
    pub start_port: u16,

    /// Number of worker instances (one per consecutive port).
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 10)]
    pub num_workers: u16,

    /// Deadline, in seconds, for pushing one result back to its broker.
    ///
    /// The push includes the broker's relay to the search service, so this
    /// bounds how long a `Simulate` call can stay blocked on delivery.
    ///
    /// Environment variable: `PUSH_TIMEOUT_SECS`
    #[arg(long, env = "PUSH_TIMEOUT_SECS", default_value_t = 60)]
    pub push_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub host: String,
    pub ports: Vec<u16>,
    pub push_timeout: Duration,
}

impl TryFrom<CliArgs> for WorkerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        let last_port = u32::from(args.start_port) + u32::from(args.num_workers) - 1;
        if last_port > u32::from(u16::MAX) {
            bail!(
                "Port range {}..={} exceeds {}",
                args.start_port,
                last_port,
                u16::MAX
            );
        }

        if args.push_timeout_secs == 0 {
            bail!("PUSH_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            host: args.host,
            ports: (args.start_port..=last_port as u16).collect(),
            push_timeout: Duration::from_secs(args.push_timeout_secs),
        })
    }
}

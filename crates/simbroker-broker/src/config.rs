use crate::search::SearchEndpoint;
use anyhow::bail;
use clap::{Args, Parser, ValueEnum};
use core::time::Duration;
use simbroker_core::{proto, types::BrokerId};
use std::path::PathBuf;

/// Kind of search the job runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum JobKind {
    #[default]
    #[value(name = "MONTECARLO")]
    MonteCarlo,
    #[value(name = "GRID")]
    Grid,
    #[value(name = "STRESSTEST")]
    StressTest,
    #[value(name = "RISK")]
    Risk,
}

impl From<JobKind> for proto::JobType {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::MonteCarlo => Self::MonteCarlo,
            JobKind::Grid => Self::Grid,
            JobKind::StressTest => Self::StressTest,
            JobKind::Risk => Self::Risk,
        }
    }
}

/// Connection options for the search service, shared by every binary that
/// talks to it.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// PEM encoded CA certificate that signs the search service's
    /// certificate.
    ///
    /// Environment variable: `SSL_CERT`
    #[arg(long, env = "SSL_CERT", default_value = "server.crt")]
    pub ssl_cert: PathBuf,

    /// Search service host name. Also used as the TLS server name.
    ///
    /// Environment variable: `SERVER_URL`
    #[arg(long, env = "SERVER_URL", default_value_t = String::from("localhost"))]
    pub server_url: String,

    /// Search service port.
    ///
    /// Environment variable: `SERVER_PORT`
    #[arg(long, env = "SERVER_PORT", default_value_t = 443)]
    pub server_port: u16,

    /// Talk to the search service over plaintext. For local testing only.
    ///
    /// Environment variable: `SEARCH_INSECURE`
    #[arg(long, env = "SEARCH_INSECURE", default_value_t = false)]
    pub insecure: bool,
}

impl SearchArgs {
    fn endpoint(self, timeout: Duration) -> anyhow::Result<SearchEndpoint> {
        if self.server_url.trim().is_empty() {
            bail!("SERVER_URL must not be empty");
        }
        Ok(SearchEndpoint {
            host: self.server_url,
            port: self.server_port,
            ca_cert: self.ssl_cert,
            insecure: self.insecure,
            timeout,
        })
    }
}

/// Runtime configuration for the `simbroker` binary.
///
/// The broker listens for pushed results on `host:port`, dispatches to
/// `num_workers` workers on consecutive ports starting at
/// `worker_port_start`, and runs one job against the search service.
///
/// Several brokers may share the same workers, but each needs its own port:
/// the advertised address is how workers tell brokers apart.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "simbroker",
    version,
    about = "Streams a search job's simulations to a pool of workers"
)]
pub struct CliArgs {
    /// Port the broker listens on for results pushed by workers. Must be
    /// unique per broker.
    ///
    /// Environment variable: `BROKER_PORT`
    #[arg(long, env = "BROKER_PORT")]
    pub port: u16,

    /// Interface the broker binds to.
    ///
    /// Environment variable: `BROKER_HOST`
    #[arg(long, env = "BROKER_HOST", default_value_t = String::from("127.0.0.1"))]
    pub host: String,

    /// Host workers use to reach this broker. Defaults to `--host`.
    ///
    /// Environment variable: `BROKER_ADVERTISE_HOST`
    #[arg(long, env = "BROKER_ADVERTISE_HOST")]
    pub advertise_host: Option<String>,

    /// Host the workers listen on.
    ///
    /// Environment variable: `WORKER_HOST`
    #[arg(long, env = "WORKER_HOST", default_value_t = String::from("127.0.0.1"))]
    pub worker_host: String,

    /// Port of the first worker.
    ///
    /// Environment variable: `WORKER_PORT_START`
    #[arg(long, env = "WORKER_PORT_START", default_value_t = 6000)]
    pub worker_port_start: u16,

    /// Number of workers, on consecutive ports.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 10)]
    pub num_workers: u16,

    #[command(flatten)]
    pub search: SearchArgs,

    /// Event threshold (gamma) for the search.
    ///
    /// Environment variable: `THRESHOLD`
    #[arg(long, env = "THRESHOLD", default_value_t = 2.0)]
    pub threshold: f64,

    /// Number of simulations to run.
    ///
    /// Environment variable: `NUM_EVALS`
    #[arg(long, env = "NUM_EVALS", default_value_t = 100)]
    pub num_evals: u64,

    /// Grid density per dimension, used by GRID jobs.
    #[arg(long, num_args = 1.., default_values_t = [10, 10])]
    pub grid_density: Vec<u32>,

    /// Job type.
    ///
    /// Environment variable: `JOB_TYPE`
    #[arg(long, env = "JOB_TYPE", value_enum, ignore_case = true, default_value_t = JobKind::MonteCarlo)]
    pub job_type: JobKind,

    /// Dimension of the parameter space. Every dimension is Gaussian.
    ///
    /// Environment variable: `DIMENSION`
    #[arg(long, env = "DIMENSION", default_value_t = 2)]
    pub dimension: u32,

    /// Deadline, in seconds, for one simulate call (including the worker's
    /// push and the relay) and for search service calls. A simulate call that
    /// exceeds it fails its task.
    ///
    /// Environment variable: `CALL_TIMEOUT_SECS`
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value_t = 120)]
    pub call_timeout_secs: u64,

    /// How long, in seconds, to wait for in-flight simulations after the task
    /// stream ends and before fetching the job result.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Seed for the load balancer. Defaults to the broker port.
    ///
    /// Environment variable: `BALANCER_SEED`
    #[arg(long, env = "BALANCER_SEED")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the broker server binds to.
    pub bind_addr: String,
    /// Address workers push results to.
    pub broker_id: BrokerId,
    pub worker_addrs: Vec<String>,
    pub search: SearchEndpoint,
    pub job: proto::JobRequest,
    pub call_timeout: Duration,
    pub drain_timeout: Duration,
    pub seed: u64,
}

impl TryFrom<CliArgs> for BrokerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.port == 0 {
            bail!("BROKER_PORT must be a fixed port; workers dial it back");
        }

        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        let last_port =
            u32::from(args.worker_port_start) + u32::from(args.num_workers) - 1;
        if last_port > u32::from(u16::MAX) {
            bail!(
                "Worker port range {}..={} exceeds {}",
                args.worker_port_start,
                last_port,
                u16::MAX
            );
        }

        if args.call_timeout_secs == 0 {
            bail!("CALL_TIMEOUT_SECS must be greater than 0");
        }

        if args.drain_timeout_secs == 0 {
            bail!("DRAIN_TIMEOUT_SECS must be greater than 0");
        }

        if args.dimension == 0 {
            bail!("DIMENSION must be greater than 0");
        }

        if !args.threshold.is_finite() {
            bail!("THRESHOLD must be a finite number");
        }

        let advertise_host = args.advertise_host.unwrap_or_else(|| args.host.clone());
        let call_timeout = Duration::from_secs(args.call_timeout_secs);

        Ok(Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            broker_id: BrokerId::new(format!("{advertise_host}:{}", args.port)),
            worker_addrs: (args.worker_port_start..=last_port as u16)
                .map(|port| format!("{}:{port}", args.worker_host))
                .collect(),
            search: args.search.endpoint(call_timeout)?,
            job: proto::JobRequest {
                threshold: args.threshold,
                dimension: args.dimension,
                dist_types: vec![proto::Distribution::Gaussian as i32; args.dimension as usize],
                job_type: proto::JobType::from(args.job_type) as i32,
                job_mode: proto::JobMode::Maximize as i32,
                num_evals: args.num_evals,
                grid_density: args.grid_density,
            },
            call_timeout,
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
            seed: args.seed.unwrap_or(u64::from(args.port)),
        })
    }
}

/// Runtime configuration for the `simbroker-kill` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "simbroker-kill",
    version,
    about = "Terminates a running search job"
)]
pub struct KillArgs {
    /// Job to terminate, as printed by `simbroker` at job start.
    #[arg(long)]
    pub job_id: u64,

    #[command(flatten)]
    pub search: SearchArgs,

    /// Deadline, in seconds, for connecting and for the kill call.
    ///
    /// Environment variable: `CALL_TIMEOUT_SECS`
    #[arg(long, env = "CALL_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct KillConfig {
    pub job_id: u64,
    pub search: SearchEndpoint,
}

impl TryFrom<KillArgs> for KillConfig {
    type Error = anyhow::Error;

    fn try_from(args: KillArgs) -> Result<Self, Self::Error> {
        if args.timeout_secs == 0 {
            bail!("CALL_TIMEOUT_SECS must be greater than 0");
        }
        Ok(Self {
            job_id: args.job_id,
            search: args.search.endpoint(Duration::from_secs(args.timeout_secs))?,
        })
    }
}

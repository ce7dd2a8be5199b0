use anyhow::Result;
use clap::{ArgAction, Parser};
use std::io::IsTerminal;
use std::time::Duration;
use task_bootstrap::env::EnvSnapshot;
use task_bootstrap::resolve::Resolver;
use task_bootstrap::{parse_host_list, run_stages, task_ip, BootstrapConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Prepares a task container before its workload starts: waits for DNS,
/// renders config templates and installs the cluster CA certificate.
#[derive(Parser, Debug)]
#[command(name = "task-bootstrap", version, about, long_about = None)]
struct Args {
    /// Extra logging of resolution attempts
    #[arg(long)]
    verbose: bool,

    /// Whether to print the process environment
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    print_env: bool,

    /// Print the environment including ALL THE SENSITIVE KEYS (diagnostics only)
    #[arg(long)]
    insecure: bool,

    /// Whether to wait for hosts to resolve before continuing
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    resolve: bool,

    /// Whether to verify that the task DNS name resolves to the task IP
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    self_resolve: bool,

    /// Comma-separated hosts to resolve [default: <TASK_NAME>.<FRAMEWORK_HOST>]
    #[arg(long, value_name = "HOSTS")]
    resolve_hosts: Option<String>,

    /// How long to wait for all hosts to resolve, or 0 to wait indefinitely
    #[arg(long, env = "BOOTSTRAP_RESOLVE_TIMEOUT", default_value = "5m", value_parser = parse_timeout)]
    resolve_timeout: Duration,

    /// Whether to render the config templates advertised by CONFIG_TEMPLATE_* envvars
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    template: bool,

    /// Largest template file that may be processed, or 0 for no limit
    #[arg(long, env = "BOOTSTRAP_TEMPLATE_MAX_BYTES", default_value_t = 1024 * 1024)]
    template_max_bytes: u64,

    /// Whether to install the cluster CA certificate into the JRE trust store
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    install_certs: bool,

    /// Print the task IP and exit
    #[arg(long)]
    get_task_ip: bool,
}

impl Args {
    fn config(&self) -> BootstrapConfig {
        BootstrapConfig {
            print_env: self.print_env,
            print_env_insecure: self.insecure,
            resolve: self.resolve,
            resolve_hosts: self.resolve_hosts.as_deref().map(parse_host_list),
            resolve_timeout: self.resolve_timeout,
            self_resolve: self.self_resolve,
            template: self.template,
            template_max_bytes: self.template_max_bytes,
            install_certs: self.install_certs,
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, humantime::DurationError> {
    if raw.trim() == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(raw)
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: Args) -> Result<()> {
    let ip = task_ip::discover_container_ip(&EnvSnapshot::capture())?;
    task_ip::publish_container_ip(ip);

    if args.get_task_ip {
        print!("{}", ip);
        return Ok(());
    }

    let env = EnvSnapshot::capture();
    let resolver = Resolver::system();
    let mut diag = std::io::stderr().lock();
    run_stages(&args.config(), &env, ip, &resolver, &mut diag)
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

pub mod certs;
pub mod env;
pub mod resolve;
pub mod task_ip;
pub mod template;

use anyhow::{Context, Result};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::certs::CertInstaller;
use crate::env::{EnvSnapshot, SANDBOX_DIR};
use crate::resolve::{Lookup, Resolver};
use crate::template::DEFAULT_TEMPLATE_MAX_BYTES;

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Which stages run and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub print_env: bool,
    pub print_env_insecure: bool,
    pub resolve: bool,
    /// Hosts to wait for; `None` means the task's own DNS name.
    pub resolve_hosts: Option<Vec<String>>,
    /// Zero waits indefinitely.
    pub resolve_timeout: Duration,
    pub self_resolve: bool,
    pub template: bool,
    /// Zero means no limit.
    pub template_max_bytes: u64,
    pub install_certs: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            print_env: true,
            print_env_insecure: false,
            resolve: true,
            resolve_hosts: None,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            self_resolve: true,
            template: true,
            template_max_bytes: DEFAULT_TEMPLATE_MAX_BYTES,
            install_certs: true,
        }
    }
}

/// Splits a comma-separated host list, dropping blank entries.
pub fn parse_host_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn print_env(env: &EnvSnapshot, insecure: bool) {
    info!(
        "Bootstrapping with environment:\n{}",
        env.display_lines(insecure).join("\n")
    );
}

/// Prints the environment before a task-identity failure, unless the run
/// already printed it up front.
fn print_env_for_failure(cfg: &BootstrapConfig, env: &EnvSnapshot) {
    if !cfg.print_env {
        print_env(env, cfg.print_env_insecure);
    }
}

/// The hosts the resolve stage waits for.
pub fn effective_hosts(cfg: &BootstrapConfig, env: &EnvSnapshot) -> Result<Vec<String>> {
    if let Some(hosts) = &cfg.resolve_hosts {
        return Ok(hosts.clone());
    }
    match env.task_host() {
        Some(host) => Ok(vec![host]),
        None => {
            print_env_for_failure(cfg, env);
            anyhow::bail!(
                "Missing required envvar(s) to build default --resolve-hosts value. \
                 Either specify --resolve-hosts or provide these envvars: TASK_NAME, FRAMEWORK_HOST."
            )
        }
    }
}

/// Runs the enabled stages in order: resolve, templates, certificates.
/// The first failure stops the run.
pub fn run_stages<L: Lookup, W: Write>(
    cfg: &BootstrapConfig,
    env: &EnvSnapshot,
    task_ip: IpAddr,
    resolver: &Resolver<L>,
    diag: &mut W,
) -> Result<()> {
    if cfg.print_env {
        print_env(env, cfg.print_env_insecure);
    }

    if cfg.resolve {
        let hosts = effective_hosts(cfg, env)?;
        resolver
            .wait_for_hosts(&hosts, cfg.resolve_timeout)
            .context("host resolution failed")?;

        if cfg.self_resolve {
            let task_host = env.task_host();
            if task_host.is_none() {
                print_env_for_failure(cfg, env);
            }
            resolver
                .verify_self(task_host.as_deref(), task_ip, cfg.resolve_timeout)
                .context("self resolution failed")?;
        }
    } else {
        info!("Resolve disabled via --resolve=false: Skipping host resolution");
    }

    if cfg.template {
        let sandbox = env.get(SANDBOX_DIR).map(Path::new);
        template::render_all(env, sandbox, cfg.template_max_bytes, diag)
            .context("template rendering failed")?;
    } else {
        info!("Template handling disabled via --template=false: Skipping any config templates");
    }

    if cfg.install_certs {
        CertInstaller::from_env(env).install();
    }

    info!("Bootstrap successful.");
    Ok(())
}

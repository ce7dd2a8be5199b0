use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::env::{EnvSnapshot, JAVA_HOME, SANDBOX_DIR};

const CERT_ALIAS: &str = "dcoscert";
const STORE_PASS: &str = "changeit";

/// Result of the best-effort trust-store install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertOutcome {
    Installed { cert: PathBuf },
    Skipped { reason: String },
    Failed { reason: String },
}

/// Imports the cluster CA certificate from `$MESOS_SANDBOX/.ssl` into the
/// JRE trust store under `$JAVA_HOME`.
#[derive(Debug, Clone)]
pub struct CertInstaller {
    sandbox: PathBuf,
    java_home: Option<PathBuf>,
}

impl CertInstaller {
    pub fn new(sandbox: impl Into<PathBuf>, java_home: Option<PathBuf>) -> Self {
        Self {
            sandbox: sandbox.into(),
            java_home,
        }
    }

    pub fn from_env(env: &EnvSnapshot) -> Self {
        Self::new(
            env.get(SANDBOX_DIR).unwrap_or_default(),
            env.get(JAVA_HOME)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        )
    }

    /// `ca-bundle.crt` from newer clusters, else `ca.crt` from older ones.
    pub fn find_cert(&self) -> Result<PathBuf, String> {
        let ssl_dir = self.sandbox.join(".ssl");
        if !ssl_dir.is_dir() {
            return Err(format!(
                "No $MESOS_SANDBOX/.ssl directory found at {}. Cannot install certificate.",
                ssl_dir.display()
            ));
        }

        for name in ["ca-bundle.crt", "ca.crt"] {
            let candidate = ssl_dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
            info!("No $MESOS_SANDBOX/.ssl/{} file found.", name);
        }

        Err("No CA Cert found in the sandbox. Cannot install certificate. \
             This is expected if the cluster is not in STRICT mode."
            .to_string())
    }

    pub fn install(&self) -> CertOutcome {
        let cert = match self.find_cert() {
            Ok(cert) => cert,
            Err(reason) => return skipped(reason),
        };

        let java_home = match &self.java_home {
            Some(dir) => dir,
            None => return skipped("No JAVA_HOME provided. Cannot install certs.".to_string()),
        };

        let mut command = keytool_command(java_home, &cert);
        match command.output() {
            Ok(output) if output.status.success() => {
                info!("Successfully installed the certificate.");
                CertOutcome::Installed { cert }
            }
            Ok(output) => failed(format!(
                "keytool exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => failed(format!("could not run keytool: {}", e)),
        }
    }
}

fn keytool_command(java_home: &Path, cert: &Path) -> Command {
    let mut command = Command::new(java_home.join("bin").join("keytool"));
    command
        .arg("-importcert")
        .arg("-noprompt")
        .args(["-alias", CERT_ALIAS])
        .arg("-keystore")
        .arg(java_home.join("lib").join("security").join("cacerts"))
        .arg("-file")
        .arg(cert)
        .args(["-storepass", STORE_PASS]);
    command
}

fn skipped(reason: String) -> CertOutcome {
    info!("{}", reason);
    CertOutcome::Skipped { reason }
}

fn failed(reason: String) -> CertOutcome {
    warn!("Failed to install the certificate. Error: {}", reason);
    CertOutcome::Failed { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn no_ssl_dir_is_skipped() {
        let sandbox = TempDir::new().unwrap();
        let installer = CertInstaller::new(sandbox.path(), Some(PathBuf::from("/opt/jre")));
        assert!(matches!(installer.install(), CertOutcome::Skipped { .. }));
    }

    #[test]
    fn bundle_preferred_over_legacy_cert() {
        let sandbox = TempDir::new().unwrap();
        let ssl = sandbox.path().join(".ssl");
        fs::create_dir(&ssl).unwrap();
        fs::write(ssl.join("ca.crt"), "legacy").unwrap();
        let installer = CertInstaller::new(sandbox.path(), None);
        assert_eq!(installer.find_cert().unwrap(), ssl.join("ca.crt"));

        fs::write(ssl.join("ca-bundle.crt"), "bundle").unwrap();
        assert_eq!(installer.find_cert().unwrap(), ssl.join("ca-bundle.crt"));
    }

    #[test]
    fn missing_java_home_is_skipped() {
        let sandbox = TempDir::new().unwrap();
        let ssl = sandbox.path().join(".ssl");
        fs::create_dir(&ssl).unwrap();
        fs::write(ssl.join("ca.crt"), "legacy").unwrap();

        let env = EnvSnapshot::from_pairs([(SANDBOX_DIR, sandbox.path().to_str().unwrap())]);
        match CertInstaller::from_env(&env).install() {
            CertOutcome::Skipped { reason } => assert!(reason.contains("JAVA_HOME")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn missing_keytool_fails_softly() {
        let sandbox = TempDir::new().unwrap();
        let ssl = sandbox.path().join(".ssl");
        fs::create_dir(&ssl).unwrap();
        fs::write(ssl.join("ca-bundle.crt"), "bundle").unwrap();
        let java_home = TempDir::new().unwrap();

        let installer = CertInstaller::new(sandbox.path(), Some(java_home.path().to_path_buf()));
        assert!(matches!(installer.install(), CertOutcome::Failed { .. }));
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn keytool_receives_import_arguments() {
        use std::os::unix::fs::PermissionsExt;

        let sandbox = TempDir::new().unwrap();
        let ssl = sandbox.path().join(".ssl");
        fs::create_dir(&ssl).unwrap();
        fs::write(ssl.join("ca-bundle.crt"), "bundle").unwrap();

        let java_home = TempDir::new().unwrap();
        let bin = java_home.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let args_file = java_home.path().join("args.txt");
        let script = format!("#!/bin/sh\necho \"$@\" > '{}'\n", args_file.display());
        let keytool = bin.join("keytool");
        fs::write(&keytool, script).unwrap();
        fs::set_permissions(&keytool, fs::Permissions::from_mode(0o755)).unwrap();

        let installer = CertInstaller::new(sandbox.path(), Some(java_home.path().to_path_buf()));
        assert_eq!(
            installer.install(),
            CertOutcome::Installed {
                cert: ssl.join("ca-bundle.crt")
            }
        );

        let args = fs::read_to_string(&args_file).unwrap();
        let expected = format!(
            "-importcert -noprompt -alias dcoscert -keystore {} -file {} -storepass changeit",
            java_home.path().join("lib/security/cacerts").display(),
            ssl.join("ca-bundle.crt").display()
        );
        assert_eq!(args.trim_end(), expected);
    }
}

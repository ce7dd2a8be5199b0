use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub const TASK_NAME: &str = "TASK_NAME";
pub const FRAMEWORK_HOST: &str = "FRAMEWORK_HOST";
pub const SANDBOX_DIR: &str = "MESOS_SANDBOX";
pub const JAVA_HOME: &str = "JAVA_HOME";

const HIDDEN_VALUE: &str = "********";

static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(DCOS_SERVICE_ACCOUNT_CREDENTIAL|credential|password|secret|token)")
        .expect("sensitive key pattern is valid")
});

/// Immutable copy of the process environment, taken once at startup.
///
/// Every stage reads from the snapshot it is handed instead of the live
/// process environment, so stages can be exercised with synthetic input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Reads the current process environment. Entries that are not valid
    /// UTF-8 are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key starts with `prefix`, in sorted key order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.iter().filter(move |(k, _)| k.starts_with(prefix))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The task's own DNS name, `<TASK_NAME>.<FRAMEWORK_HOST>`, when both are set.
    pub fn task_host(&self) -> Option<String> {
        let task_name = self.get(TASK_NAME)?;
        let framework_host = self.get(FRAMEWORK_HOST)?;
        Some(format!("{}.{}", task_name, framework_host))
    }

    /// Sorted `KEY=VALUE` lines for logging. Values of credential-like keys
    /// are masked unless `insecure` is set.
    pub fn display_lines(&self, insecure: bool) -> Vec<String> {
        self.vars
            .iter()
            .map(|(k, v)| {
                if !insecure && SENSITIVE_KEY.is_match(k) {
                    format!("{}={}", k, HIDDEN_VALUE)
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_host_requires_both_parts() {
        let env = EnvSnapshot::from_pairs([(TASK_NAME, "svc"), (FRAMEWORK_HOST, "example.com")]);
        assert_eq!(env.task_host().as_deref(), Some("svc.example.com"));

        let env = EnvSnapshot::from_pairs([(TASK_NAME, "svc")]);
        assert_eq!(env.task_host(), None);

        let env = EnvSnapshot::from_pairs([(FRAMEWORK_HOST, "example.com")]);
        assert_eq!(env.task_host(), None);
    }

    #[test]
    fn display_lines_masks_credentials() {
        let env = EnvSnapshot::from_pairs([
            ("DB_PASSWORD", "hunter2"),
            ("api_token", "abc"),
            ("DCOS_SERVICE_ACCOUNT_CREDENTIAL", "{}"),
            ("PORT0", "8080"),
        ]);

        let lines = env.display_lines(false);
        assert_eq!(
            lines,
            vec![
                "DB_PASSWORD=********",
                "DCOS_SERVICE_ACCOUNT_CREDENTIAL=********",
                "PORT0=8080",
                "api_token=********",
            ]
        );

        let lines = env.display_lines(true);
        assert!(lines.contains(&"DB_PASSWORD=hunter2".to_string()));
    }

    #[test]
    fn with_prefix_is_sorted() {
        let env = EnvSnapshot::from_pairs([
            ("CONFIG_TEMPLATE_B", "b"),
            ("OTHER", "x"),
            ("CONFIG_TEMPLATE_A", "a"),
        ]);
        let keys: Vec<&str> = env.with_prefix("CONFIG_TEMPLATE_").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["CONFIG_TEMPLATE_A", "CONFIG_TEMPLATE_B"]);
    }
}

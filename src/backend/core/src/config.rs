//! Configuration management.
//!
//! The runtime settings of the scheduling core plus the jobs document
//! contract consumed by hosts: each entry names a job, what it runs
//! (an `exec` command string or a `command` argv), when (`schedule`), and
//! its policies (timeout, output capture, notification toggles).

use std::time::Duration;

use serde::Deserialize;

use crate::jobs::HistoryRetention;

/// Environment variable overriding the timer wakeup granularity.
pub const ENV_HEARTBEAT_INTERVAL: &str = "CRON_HEARTBEAT_INTERVAL";

/// Default timer wakeup granularity. Affects only how promptly a driver
/// loop notices its deadline, not scheduling semantics.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Resolve the heartbeat interval from the environment, falling back to the
/// default. Unparseable values are ignored.
pub fn heartbeat_interval_from_env() -> Duration {
    std::env::var(ENV_HEARTBEAT_INTERVAL)
        .ok()
        .and_then(|raw| humantime::parse_duration(&raw).ok())
        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL)
}

/// Main scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Timer wakeup granularity for every driver loop.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// History retention bounds applied to every job.
    #[serde(default)]
    pub history: HistoryRetention,

    /// The jobs to load.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            history: HistoryRetention::default(),
            jobs: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from `TEMPO`-prefixed environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TEMPO").separator("__"))
            .build()?;

        let mut cfg: Config = config.try_deserialize()?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("TEMPO").separator("__"))
            .build()?;

        let mut cfg: Config = config.try_deserialize()?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_HEARTBEAT_INTERVAL) {
            if let Ok(interval) = humantime::parse_duration(&raw) {
                self.heartbeat_interval = interval;
            }
        }
    }
}

/// One job entry in the configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// The job name; must be unique.
    #[serde(default)]
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// A command string, split on (quoted) whitespace.
    #[serde(default)]
    pub exec: Option<String>,

    /// An argv; used when `exec` is unset.
    #[serde(default)]
    pub command: Vec<String>,

    /// A textual schedule (`@every 5m`, cron expression, mnemonic).
    #[serde(default)]
    pub schedule: Option<String>,

    /// Per-invocation timeout.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Discard invocation output instead of capturing it.
    #[serde(default)]
    pub discard_output: bool,

    /// Notify when an invocation starts.
    #[serde(default)]
    pub notify_on_start: Option<bool>,

    /// Notify on any success.
    #[serde(default)]
    pub notify_on_success: Option<bool>,

    /// Notify on any failure.
    #[serde(default)]
    pub notify_on_failure: Option<bool>,

    /// Notify on a success-to-failure transition.
    #[serde(default)]
    pub notify_on_broken: Option<bool>,

    /// Notify on a failure-to-success transition.
    #[serde(default)]
    pub notify_on_fixed: Option<bool>,

    /// Notify when the job is enabled.
    #[serde(default)]
    pub notify_on_enabled: Option<bool>,

    /// Notify when the job is disabled.
    #[serde(default)]
    pub notify_on_disabled: Option<bool>,
}

impl JobConfig {
    /// The command to run: `exec` split on quoted whitespace, else the
    /// `command` argv.
    pub fn resolved_command(&self) -> Vec<String> {
        match &self.exec {
            Some(exec) if !exec.trim().is_empty() => split_space_quoted(exec),
            _ => self.command.clone(),
        }
    }

    pub fn notify_on_start_or_default(&self) -> bool {
        self.notify_on_start.unwrap_or(false)
    }

    pub fn notify_on_success_or_default(&self) -> bool {
        self.notify_on_success.unwrap_or(false)
    }

    pub fn notify_on_failure_or_default(&self) -> bool {
        self.notify_on_failure.unwrap_or(false)
    }

    pub fn notify_on_broken_or_default(&self) -> bool {
        self.notify_on_broken.unwrap_or(true)
    }

    pub fn notify_on_fixed_or_default(&self) -> bool {
        self.notify_on_fixed.unwrap_or(true)
    }

    pub fn notify_on_enabled_or_default(&self) -> bool {
        self.notify_on_enabled.unwrap_or(true)
    }

    pub fn notify_on_disabled_or_default(&self) -> bool {
        self.notify_on_disabled.unwrap_or(true)
    }
}

/// Split a command string on whitespace, honoring single and double quotes.
pub fn split_space_quoted(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut part = String::new();
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    part.push(c);
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !part.is_empty() {
                        parts.push(std::mem::take(&mut part));
                    }
                }
                c => part.push(c),
            },
        }
    }
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(cfg.history.max_count, 10);
        assert!(cfg.jobs.is_empty());
    }

    #[test]
    fn test_job_config_deserialization() {
        let yaml = r#"
heartbeat_interval: 100ms
history:
  max_count: 5
  max_age: 1h
jobs:
  - name: backup
    description: nightly backup
    exec: pg_dump --file /tmp/backup.sql
    schedule: "0 0 2 * * *"
    timeout: 10m
    discardOutput: true
    notifyOnFailure: true
"#;
        let cfg = config_from_yaml(yaml);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(cfg.history.max_count, 5);
        assert_eq!(cfg.jobs.len(), 1);

        let job = &cfg.jobs[0];
        assert_eq!(job.name, "backup");
        assert_eq!(job.timeout, Some(Duration::from_secs(600)));
        assert!(job.discard_output);
        assert!(job.notify_on_failure_or_default());
        assert!(job.notify_on_broken_or_default());
        assert!(!job.notify_on_start_or_default());
        assert_eq!(
            job.resolved_command(),
            vec!["pg_dump", "--file", "/tmp/backup.sql"]
        );
    }

    // Route YAML through the config crate's format support so tests stay on
    // the same parser hosts use.
    fn config_from_yaml(yaml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tempo.yml");
        std::fs::write(
            &path,
            "jobs:\n  - name: sweep\n    exec: find /tmp -mtime +7 -delete\n    schedule: \"@daily\"\n",
        )
        .unwrap();

        let cfg = Config::from_file(&path.to_string_lossy()).unwrap();
        assert_eq!(cfg.jobs.len(), 1);
        assert_eq!(cfg.jobs[0].name, "sweep");
        assert_eq!(cfg.jobs[0].schedule.as_deref(), Some("@daily"));
    }

    #[test]
    fn test_split_space_quoted() {
        assert_eq!(split_space_quoted("echo hello"), vec!["echo", "hello"]);
        assert_eq!(
            split_space_quoted(r#"sh -c "sleep 1 && echo done""#),
            vec!["sh", "-c", "sleep 1 && echo done"]
        );
        assert_eq!(
            split_space_quoted("grep 'two words' file.txt"),
            vec!["grep", "two words", "file.txt"]
        );
        assert!(split_space_quoted("   ").is_empty());
    }

    #[test]
    fn test_resolved_command_prefers_exec() {
        let job = JobConfig {
            exec: Some("ls -la".into()),
            command: vec!["ignored".into()],
            ..Default::default()
        };
        assert_eq!(job.resolved_command(), vec!["ls", "-la"]);

        let argv_only = JobConfig {
            command: vec!["echo".into(), "hi".into()],
            ..Default::default()
        };
        assert_eq!(argv_only.resolved_command(), vec!["echo", "hi"]);
    }
}

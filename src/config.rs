//! Server process configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_init_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_warmup() -> Duration {
    Duration::from_secs(2)
}

fn default_init_attempts() -> u32 {
    3
}

fn default_init_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

/// How to spawn and drive one MCP server process.
///
/// The executable, arguments and credential file paths are opaque to the
/// control plane; it only checks that the paths exist before spawning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to spawn
    pub command: PathBuf,
    /// Command-line arguments, passed through verbatim
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the child
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Files that must exist before spawning (credentials, account lists)
    #[serde(default)]
    pub required_files: Vec<PathBuf>,
    /// Pause between spawn and the first handshake attempt
    #[serde(default = "default_warmup", with = "humantime_serde")]
    pub warmup: Duration,
    /// Deadline for a regular call
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Deadline for one `initialize` attempt
    #[serde(default = "default_init_timeout", with = "humantime_serde")]
    pub init_timeout: Duration,
    /// Total `initialize` attempts before giving up
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,
    /// Base delay between handshake attempts; attempt k waits k times this
    #[serde(default = "default_init_backoff", with = "humantime_serde")]
    pub init_backoff: Duration,
    /// How long `stop` waits for a voluntary exit before killing
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
}

impl ServerConfig {
    /// Create a config for `command` with every knob at its default.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            required_files: Vec::new(),
            warmup: default_warmup(),
            request_timeout: default_request_timeout(),
            init_timeout: default_init_timeout(),
            init_attempts: default_init_attempts(),
            init_backoff: default_init_backoff(),
            stop_grace: default_stop_grace(),
        }
    }

    /// Append one argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the child's working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Register a file that must exist before spawning, and pass it to the
    /// child as `--<flag> <path>`.
    pub fn with_credential_file(mut self, flag: &str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.args.push(format!("--{}", flag));
        self.args.push(path.display().to_string());
        self.required_files.push(path);
        self
    }

    /// Set the warm-up pause.
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Set the per-call deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per-attempt handshake deadline.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Set the total number of handshake attempts.
    pub fn with_init_attempts(mut self, attempts: u32) -> Self {
        self.init_attempts = attempts.max(1);
        self
    }

    /// Set the handshake backoff base.
    pub fn with_init_backoff(mut self, backoff: Duration) -> Self {
        self.init_backoff = backoff;
        self
    }

    /// Set the shutdown grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Widen the warm-up pause for production cold starts.
    ///
    /// Container platforms routinely need several seconds before the child
    /// accepts its first line.
    pub fn production(mut self) -> Self {
        self.warmup = Duration::from_secs(5);
        self
    }
}

//! Launch command derivation for the decoding engine.
//!
//! `CommandBuilder::build` is a pure function of the settings snapshot: the
//! same `Configuration` always yields the same `LaunchSpec`. Invalid values
//! are not validated here; the engine reports its own errors on its
//! diagnostic stream.

use std::collections::BTreeMap;

use crate::config::{BrokerSettings, Configuration};

/// Executable name used when none is configured.
pub const DEFAULT_ENGINE: &str = "rtl_433";

/// Everything needed to spawn one engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable name or path.
    pub program: String,
    /// Ordered command-line tokens (excluding the program).
    pub args: Vec<String>,
    /// Variables set for the child on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Render the command line for logging, with broker passwords masked.
    pub fn redacted(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| redact_password(arg)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn redact_password(arg: &str) -> String {
    arg.split(',')
        .map(|part| {
            if part.starts_with("pass=") {
                "pass=***"
            } else {
                part
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds `LaunchSpec`s for a fixed program and environment.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
    env: BTreeMap<String, String>,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE)
    }
}

impl CommandBuilder {
    /// Create a builder for the given engine executable with an empty
    /// environment.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            env: BTreeMap::new(),
        }
    }

    /// Set the environment snapshot handed to every launched engine.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// The engine executable.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Derive the launch specification for one engine instance.
    pub fn build(&self, config: &Configuration) -> LaunchSpec {
        let mut args: Vec<String> = Vec::new();
        let mut push = |flag: &str, value: &str| {
            args.push(flag.to_string());
            args.push(value.to_string());
        };

        push("-d", &normalize_device(config.device()));
        push("-f", config.frequency());
        push("-g", config.gain());
        push("-F", "log");
        push("-F", "json");
        push("-M", "level");
        push("-M", "metadata");
        push("-M", "time:iso8601");
        push("-s", config.sample_rate());

        if config.auto_level() {
            push("-Y", "autolevel");
            push("-Y", "squelch");
        }

        if config.noise_reporting() {
            push("-M", "noise");
        }

        if let Some(broker) = config.broker() {
            push("-F", &network_output(&broker));
        }

        for filter in protocol_filters(config.protocols(), config.starred_protocols()) {
            push("-R", &filter);
        }

        LaunchSpec {
            program: self.program.clone(),
            args,
            env: self.env.clone(),
        }
    }
}

/// Add the `:` serial marker to a device selector that is missing it.
///
/// Values of two characters or fewer, values already starting with `:` and
/// purely numeric indexes are returned unchanged, so applying this twice is
/// the same as applying it once.
pub fn normalize_device(device: &str) -> String {
    let is_index = !device.is_empty() && device.chars().all(|c| c.is_ascii_digit());
    if device.chars().count() > 2 && !device.starts_with(':') && !is_index {
        format!(":{device}")
    } else {
        device.to_string()
    }
}

/// Network output destination for the engine's own broker publishing.
fn network_output(broker: &BrokerSettings) -> String {
    let mut dest = format!("mqtt://{}:{}", broker.host, broker.port);
    if let Some(user) = &broker.user {
        dest.push_str(&format!(",user={user}"));
    }
    if let Some(password) = &broker.password {
        dest.push_str(&format!(",pass={password}"));
    }
    dest.push_str(&format!(",retain=0,events={}", broker.topic));
    dest
}

/// Protocol filter directives.
///
/// - `all` selects every protocol.
/// - empty or `none` selects every protocol only when starred protocols are
///   enabled, otherwise leaves the engine defaults.
/// - anything else is a comma-separated list, one directive per entry.
fn protocol_filters(protocols: &str, starred: bool) -> Vec<String> {
    let cleaned = protocols.trim().to_lowercase();
    match cleaned.as_str() {
        "all" => vec!["all".to_string()],
        "" | "none" => {
            if starred {
                vec!["all".to_string()]
            } else {
                Vec::new()
            }
        }
        _ => protocols
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
    }
}

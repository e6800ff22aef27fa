// SPDX-License-Identifier: MIT OR Apache-2.0
//! Launch option validation and normalization for Launchpad.
//!
//! Options arrive loosely typed (a TOML table, a JSON object, or just the
//! service path as a string). [`validate`] applies defaults, checks every rule,
//! and produces an immutable [`LaunchConfig`]. Nothing is spawned here; a
//! [`LaunchConfig`] value is proof that validation passed.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod coverage;
pub mod signal;

pub use coverage::{CoverageWrap, with_extension};
pub use signal::{TermSignal, UnknownSignal};

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while loading or validating launch options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A validation rule failed. Only the first failing rule is reported.
    #[error("{message}")]
    Invalid {
        /// One-line description of the failed rule.
        reason: String,
        /// Full multi-line message: usage summary followed by `reason`.
        message: String,
        /// The raw options as they were handed in.
        options: Value,
    },

    /// The requested options file does not exist or cannot be read.
    #[error("options file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The options file is not valid TOML.
    #[error("failed to parse options: {reason}")]
    ParseError {
        /// Parser error detail.
        reason: String,
    },
}

impl ConfigError {
    /// The failed rule (for `Invalid`) or the error text otherwise.
    pub fn reason(&self) -> String {
        match self {
            Self::Invalid { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Raw options that failed validation, when available.
    pub fn options(&self) -> Option<&Value> {
        match self {
            Self::Invalid { options, .. } => Some(options),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default suite title.
pub const DEFAULT_TITLE: &str = "end-to-end";
/// Default capture file.
pub const DEFAULT_LOG_PATH: &str = "./e2e.log";
/// Default readiness marker.
pub const DEFAULT_READY_NOTICE: &str = "listening on port";
/// Default start timeout relayed to the test runner, in milliseconds.
pub const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;
/// Default slow threshold relayed to the test runner, in milliseconds.
pub const DEFAULT_SLOW_MS: u64 = 5_000;
/// Default wait between escalation stages, in milliseconds.
pub const DEFAULT_TERM_TIMEOUT_MS: u64 = 3_000;
/// Default coverage tool script.
pub const DEFAULT_COVER_SVC: &str = "./node_modules/istanbul/lib/cli";
/// Default coverage tool arguments.
pub const DEFAULT_COVER_ARGS: &[&str] = &["cover", "--dir", "./coverage/e2e-test", "--handle-sigint"];
/// Default implied script extension.
pub const DEFAULT_SCRIPT_EXT: &str = "js";

/// Presence of this variable switches argument construction to coverage mode.
pub const COVERAGE_ENV_VAR: &str = "COVER";
/// Presence of this variable means the service runs elsewhere and must not be launched.
pub const EXTERNAL_TARGET_ENV_VAR: &str = "SUT";

// ---------------------------------------------------------------------------
// Launch mode
// ---------------------------------------------------------------------------

/// How the argument vector is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run the service directly (through its interpreter, if any).
    #[default]
    Direct,
    /// Run the coverage tool, which in turn runs the service.
    Coverage,
}

impl LaunchMode {
    /// `Coverage` when [`COVERAGE_ENV_VAR`] is set, `Direct` otherwise.
    pub fn from_env() -> Self {
        if std::env::var_os(COVERAGE_ENV_VAR).is_some() {
            Self::Coverage
        } else {
            Self::Direct
        }
    }
}

/// Value of [`EXTERNAL_TARGET_ENV_VAR`], when the service under test is external.
pub fn external_target() -> Option<String> {
    std::env::var(EXTERNAL_TARGET_ENV_VAR).ok()
}

// ---------------------------------------------------------------------------
// LaunchConfig
// ---------------------------------------------------------------------------

/// A fully validated launch descriptor.
///
/// Only [`validate`] and [`validate_with`] construct this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchConfig {
    title: String,
    command: String,
    resolved_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    interpreter: Option<String>,
    program: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    log_path: PathBuf,
    ready_notice: String,
    #[serde(with = "duration_millis")]
    start_timeout: Duration,
    #[serde(with = "duration_millis")]
    slow: Duration,
    term_signal: TermSignal,
    #[serde(with = "duration_millis")]
    term_timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    term_message: Option<Value>,
    coverage: bool,
}

impl LaunchConfig {
    /// Suite title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Service path exactly as it was configured.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Service path as found on disk (possibly with the implied extension).
    pub fn resolved_command(&self) -> &str {
        &self.resolved_command
    }

    /// Interpreter used to run the service, if any.
    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// Program that is actually executed.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Final argument vector passed to [`program`](Self::program).
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Absolute working directory of the service.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Variables layered over the inherited environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Capture file for stdout and stderr.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Substring of stdout that marks the service as ready.
    pub fn ready_notice(&self) -> &str {
        &self.ready_notice
    }

    /// Advisory start timeout for the test runner.
    pub fn start_timeout(&self) -> Duration {
        self.start_timeout
    }

    /// Advisory slow threshold for the test runner.
    pub fn slow(&self) -> Duration {
        self.slow
    }

    /// Soft signal sent during termination.
    pub fn term_signal(&self) -> TermSignal {
        self.term_signal
    }

    /// Wait between escalation stages.
    pub fn term_timeout(&self) -> Duration {
        self.term_timeout
    }

    /// Payload delivered on the control channel before signalling.
    pub fn term_message(&self) -> Option<&Value> {
        self.term_message.as_ref()
    }

    /// Whether the coverage rewrite was applied.
    pub fn coverage(&self) -> bool {
        self.coverage
    }

    /// The invoked command line, space separated.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Serde helper for `Duration` as integer milliseconds.
mod duration_millis {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        u64::try_from(val.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(ser)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read raw options from a TOML file.
pub fn load_options(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.display().to_string(),
    })?;
    parse_toml(&content)
}

/// Parse raw options from a TOML string.
pub fn parse_toml(content: &str) -> Result<Value, ConfigError> {
    toml::from_str::<Value>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate raw options, taking the launch mode from the environment.
pub fn validate(raw: &Value) -> Result<LaunchConfig, ConfigError> {
    validate_with(raw, LaunchMode::from_env())
}

/// Validate raw options with an explicit launch mode.
///
/// A string is shorthand for `{ svc = <string> }`. Defaults are applied to
/// every missing key, then the rules run in a fixed order and the first
/// failure is returned.
pub fn validate_with(raw: &Value, mode: LaunchMode) -> Result<LaunchConfig, ConfigError> {
    let mut opts = defaults();
    match raw {
        Value::Object(map) => opts.extend(map.clone()),
        Value::Null => {}
        other => {
            opts.insert("svc".into(), other.clone());
        }
    }
    let fail = |reason: String| Err(invalid(reason, raw));

    if !is_truthy(opts.get("svc")) {
        return fail("options.svc is not provided".into());
    }
    let Some(svc) = opts.get("svc").and_then(Value::as_str) else {
        return fail("options.svc must be a string".into());
    };
    let Some(cwd) = opts.get("cwd").and_then(Value::as_str) else {
        return fail("options.cwd must be a string".into());
    };
    let cwd_path = match std::fs::canonicalize(cwd) {
        Ok(p) if p.is_dir() => p,
        _ => return fail(format!("{cwd} is not found on disk")),
    };
    let Some(script_ext) = opts.get("script_ext").and_then(Value::as_str) else {
        return fail("options.script_ext, when provided - must be a string".into());
    };
    let Some(resolved_command) = resolve_command(&cwd_path, svc, script_ext) else {
        return fail(format!("{svc} is not found on disk"));
    };
    let Some(log_path) = non_empty_str(opts.get("log_path")) else {
        return fail("options.log_path is expected to be a path".into());
    };
    let Some(ready_notice) = non_empty_str(opts.get("ready_notice")) else {
        return fail("options.ready_notice must be a string".into());
    };
    let Some(args) = opts.get("args").and_then(Value::as_array) else {
        return fail("options.args must be an array".into());
    };
    let Some(args) = string_array(args) else {
        return fail("options.args must be an array of strings".into());
    };
    let Some(start_timeout) = opts.get("timeout").and_then(Value::as_f64) else {
        return fail("options.timeout must be a number".into());
    };
    let Some(slow) = opts.get("slow").and_then(Value::as_f64) else {
        return fail("options.slow must be a number".into());
    };
    let env = match opts.get("env") {
        Some(Value::Object(map)) => {
            let mut env = BTreeMap::new();
            for (k, v) in map {
                let Some(v) = v.as_str() else {
                    return fail(format!("options.env.{k} must be a string"));
                };
                env.insert(k.clone(), v.to_string());
            }
            env
        }
        v if !is_truthy(v) => BTreeMap::new(),
        _ => return fail("options.env, when provided must be an object".into()),
    };
    let term_timeout = match opts.get("term_timeout").and_then(Value::as_f64) {
        Some(t) if t > 0.0 => t,
        _ => {
            return fail("options.term_timeout, when provided - must be a positive number".into());
        }
    };
    let Some(term_signal) = opts
        .get("term_code")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<TermSignal>().ok())
    else {
        return fail("options.term_code, when provided - must be a valid process signal".into());
    };
    let Some(cover_svc) = opts.get("cover_svc").and_then(Value::as_str) else {
        return fail(
            "options.cover_svc, when provided - must be path to a CLI script, such as a coverage tool"
                .into(),
        );
    };
    let Some(cover_args) = opts
        .get("cover_args")
        .and_then(Value::as_array)
        .and_then(|a| string_array(a))
    else {
        return fail("options.cover_args, when provided - must be an array of CLI arguments".into());
    };
    let Some(cover_ignore) = opts
        .get("cover_ignore")
        .and_then(Value::as_array)
        .and_then(|a| string_array(a))
    else {
        return fail(
            "options.cover_ignore, when provided - must be an array of glob pattern strings"
                .into(),
        );
    };
    let interpreter = match opts.get("interpreter") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => return fail("options.interpreter, when provided - must be a string".into()),
    };
    let Some(title) = opts.get("title").and_then(Value::as_str) else {
        return fail("options.title, when provided - must be a string".into());
    };
    let term_message = match opts.get("term_ipc") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    };

    let (program, args) = match mode {
        LaunchMode::Coverage => {
            let wrap = CoverageWrap {
                cover_svc,
                cover_args: &cover_args,
                cover_ignore: &cover_ignore,
                script_ext,
            };
            let argv = wrap.wrap(svc, &args);
            match &interpreter {
                Some(interp) => (PathBuf::from(interp), argv),
                None => (cwd_path.join(cover_svc), argv[1..].to_vec()),
            }
        }
        LaunchMode::Direct => match &interpreter {
            Some(interp) => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(resolved_command.clone());
                argv.extend(args);
                (PathBuf::from(interp), argv)
            }
            None => (cwd_path.join(&resolved_command), args),
        },
    };

    Ok(LaunchConfig {
        title: title.to_string(),
        command: svc.to_string(),
        resolved_command,
        interpreter,
        program,
        args,
        cwd: cwd_path,
        env,
        log_path: PathBuf::from(log_path),
        ready_notice: ready_notice.to_string(),
        start_timeout: millis(start_timeout),
        slow: millis(slow),
        term_signal,
        term_timeout: millis(term_timeout),
        term_message,
        coverage: mode == LaunchMode::Coverage,
    })
}

fn defaults() -> Map<String, Value> {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".into());
    let mut m = Map::new();
    m.insert("title".into(), DEFAULT_TITLE.into());
    m.insert("cwd".into(), cwd.into());
    m.insert("env".into(), Value::Object(Map::new()));
    m.insert("log_path".into(), DEFAULT_LOG_PATH.into());
    m.insert("ready_notice".into(), DEFAULT_READY_NOTICE.into());
    m.insert("args".into(), Value::Array(Vec::new()));
    m.insert("timeout".into(), DEFAULT_START_TIMEOUT_MS.into());
    m.insert("slow".into(), DEFAULT_SLOW_MS.into());
    m.insert("term_code".into(), TermSignal::default().as_str().into());
    m.insert("term_timeout".into(), DEFAULT_TERM_TIMEOUT_MS.into());
    m.insert("cover_svc".into(), DEFAULT_COVER_SVC.into());
    m.insert(
        "cover_args".into(),
        Value::Array(DEFAULT_COVER_ARGS.iter().map(|s| (*s).into()).collect()),
    );
    m.insert("cover_ignore".into(), Value::Array(Vec::new()));
    m.insert("script_ext".into(), DEFAULT_SCRIPT_EXT.into());
    m
}

fn resolve_command(cwd: &Path, svc: &str, ext: &str) -> Option<String> {
    if cwd.join(svc).exists() {
        return Some(svc.to_string());
    }
    let with_ext = with_extension(svc, ext);
    cwd.join(&with_ext).exists().then_some(with_ext)
}

/// Truthiness of an option value: missing, `null`, `false`, `0`, and `""` are all "not provided".
fn is_truthy(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn string_array(values: &[Value]) -> Option<Vec<String>> {
    values
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn millis(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
}

fn invalid(reason: String, raw: &Value) -> ConfigError {
    let message = [
        "launchpad is expected to be called with valid options".to_string(),
        "valid options should be a table with the following keys".to_string(),
        "(or a string, see svc)".to_string(),
        " - svc - string, mandatory. path to the script that starts the service, relative to cwd."
            .to_string(),
        "   when options is a string it is understood as svc, applying defaults to all the rest"
            .to_string(),
        " - cwd - string, optional. working directory of the service. default: current dir"
            .to_string(),
        " - interpreter - string, optional. program that runs svc (e.g. node, sh)".to_string(),
        format!(" - script_ext - string, optional. implied extension of svc. default: {DEFAULT_SCRIPT_EXT}"),
        format!(" - log_path - string, optional. path to the capture file. default: {DEFAULT_LOG_PATH}"),
        format!(" - timeout - number, optional. start timeout in ms. default: {DEFAULT_START_TIMEOUT_MS}"),
        format!(" - slow - number, optional. slow threshold in ms. default: {DEFAULT_SLOW_MS}"),
        format!(
            " - ready_notice - string, optional. stdout text that marks the service ready. default: {DEFAULT_READY_NOTICE}"
        ),
        " - args - array, optional. arguments appended to the service command".to_string(),
        " - env - table, optional. variables layered over the inherited environment".to_string(),
        format!(
            " - term_code - string, optional. signal sent to stop the service, one of {}. default: {}",
            TermSignal::ALL.map(|s| s.as_str()).join(", "),
            TermSignal::default()
        ),
        " - term_ipc - optional. any value given is sent as a JSON line on the service stdin"
            .to_string(),
        "   before escalating to term_code. when not provided, starts with term_code".to_string(),
        format!(
            " - term_timeout - number, optional. ms between escalations (ipc -> term -> kill). default: {DEFAULT_TERM_TIMEOUT_MS}"
        ),
        format!(" - cover_svc - string, optional. coverage tool that runs svc. default: {DEFAULT_COVER_SVC}"),
        format!(
            " - cover_args - array, optional. arguments of the coverage tool. default: {DEFAULT_COVER_ARGS:?}"
        ),
        " - cover_ignore - array, optional. glob patterns excluded from coverage".to_string(),
        "reason: ".to_string(),
        format!("  {reason}"),
    ]
    .join("\n");
    ConfigError::Invalid {
        reason,
        message,
        options: raw.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

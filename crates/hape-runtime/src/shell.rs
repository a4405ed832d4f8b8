//! Shell runtime — runs `[runtime]` command templates through `sh -c`.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use hape_core::config::{RuntimeConfig, RuntimeKind};
use hape_core::WorkerKey;
use hape_target::{ProcessorInfo, Target};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{RuntimeError, RuntimeResult};
use crate::{container_name, WorkerRuntime};

/// Runtime backed by configurable shell command templates.
pub struct ShellRuntime {
    config: RuntimeConfig,
    dry_run: bool,
    timeout: Option<Duration>,
    /// Where delivered targets are staged for the `deliver` template.
    staging_dir: PathBuf,
}

impl ShellRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        let dry_run = config.kind == RuntimeKind::DryRun;
        let timeout = config.command_timeout();
        Self {
            config,
            dry_run,
            timeout,
            staging_dir: std::env::temp_dir().join("hape-targets"),
        }
    }

    /// Stage delivered targets somewhere other than the system temp dir.
    pub fn with_staging_dir(mut self, dir: PathBuf) -> Self {
        self.staging_dir = dir;
        self
    }

    /// Render `template` for `worker` and run it. Empty templates are no-ops.
    fn run_template(
        &self,
        op: &str,
        template: &str,
        vars: &HashMap<String, String>,
    ) -> RuntimeResult<String> {
        if template.trim().is_empty() {
            debug!(op, "no command configured, skipping");
            return Ok(String::new());
        }
        let command = render(template, vars)?;
        if self.dry_run {
            info!(op, %command, "dry-run");
            return Ok(String::new());
        }
        debug!(op, %command, "running");
        run_shell(&command, self.timeout)
    }
}

impl WorkerRuntime for ShellRuntime {
    fn start_worker(
        &self,
        worker: &WorkerKey,
        host_init: &Map<String, Value>,
        processor: &ProcessorInfo,
    ) -> RuntimeResult<()> {
        let mut vars = base_vars(worker, processor);
        for (key, value) in host_init {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(format!("host_init.{key}"), text);
        }
        self.run_template("start", &self.config.start, &vars)?;
        Ok(())
    }

    fn stop_worker(&self, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeResult<()> {
        self.run_template("stop", &self.config.stop, &base_vars(worker, processor))?;
        Ok(())
    }

    fn remove_worker(&self, worker: &WorkerKey, processor: &ProcessorInfo) -> RuntimeResult<()> {
        self.run_template("remove", &self.config.remove, &base_vars(worker, processor))?;
        Ok(())
    }

    fn worker_execute(
        &self,
        worker: &WorkerKey,
        processor: &ProcessorInfo,
        command: &str,
    ) -> RuntimeResult<String> {
        let mut vars = base_vars(worker, processor);
        vars.insert("command".to_string(), command.to_string());
        self.run_template("execute", &self.config.execute, &vars)
    }

    fn deliver_target(
        &self,
        worker: &WorkerKey,
        processor: &ProcessorInfo,
        target: &Target,
    ) -> RuntimeResult<()> {
        if self.config.deliver.trim().is_empty() {
            return Ok(());
        }
        let path = self
            .staging_dir
            .join(format!("{}-{}-{}-final-target.json", worker.domain, worker.role, worker.worker));
        let spawn_err = |e: String| RuntimeError::Spawn {
            command: "stage target".to_string(),
            reason: e,
        };
        std::fs::create_dir_all(&self.staging_dir).map_err(|e| spawn_err(e.to_string()))?;
        let json = serde_json::to_vec_pretty(target).map_err(|e| spawn_err(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| spawn_err(e.to_string()))?;

        let mut vars = base_vars(worker, processor);
        vars.insert("target_path".to_string(), path.display().to_string());
        self.run_template("deliver", &self.config.deliver, &vars)?;
        Ok(())
    }
}

fn base_vars(worker: &WorkerKey, processor: &ProcessorInfo) -> HashMap<String, String> {
    HashMap::from([
        ("domain".to_string(), worker.domain.clone()),
        ("role".to_string(), worker.role.to_string()),
        ("worker".to_string(), worker.worker.clone()),
        ("container".to_string(), container_name(worker, processor)),
        ("address".to_string(), processor.address.clone()),
        ("image".to_string(), processor.image.clone()),
    ])
}

/// Substitute `{name}` placeholders with their shell-quoted values.
/// Unknown names are an error.
pub fn render(template: &str, vars: &HashMap<String, String>) -> RuntimeResult<String> {
    let invalid = |reason: String| RuntimeError::InvalidTemplate {
        template: template.to_string(),
        reason,
    };
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid("unclosed '{'".to_string()))?;
        let name = &after[..close];
        let value = vars
            .get(name)
            .ok_or_else(|| invalid(format!("unknown placeholder {{{name}}}")))?;
        out.push_str(&shell_quote(value));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Single-quote `s` for `sh`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn run_shell(command: &str, timeout: Option<Duration>) -> RuntimeResult<String> {
    let spawn_err = |e: std::io::Error| RuntimeError::Spawn {
        command: command.to_string(),
        reason: e.to_string(),
    };
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    let Some(limit) = timeout else {
        let output = child.wait_with_output().map_err(spawn_err)?;
        return finish(command, output.status, &output.stdout, &output.stderr);
    };

    // Drain both pipes while polling, or a chatty command blocks on a full pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().map_err(spawn_err)? {
            break status;
        }
        if started.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RuntimeError::Timeout {
                command: command.to_string(),
                limit,
            });
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    finish(command, status, &stdout, &stderr)
}

/// Read a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn finish(command: &str, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> RuntimeResult<String> {
    if status.success() {
        return Ok(String::from_utf8_lossy(stdout).to_string());
    }
    let mut message = String::from_utf8_lossy(stderr).trim().to_string();
    if message.is_empty() {
        // Some runtimes report on stdout only.
        message = String::from_utf8_lossy(stdout).trim().to_string();
    }
    Err(RuntimeError::CommandFailed {
        command: command.to_string(),
        status: status.to_string(),
        stderr: message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hape_core::Role;

    fn worker() -> WorkerKey {
        WorkerKey::new("d1", Role::Searcher, "searcher-0")
    }

    fn processor() -> ProcessorInfo {
        ProcessorInfo {
            address: "10.0.0.5".to_string(),
            container_name: "c-searcher-0".to_string(),
            image: "registry/searcher:1".to_string(),
            ..ProcessorInfo::default()
        }
    }

    fn shell(config: RuntimeConfig) -> ShellRuntime {
        ShellRuntime::new(config)
    }

    #[test]
    fn render_substitutes_placeholders() {
        let vars = base_vars(&worker(), &processor());
        let out = render("docker run --name {container} {image} # {domain}/{role}", &vars).unwrap();
        assert_eq!(
            out,
            "docker run --name 'c-searcher-0' 'registry/searcher:1' # 'd1'/'searcher'"
        );
    }

    #[test]
    fn render_rejects_unknown_and_unclosed() {
        let vars = base_vars(&worker(), &processor());
        assert!(matches!(
            render("echo {nope}", &vars),
            Err(RuntimeError::InvalidTemplate { .. })
        ));
        assert!(render("echo {worker", &vars).is_err());
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("pkill -f x"), "'pkill -f x'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn values_cannot_break_out_of_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("injected");
        let mut processor = processor();
        processor.container_name = format!("c0; touch {}", marker.display());
        let config = RuntimeConfig {
            stop: "echo {container}".to_string(),
            ..RuntimeConfig::default()
        };
        shell(config).stop_worker(&worker(), &processor).unwrap();
        assert!(!marker.exists());
    }

    #[test]
    fn execute_returns_stdout() {
        let config = RuntimeConfig {
            execute: "sh -c {command}".to_string(),
            ..RuntimeConfig::default()
        };
        let out = shell(config)
            .worker_execute(&worker(), &processor(), "echo $((40 + 2))")
            .unwrap();
        assert_eq!(out.trim(), "42");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let config = RuntimeConfig {
            stop: "echo boom >&2; exit 3".to_string(),
            ..RuntimeConfig::default()
        };
        let err = shell(config).stop_worker(&worker(), &processor()).unwrap_err();
        match err {
            RuntimeError::CommandFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_template_is_a_no_op() {
        let config = RuntimeConfig {
            remove: String::new(),
            ..RuntimeConfig::default()
        };
        shell(config).remove_worker(&worker(), &processor()).unwrap();
    }

    #[test]
    fn dry_run_does_not_execute() {
        let config = RuntimeConfig {
            kind: RuntimeKind::DryRun,
            stop: "exit 1".to_string(),
            ..RuntimeConfig::default()
        };
        shell(config).stop_worker(&worker(), &processor()).unwrap();
    }

    #[test]
    fn start_exposes_host_init() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");
        let config = RuntimeConfig {
            start: format!("echo {{host_init.user}}-{{container}} > {}", marker.display()),
            ..RuntimeConfig::default()
        };
        let mut host_init = Map::new();
        host_init.insert("user".to_string(), Value::String("admin".to_string()));

        shell(config)
            .start_worker(&worker(), &host_init, &processor())
            .unwrap();
        let written = std::fs::read_to_string(marker).unwrap();
        assert_eq!(written.trim(), "admin-c-searcher-0");
    }

    #[test]
    fn timeout_kills_slow_commands() {
        let config = RuntimeConfig {
            stop: "sleep 5".to_string(),
            command_timeout: Some("100ms".to_string()),
            ..RuntimeConfig::default()
        };
        let err = shell(config).stop_worker(&worker(), &processor()).unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));
        assert!(err.to_string().ends_with("timed out after 100ms"), "{err}");
    }

    #[test]
    fn large_output_does_not_trip_the_timeout() {
        let config = RuntimeConfig {
            execute: "sh -c {command}".to_string(),
            command_timeout: Some("3s".to_string()),
            ..RuntimeConfig::default()
        };
        let started = Instant::now();
        let out = shell(config)
            .worker_execute(&worker(), &processor(), "head -c 200000 /dev/zero")
            .unwrap();
        assert_eq!(out.len(), 200_000);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn deliver_stages_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let copy = dir.path().join("copy.json");
        let config = RuntimeConfig {
            deliver: format!("cp {{target_path}} {}", copy.display()),
            ..RuntimeConfig::default()
        };
        let runtime = shell(config).with_staging_dir(dir.path().join("staging"));
        let target = Target::new(hape_core::TargetKind::FinalTarget);

        runtime.deliver_target(&worker(), &processor(), &target).unwrap();
        let delivered: Target =
            serde_json::from_str(&std::fs::read_to_string(copy).unwrap()).unwrap();
        assert_eq!(delivered, target);
    }
}

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use tracing::{debug, info, warn};

use crate::transport::trim_base_url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_STARTUP_RETRIES: u32 = 30;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const STOP_GRACE: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// How to reach a local backend server and, if it is down, how to start it.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub probe_url: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub startup_retries: u32,
    pub retry_interval: Duration,
}

impl ServiceSpec {
    pub fn ollama(url: &str) -> Self {
        Self {
            name: "ollama".to_string(),
            probe_url: trim_base_url(url),
            program: PathBuf::from("ollama"),
            args: vec!["serve".to_string()],
            cwd: None,
            // Keep the GPU free for the image server.
            env: vec![("CUDA_VISIBLE_DEVICES".to_string(), String::new())],
            startup_retries: DEFAULT_STARTUP_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn fooocus(url: &str, path: &Path) -> Self {
        Self {
            name: "fooocus".to_string(),
            probe_url: format!("{}/docs", trim_base_url(url)),
            program: venv_python(path),
            args: vec!["main.py".to_string()],
            cwd: Some(path.to_path_buf()),
            env: Vec::new(),
            startup_retries: DEFAULT_STARTUP_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

#[cfg(windows)]
fn venv_python(path: &Path) -> PathBuf {
    path.join("venv").join("Scripts").join("python.exe")
}

#[cfg(not(windows))]
fn venv_python(path: &Path) -> PathBuf {
    path.join("venv").join("bin").join("python")
}

/// A service that is online for the duration of the batch.
///
/// `child` is only set when this process started the server; attached servers are left
/// running on release.
#[derive(Debug)]
pub struct ServiceHandle {
    name: String,
    child: Option<Child>,
    attached: bool,
}

impl ServiceHandle {
    fn attached(name: &str) -> Self {
        Self {
            name: name.to_string(),
            child: None,
            attached: true,
        }
    }

    fn spawned(name: &str, child: Child) -> Self {
        Self {
            name: name.to_string(),
            child: Some(child),
            attached: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owned(&self) -> bool {
        self.child.is_some()
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            stop_child(&self.name, &mut child);
        } else if std::mem::take(&mut self.attached) {
            debug!(service = %self.name, "leaving attached service running");
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Asks the child to exit, then kills it if it is still running after [`STOP_GRACE`].
fn stop_child(name: &str, child: &mut Child) {
    info!(service = %name, pid = child.id(), "stopping service");
    if terminate(child) {
        let deadline = Instant::now() + STOP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(service = %name, %status, "service exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(STOP_POLL),
                Ok(None) => {
                    warn!(service = %name, "service ignored termination, killing");
                    break;
                }
                Err(err) => {
                    warn!(service = %name, "failed to poll service: {err}");
                    break;
                }
            }
        }
    }
    if let Err(err) = child.kill() {
        warn!(service = %name, "failed to stop service: {err}");
    }
    if let Err(err) = child.wait() {
        warn!(service = %name, "failed to reap service: {err}");
    }
}

#[cfg(unix)]
fn terminate(child: &Child) -> bool {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: `pid` is our own unreaped child, so it cannot have been recycled.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> bool {
    false
}

/// Scoped guard over the local servers a batch depends on.
///
/// Dropping the supervisor releases every handle in reverse acquisition order.
pub struct ServiceSupervisor {
    handles: Vec<ServiceHandle>,
}

impl ServiceSupervisor {
    pub fn acquire(specs: &[ServiceSpec]) -> Result<Self> {
        let http = HttpClient::new();
        let mut supervisor = Self {
            handles: Vec::with_capacity(specs.len()),
        };
        for spec in specs {
            // On error the partially built supervisor drops and releases what it holds.
            let handle = acquire_one(&http, spec)?;
            supervisor.handles.push(handle);
        }
        Ok(supervisor)
    }

    pub fn handles(&self) -> &[ServiceHandle] {
        &self.handles
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ServiceSupervisor {
    fn drop(&mut self) {
        while let Some(handle) = self.handles.pop() {
            drop(handle);
        }
    }
}

fn acquire_one(http: &HttpClient, spec: &ServiceSpec) -> Result<ServiceHandle> {
    if probe(http, &spec.probe_url) {
        info!(service = %spec.name, url = %spec.probe_url, "service already online, attaching");
        return Ok(ServiceHandle::attached(&spec.name));
    }

    info!(service = %spec.name, program = %spec.program.display(), "starting service");
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(cwd) = spec.cwd.as_ref() {
        command.current_dir(cwd);
    }
    let child = command
        .spawn()
        .with_context(|| format!("failed to start {} ({})", spec.name, spec.program.display()))?;
    let mut handle = ServiceHandle::spawned(&spec.name, child);

    for attempt in 1..=spec.startup_retries {
        thread::sleep(spec.retry_interval);
        if probe(http, &spec.probe_url) {
            info!(service = %spec.name, attempt, "service online");
            return Ok(handle);
        }
        if let Some(child) = handle.child.as_mut() {
            if let Some(status) = child.try_wait().context("failed to poll service process")? {
                handle.child = None;
                bail!("{} exited during startup ({status})", spec.name);
            }
        }
        debug!(service = %spec.name, attempt, max = spec.startup_retries, "waiting for service");
    }
    bail!(
        "{} did not come online at {} after {} attempts",
        spec.name,
        spec.probe_url,
        spec.startup_retries
    )
}

/// Any HTTP answer counts as online, whatever its status; only a failed request means down.
fn probe(http: &HttpClient, url: &str) -> bool {
    http.get(url).timeout(PROBE_TIMEOUT).send().is_ok()
}

use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wampkit_transport::{Endpoint, TcpTransport};

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};

/// Controls how the router process is launched and watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterOptions {
    /// Router executable, invoked as `<program> start --cbdir <dir> --config <path>`.
    pub program: PathBuf,
    /// Router node directory. Defaults to the config file's directory.
    pub directory: Option<PathBuf>,
    /// Certificate for a TLS transport.
    pub certificate: Option<PathBuf>,
    /// How long `start` waits for the router to accept connections.
    pub ready_timeout: Duration,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
    /// How long `stop` waits after SIGTERM before killing the process.
    pub stop_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("crossbar"),
            directory: None,
            certificate: None,
            ready_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

impl RouterOptions {
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_certificate(mut self, certificate: impl Into<PathBuf>) -> Self {
        self.certificate = Some(certificate.into());
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// A router described by a config file, optionally running as a child process.
pub struct Router {
    config: RouterConfig,
    options: RouterOptions,
    process: Option<Child>,
}

impl Router {
    /// Wrap an already-loaded config.
    pub fn new(config: RouterConfig, options: RouterOptions) -> Self {
        Self {
            config,
            options,
            process: None,
        }
    }

    /// Load the config file at `path` and wrap it.
    pub fn from_path(path: &Path, options: RouterOptions) -> Result<Self> {
        let config = RouterConfig::from_path(path)?;
        Ok(Self::new(config, options))
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn realm(&self) -> &str {
        &self.config.realm
    }

    pub fn url(&self) -> &str {
        &self.config.transport.url
    }

    /// Client-facing endpoint, carrying the certificate when one is configured.
    pub fn endpoint(&self) -> Endpoint {
        let endpoint = self.config.endpoint();
        match &self.options.certificate {
            Some(certificate) => endpoint.with_certificate(certificate.clone()),
            None => endpoint,
        }
    }

    pub fn can_use_tls(&self) -> bool {
        self.options.certificate.is_some()
    }

    /// Whether a router process started by this handle is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Launch the router process and wait until it accepts connections.
    pub fn start(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let config_path = self.config.path.clone().ok_or_else(|| {
            RouterError::Invalid("router config was not loaded from a file".to_string())
        })?;
        let directory = match &self.options.directory {
            Some(directory) => directory.clone(),
            None => config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let mut command = Command::new(&self.options.program);
        command
            .arg("start")
            .arg("--cbdir")
            .arg(&directory)
            .arg("--config")
            .arg(&config_path);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(
            program = %self.options.program.display(),
            config = %config_path.display(),
            "starting router"
        );
        self.process = Some(command.spawn()?);

        if let Err(err) = self.wait_until_ready(self.options.ready_timeout) {
            let _ = self.stop();
            return Err(err);
        }

        info!(
            url = %self.config.transport.url,
            ip_version = %self.config.transport.ip_version,
            "router is ready for connections"
        );
        Ok(())
    }

    /// Terminate the router process, if this handle started one.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.process.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_some() {
            debug!("router process already exited");
            return Ok(());
        }

        warn!("stopping router");
        terminate(&mut child)?;

        let deadline = Instant::now() + self.options.stop_timeout;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            std::thread::sleep(self.options.poll_interval);
        }

        warn!("router ignored SIGTERM; killing");
        match child.kill() {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err.into()),
        }
        child.wait()?;
        Ok(())
    }

    /// Whether the router endpoint accepts a TCP connection right now.
    pub fn is_ready(&self) -> bool {
        let timeout = self.options.poll_interval.max(Duration::from_millis(100));
        TcpTransport::probe(&self.config.endpoint(), timeout).is_ok()
    }

    /// Poll the router endpoint until it accepts connections or `timeout` elapses.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let endpoint = self.config.endpoint();
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_ready() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RouterError::NotReady {
                    endpoint: endpoint.to_string(),
                    timeout,
                });
            }
            std::thread::sleep(self.options.poll_interval);
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "failed to stop router");
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<()> {
    let pid = i32::try_from(child.id())
        .map_err(|_| RouterError::Invalid(format!("pid out of range: {}", child.id())))?;
    // The child leads its own process group, so this reaches its workers too.
    let rc = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err.into());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    match child.kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err.into()),
    }
}

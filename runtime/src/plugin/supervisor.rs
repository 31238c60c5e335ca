//! Plugin process lifecycle.
//!
//! Spawns a plugin binary, discovers its listen address from stdout, polls
//! its health endpoint until ready, and streams its structured stderr logs
//! into the host logger.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use ocmr_core::config::PluginManagerConfig;
use ocmr_core::error::{OcmError, Result};
use ocmr_core::log::{LogLevel, PluginLogRecord};
use ocmr_transport::PluginClient;

use super::descriptor::PluginDescriptor;

const TCP_PREFIX: &str = "http://";
const UNIX_PREFIX: &str = "http+unix://";

/// A started plugin: its client bound to the discovered address, plus the
/// owning process handle.
pub struct RunningPlugin {
    id: String,
    pid: u32,
    address: String,
    client: Arc<PluginClient>,
    // Held so the child is reapable; interrupt goes through the pid.
    _child: Child,
}

impl RunningPlugin {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn client(&self) -> Arc<PluginClient> {
        Arc::clone(&self.client)
    }

    /// Send SIGINT to the plugin process. Best effort, does not wait for
    /// exit.
    pub fn interrupt(&self) -> Result<()> {
        let ret = unsafe { libc::kill(self.pid as i32, libc::SIGINT) };
        if ret != 0 {
            return Err(OcmError::PluginError {
                plugin: self.id.clone(),
                message: format!(
                    "failed to signal pid {}: {}",
                    self.pid,
                    std::io::Error::last_os_error()
                ),
            });
        }
        Ok(())
    }
}

/// Spawn the plugin binary, wait for its announced address and a passing
/// health check, and return the running instance together with its stderr
/// log-streamer task.
///
/// The whole sequence is bounded by the configured connect and health
/// timeouts. On any failure after spawn the child is interrupted so no
/// orphaned process lingers.
pub async fn start_plugin(
    descriptor: &PluginDescriptor,
    config: &PluginManagerConfig,
) -> Result<(RunningPlugin, JoinHandle<()>)> {
    let id = descriptor.id().to_string();
    tracing::info!(plugin = %id, path = %descriptor.path.display(), "starting plugin");

    let mut child = Command::new(&descriptor.path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| OcmError::PluginError {
            plugin: id.clone(),
            message: format!("failed to spawn {}: {}", descriptor.path.display(), e),
        })?;

    let pid = child.id().ok_or_else(|| OcmError::PluginError {
        plugin: id.clone(),
        message: "plugin exited before startup completed".to_string(),
    })?;

    let stdout = child.stdout.take().ok_or_else(|| OcmError::PluginError {
        plugin: id.clone(),
        message: "plugin stdout is not attached".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| OcmError::PluginError {
        plugin: id.clone(),
        message: "plugin stderr is not attached".to_string(),
    })?;

    let startup = async {
        let address = discover_address(&id, stdout, config).await?;
        let client = Arc::new(build_client(&address));
        wait_for_healthy(&id, &client, config).await?;
        Ok::<_, OcmError>((address, client))
    };

    let (address, client) = match startup.await {
        Ok(ok) => ok,
        Err(e) => {
            // Interrupt the half-started child before surfacing the error.
            unsafe { libc::kill(pid as i32, libc::SIGINT) };
            return Err(e);
        }
    };

    tracing::info!(plugin = %id, address = %address, "plugin is healthy");
    let streamer = start_log_streamer(id.clone(), stderr);

    Ok((
        RunningPlugin {
            id,
            pid,
            address,
            client,
            _child: child,
        },
        streamer,
    ))
}

/// Scan the plugin's stdout for the announced listen address.
///
/// The first line starting with `http://` or `http+unix://` wins; other
/// lines are logged and skipped. Bounded by the connect timeout.
async fn discover_address(
    id: &str,
    stdout: ChildStdout,
    config: &PluginManagerConfig,
) -> Result<String> {
    let scan = async {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = lines.next_line().await.map_err(|e| OcmError::PluginError {
                plugin: id.to_string(),
                message: format!("failed to read plugin stdout: {}", e),
            })?;
            let line = match line {
                Some(line) => line,
                None => {
                    return Err(OcmError::PluginError {
                        plugin: id.to_string(),
                        message: "plugin stdout closed before announcing an address".to_string(),
                    })
                }
            };
            let trimmed = line.trim();
            if trimmed.starts_with(TCP_PREFIX) || trimmed.starts_with(UNIX_PREFIX) {
                return Ok(trimmed.to_string());
            }
            tracing::debug!(plugin = %id, line = %trimmed, "ignoring non-address stdout line");
        }
    };

    tokio::time::timeout(config.connect_timeout(), scan)
        .await
        .map_err(|_| {
            OcmError::TimeoutError(format!(
                "plugin {} did not announce an address within {:?}",
                id,
                config.connect_timeout()
            ))
        })?
}

fn build_client(address: &str) -> PluginClient {
    match address.strip_prefix(UNIX_PREFIX) {
        Some(socket_path) => PluginClient::unix(socket_path),
        None => PluginClient::tcp(address),
    }
}

/// Poll `GET /healthz` until it succeeds or the health timeout elapses.
async fn wait_for_healthy(
    id: &str,
    client: &PluginClient,
    config: &PluginManagerConfig,
) -> Result<()> {
    let poll = async {
        let mut interval = tokio::time::interval(config.health_interval());
        loop {
            interval.tick().await;
            match client.healthz().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::debug!(plugin = %id, error = %e, "health check not ready");
                }
            }
        }
    };

    tokio::time::timeout(config.health_timeout(), poll)
        .await
        .map_err(|_| {
            OcmError::TimeoutError(format!(
                "plugin {} did not become healthy within {:?}",
                id,
                config.health_timeout()
            ))
        })
}

/// Re-emit the plugin's newline-delimited JSON stderr records through the
/// host logger at the matching level. Unparseable lines are dropped;
/// shutdown races produce partial lines that are not worth reporting.
pub fn start_log_streamer(id: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let record: PluginLogRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(_) => continue,
            };
            let fields = record.fields_display();
            match record.level {
                LogLevel::Debug => {
                    tracing::debug!(plugin = %id, fields = %fields, "{}", record.msg)
                }
                LogLevel::Info => {
                    tracing::info!(plugin = %id, fields = %fields, "{}", record.msg)
                }
                LogLevel::Warn => {
                    tracing::warn!(plugin = %id, fields = %fields, "{}", record.msg)
                }
                LogLevel::Error => {
                    tracing::error!(plugin = %id, fields = %fields, "{}", record.msg)
                }
            }
        }
        tracing::debug!(plugin = %id, "log stream closed");
    })
}

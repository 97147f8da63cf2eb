//! Secure-copy connector
//!
//! Shells out to `scp` (key auth) or `sshpass -e scp` (password auth). The
//! password travels in the child's `SSHPASS` environment, never on the
//! command line.

use graft_common::config::ServerCredentials;
use graft_common::ImportSettings;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{file_size, FetchError};
use crate::config::ConfigError;
use crate::models::{FetchResult, SourceConfig};

const DEFAULT_PORT: u16 = 22;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the remote host authenticates us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScpAuth {
    Key(PathBuf),
    Password(String),
    /// Ambient ssh agent / default identity
    Agent,
}

#[derive(Debug, Clone)]
pub struct ScpConnector {
    host: String,
    user: String,
    port: u16,
    auth: ScpAuth,
    timeout: Duration,
}

impl ScpConnector {
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: ScpAuth) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: DEFAULT_PORT,
            auth,
            timeout: TRANSFER_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the named server from settings
    pub fn from_config(source: &SourceConfig, settings: &ImportSettings) -> Result<Self, ConfigError> {
        let server_name = source.param_str("server_name").ok_or_else(|| {
            ConfigError::Invalid("Secure copy source requires a server_name parameter".to_string())
        })?;

        let creds = settings.servers.get(server_name).ok_or_else(|| {
            ConfigError::NotFound(format!("No server settings found for {}", server_name))
        })?;

        Ok(Self::from_credentials(server_name, creds))
    }

    fn from_credentials(server_name: &str, creds: &ServerCredentials) -> Self {
        let auth = match (&creds.key_file, &creds.password) {
            (Some(key), _) => ScpAuth::Key(key.clone()),
            (None, Some(password)) => ScpAuth::Password(password.clone()),
            (None, None) => ScpAuth::Agent,
        };
        let host = creds.host.clone().unwrap_or_else(|| server_name.to_string());
        Self::new(host, creds.user.clone(), auth).with_port(creds.port.unwrap_or(DEFAULT_PORT))
    }

    fn remote(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Build the transfer command; `program` is `scp` or `sshpass`
    fn transfer_command(&self, source_path: &str, dest_path: &Path) -> Command {
        let mut cmd = match &self.auth {
            ScpAuth::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("scp").env("SSHPASS", password);
                cmd
            }
            _ => Command::new("scp"),
        };

        cmd.arg("-P").arg(self.port.to_string());
        if let ScpAuth::Key(key) = &self.auth {
            cmd.arg("-i").arg(key).arg("-o").arg("BatchMode=yes");
        }
        cmd.arg(format!("{}:{}", self.remote(), source_path))
            .arg(dest_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub async fn fetch(&self, source_path: &str, dest_path: &Path) -> Result<FetchResult, FetchError> {
        debug!(host = %self.host, source = %source_path, "Starting secure copy");

        let output = tokio::time::timeout(
            self.timeout,
            self.transfer_command(source_path, dest_path).output(),
        )
        .await
        .map_err(|_| {
            FetchError::Timeout(format!(
                "Secure copy from {} exceeded {}s",
                self.host,
                self.timeout.as_secs()
            ))
        })?
        .map_err(|e| FetchError::Transport(format!("Failed to execute scp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(host = %self.host, stderr = %stderr.trim(), "Secure copy failed");
            return Err(classify_stderr(&stderr));
        }

        let bytes = file_size(dest_path).await?;
        Ok(FetchResult {
            local_path: dest_path.to_path_buf(),
            bytes_transferred: bytes,
        })
    }

    pub async fn test_connection(&self) -> bool {
        let mut cmd = match &self.auth {
            ScpAuth::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            _ => Command::new("ssh"),
        };
        cmd.arg("-p").arg(self.port.to_string());
        if let ScpAuth::Key(key) = &self.auth {
            cmd.arg("-i").arg(key).arg("-o").arg("BatchMode=yes");
        }
        cmd.arg("-o")
            .arg("ConnectTimeout=5")
            .arg(self.remote())
            .arg("echo")
            .arg("ok")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }
}

/// Map scp's stderr onto a typed failure
fn classify_stderr(stderr: &str) -> FetchError {
    let message = format!("SCP failed: {}", stderr.trim());
    if stderr.contains("Permission denied") {
        FetchError::Auth(message)
    } else if stderr.contains("No such file") {
        FetchError::NotFound(message)
    } else if stderr.contains("timed out") {
        FetchError::Timeout(message)
    } else {
        FetchError::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_classification() {
        assert!(matches!(
            classify_stderr("user@host: Permission denied (publickey)."),
            FetchError::Auth(_)
        ));
        assert!(matches!(
            classify_stderr("scp: /feeds/x.dat: No such file or directory"),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_stderr("ssh: connect to host h port 22: Connection timed out"),
            FetchError::Timeout(_)
        ));
        assert!(matches!(classify_stderr("lost connection"), FetchError::Transport(_)));
    }

    #[test]
    fn test_credentials_prefer_key_over_password() {
        let creds = ServerCredentials {
            host: None,
            user: "etl".into(),
            password: Some("secret".into()),
            key_file: Some(PathBuf::from("/keys/id_ed25519")),
            port: Some(2222),
        };
        let connector = ScpConnector::from_credentials("feedhost", &creds);
        assert_eq!(connector.auth, ScpAuth::Key(PathBuf::from("/keys/id_ed25519")));
        assert_eq!(connector.host, "feedhost");
        assert_eq!(connector.port, 2222);
        assert_eq!(connector.remote(), "etl@feedhost");
    }

    #[test]
    fn test_password_is_not_on_command_line() {
        let connector = ScpConnector::new("h", "u", ScpAuth::Password("hunter2".into()));
        let cmd = connector.transfer_command("/a.dat", Path::new("/tmp/a.dat"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.as_std().get_program(), "sshpass");
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        assert!(args.contains(&"u@h:/a.dat".to_string()));
    }
}

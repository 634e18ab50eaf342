use super::{NetconfError, NetconfOptions};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

/// Bytes of ssh diagnostics kept for error reports.
const STDERR_TAIL: usize = 4096;
/// How long to wait for ssh to finish writing diagnostics after its stdout
/// closed.
const STDERR_WAIT: Duration = Duration::from_secs(1);

/// A bidirectional byte stream to a switch's NETCONF subsystem.
pub struct Transport {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    // Killed on drop.
    _child: Option<Child>,
}

impl Transport {
    pub fn new(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Transport {
            reader,
            writer,
            stderr: None,
            _child: None,
        }
    }

    /// Whatever the transport process reported on stderr, once it has
    /// stopped writing. `None` when it said nothing.
    pub(crate) async fn diagnostics(&mut self) -> Option<String> {
        let task = self.stderr.take()?;
        let tail = tokio::time::timeout(STDERR_WAIT, task).await.ok()?.ok()?;
        let text = String::from_utf8_lossy(&tail).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Drains `stderr` until it closes, keeping the last `STDERR_TAIL` bytes.
fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > STDERR_TAIL {
                        tail.drain(..tail.len() - STDERR_TAIL);
                    }
                }
            }
        }
        tail
    })
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, hostname: &str) -> Result<Transport, NetconfError>;
}

/// Reaches the NETCONF subsystem through the system `ssh` client.
///
/// Host keys are not verified: switches regenerate them on reboot and no
/// fingerprints are tracked.
pub struct SshConnector {
    options: NetconfOptions,
}

impl SshConnector {
    pub fn new(options: NetconfOptions) -> Self {
        SshConnector { options }
    }

    fn ssh_args(&self, hostname: &str) -> Vec<String> {
        let options = &self.options;
        let mut args = vec![
            "-T".to_string(),
            "-i".to_string(),
            options.private_key.display().to_string(),
            "-p".to_string(),
            options.port.to_string(),
            "-l".to_string(),
            options.username.clone(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", options.connect_timeout_secs),
        ];

        if !options.kex_algorithms.is_empty() {
            args.push("-o".to_string());
            args.push(format!("KexAlgorithms={}", options.kex_algorithms.join(",")));
        }

        args.extend([hostname.to_string(), "-s".to_string(), "netconf".to_string()]);
        args
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, hostname: &str) -> Result<Transport, NetconfError> {
        let mut child = Command::new(&self.options.ssh_command)
            .args(self.ssh_args(hostname))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(NetconfError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NetconfError::Protocol("ssh stdin is not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NetconfError::Protocol("ssh stdout is not piped".into()))?;
        let stderr = child.stderr.take().map(collect_stderr);

        Ok(Transport {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            stderr,
            _child: Some(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netconf::Session;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// Writes an executable shell script standing in for `ssh`.
    fn fake_ssh(dir: &tempfile::TempDir, script: &str) -> String {
        let path = dir.path().join("ssh");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_ssh_args() {
        let connector = SshConnector::new(NetconfOptions {
            private_key: PathBuf::from("/etc/switch-monitoring/id_rsa"),
            kex_algorithms: vec![
                "curve25519-sha256".to_string(),
                "diffie-hellman-group14-sha1".to_string(),
            ],
            ..Default::default()
        });

        let args = connector.ssh_args("s1.abc01.measurement-lab.org");
        let joined = args.join(" ");

        assert!(joined.starts_with("-T -i /etc/switch-monitoring/id_rsa -p 830 -l root"));
        assert!(joined.contains("-o StrictHostKeyChecking=no"));
        assert!(joined.contains("-o KexAlgorithms=curve25519-sha256,diffie-hellman-group14-sha1"));
        assert!(joined.ends_with("s1.abc01.measurement-lab.org -s netconf"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let connector = SshConnector::new(NetconfOptions {
            ssh_command: "/nonexistent/ssh".to_string(),
            ..Default::default()
        });

        assert!(matches!(
            connector.connect("s1.abc01.measurement-lab.org").await,
            Err(NetconfError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_ssh_stderr_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SshConnector::new(NetconfOptions {
            ssh_command: fake_ssh(
                &dir,
                "echo 'root@s1.abc01: Permission denied (publickey).' >&2\nexit 255",
            ),
            ..Default::default()
        });

        let transport = connector.connect("s1.abc01.measurement-lab.org").await.unwrap();
        let err = Session::establish(transport).await.err().unwrap();
        match err {
            NetconfError::Ssh(message) => {
                assert_eq!(message, "root@s1.abc01: Permission denied (publickey).")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_silent_exit_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SshConnector::new(NetconfOptions {
            ssh_command: fake_ssh(&dir, "exit 0"),
            ..Default::default()
        });

        let transport = connector.connect("s1.abc01.measurement-lab.org").await.unwrap();
        assert!(matches!(
            Session::establish(transport).await,
            Err(NetconfError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_stderr_tail_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SshConnector::new(NetconfOptions {
            ssh_command: fake_ssh(
                &dir,
                "i=0\nwhile [ $i -lt 500 ]; do echo \"debug1: line $i\" >&2; i=$((i+1)); done\nexit 255",
            ),
            ..Default::default()
        });

        let mut transport = connector.connect("s1.abc01.measurement-lab.org").await.unwrap();
        let mut sink = Vec::new();
        transport.reader.read_to_end(&mut sink).await.unwrap();
        let diagnostics = transport.diagnostics().await.unwrap();

        assert!(diagnostics.len() <= STDERR_TAIL);
        assert!(diagnostics.ends_with("debug1: line 499"));
    }
}

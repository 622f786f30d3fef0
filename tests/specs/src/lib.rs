// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `console-session` binary against an in-process mock
//! backend and inspects its JSON output and durable storage.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use serde_json::Value;

pub use console_session::client::ensure_crypto;

/// Resolve the path to the compiled `console-session` binary.
pub fn console_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("console-session")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `console-session` process that is killed on drop.
pub struct ConsoleProcess {
    child: Child,
}

impl ConsoleProcess {
    /// Spawn the binary against `api_url` with durable storage in `state_dir`.
    /// `args` go after the connection flags: session flags, then the
    /// subcommand.
    pub fn spawn(api_url: &str, state_dir: &Path, args: &[&str]) -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = console_binary();
        anyhow::ensure!(binary.exists(), "console-session binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .arg("--api-url")
            .arg(api_url)
            .arg("--state-dir")
            .arg(state_dir)
            .args(["--log-level", "warn"])
            .args(args)
            .env_remove("CONSOLE_NATIVE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child })
    }

    /// Wait for the process to exit within `timeout`.
    ///
    /// Polls instead of blocking so an in-process mock backend on the same
    /// runtime keeps serving.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("console-session did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// JSON documents printed to stdout, in order. Call after exit.
    pub fn json_output(&mut self) -> anyhow::Result<Vec<Value>> {
        let mut out = String::new();
        if let Some(ref mut stdout) = self.child.stdout {
            stdout.read_to_string(&mut out)?;
        }
        let docs = serde_json::Deserializer::from_str(&out).into_iter::<Value>();
        Ok(docs.collect::<Result<_, _>>()?)
    }
}

impl Drop for ConsoleProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Run a one-shot subcommand to completion and return its JSON output.
pub async fn run_to_completion(
    api_url: &str,
    state_dir: &Path,
    args: &[&str],
) -> anyhow::Result<Vec<Value>> {
    let mut process = ConsoleProcess::spawn(api_url, state_dir, args)?;
    let status = process.wait_exit(Duration::from_secs(10)).await?;
    anyhow::ensure!(status.success(), "console-session exited with {status}");
    process.json_output()
}

/// Read the durable storage file a session wrote under `state_dir`.
pub fn durable_storage(state_dir: &Path) -> anyhow::Result<Value> {
    let path = state_dir.join(console_session::session::STORAGE_FILE);
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

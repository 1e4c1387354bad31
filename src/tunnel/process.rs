//! Subprocess plumbing shared by the CLI-driven tunnels

use super::TunnelError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run `program args...` to completion and return its stdout.
///
/// The child is killed if the returned future is dropped, which is how a
/// timeout or a bridge cancel terminates a backend process.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<String, TunnelError> {
    tracing::debug!(program, argc = args.len(), "spawning tunnel process");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| TunnelError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TunnelError::Exit {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: first_line(&stderr),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| TunnelError::Decode(e.to_string()))
}

/// Availability check: does `program args...` exit 0 within `budget`?
pub(crate) async fn succeeds_within(program: &str, args: &[String], budget: Duration) -> bool {
    match tokio::time::timeout(budget, run(program, args)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(program, error = %e, "probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(program, "probe timed out");
            false
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}

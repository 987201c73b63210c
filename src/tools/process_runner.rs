use crate::error::{AnalysisError, AnalysisResult};
use log::{debug, warn};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 外部工具結束後的輸出
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// 執行外部工具並等待結束，超時或收到中斷信號時終止子程序
///
/// stdout 被丟棄，stderr 由背景執行緒收集，避免管線塞滿造成子程序卡住。
pub fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    shutdown_signal: &Arc<AtomicBool>,
) -> AnalysisResult<ToolOutput> {
    let program = command.get_program().to_string_lossy().to_string();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AnalysisError::ExternalToolFailure(format!("cannot start {program}: {e}")))?;

    let stderr_reader = child.stderr.take().map(|mut stderr| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = stderr.read_to_string(&mut buffer);
            buffer
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                terminate(&mut child);
                return Err(AnalysisError::ExternalToolFailure(format!(
                    "cannot wait for {program}: {e}"
                )));
            }
        }

        if shutdown_signal.load(Ordering::SeqCst) {
            warn!("收到中斷信號，終止 {program}");
            terminate(&mut child);
            return Err(AnalysisError::Cancelled);
        }

        if started.elapsed() >= timeout {
            warn!("{program} 執行超過 {}s，強制終止", timeout.as_secs());
            terminate(&mut child);
            return Err(AnalysisError::ExternalToolFailure(format!(
                "{program} timed out after {}s",
                timeout.as_secs()
            )));
        }

        thread::sleep(POLL_INTERVAL);
    };

    let stderr = stderr_reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();

    debug!(
        "{program} 結束: {status}，耗時 {:.2}s",
        started.elapsed().as_secs_f64()
    );

    Ok(ToolOutput { status, stderr })
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_collects_stderr_and_status() {
        let signal = Arc::new(AtomicBool::new(false));
        let output =
            run_with_timeout(shell("echo oops >&2; exit 3"), Duration::from_secs(10), &signal)
                .unwrap();
        assert!(!output.status.success());
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn test_timeout_kills_hung_process() {
        let signal = Arc::new(AtomicBool::new(false));
        let started = Instant::now();
        let err = run_with_timeout(shell("sleep 30"), Duration::from_millis(200), &signal)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ExternalToolFailure(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_shutdown_signal_cancels() {
        let signal = Arc::new(AtomicBool::new(true));
        let err =
            run_with_timeout(shell("sleep 30"), Duration::from_secs(60), &signal).unwrap_err();
        assert_eq!(err, AnalysisError::Cancelled);
    }

    #[test]
    fn test_missing_program() {
        let signal = Arc::new(AtomicBool::new(false));
        let err = run_with_timeout(
            Command::new("definitely-not-a-real-tool-xyz"),
            Duration::from_secs(1),
            &signal,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::ExternalToolFailure(_)));
    }
}

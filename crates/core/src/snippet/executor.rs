use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::io::transport::{Transport, notify_best_effort};
use crate::types::Destination;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start payload: {0}")]
    Spawn(String),
    #[error("payload exited with code {code}")]
    ExitStatus { code: i32 },
    #[error("payload terminated by signal")]
    Signaled,
    #[error("payload panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

/// Incidental output collected while a payload runs. Survives a failing or panicking run.
///
/// At most `limit` bytes are kept; anything past that is counted as truncated and dropped.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    buf: Arc<Mutex<CaptureBuf>>,
}

#[derive(Debug)]
struct CaptureBuf {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::with_limit(usize::MAX)
    }
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Arc::new(Mutex::new(CaptureBuf {
                bytes: Vec::new(),
                limit,
                truncated: false,
            })),
        }
    }

    pub fn push(&self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    pub fn push_bytes(&self, chunk: &[u8]) {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let room = buf.limit.saturating_sub(buf.bytes.len());
        if chunk.len() > room {
            buf.truncated = true;
        }
        buf.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf.bytes).into_owned()
    }

    pub fn is_truncated(&self) -> bool {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).truncated
    }
}

/// Runs one payload to completion.
#[async_trait::async_trait]
pub trait PayloadRunner: Send + Sync {
    async fn run(
        &self,
        payload: &str,
        destination: &Destination,
        capture: &OutputCapture,
    ) -> Result<(), ExecError>;
}

/// Runs payloads as `bash -c` scripts in a child process.
///
/// The child sees a cleared environment (only `PATH`, `SNIPGATE_CHANNEL` and
/// `SNIPGATE_THREAD`) and on unix a virtual memory cap. There is no timeout: a confirmed
/// payload runs until it exits. Both pipes are drained as the child writes; the capture
/// decides how much of it is kept.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    memory_mb: u64,
}

impl ShellRunner {
    pub fn new(memory_mb: u64) -> Self {
        Self { memory_mb }
    }
}

#[async_trait::async_trait]
impl PayloadRunner for ShellRunner {
    async fn run(
        &self,
        payload: &str,
        destination: &Destination,
        capture: &OutputCapture,
    ) -> Result<(), ExecError> {
        let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".into());
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c")
            .arg(payload)
            .env_clear()
            .env("PATH", path)
            .env("SNIPGATE_CHANNEL", &destination.channel)
            .env("SNIPGATE_THREAD", &destination.thread)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // Unix: set RLIMIT_AS to cap virtual memory
        #[cfg(unix)]
        {
            let limit_bytes = self.memory_mb.saturating_mul(1024 * 1024);
            unsafe {
                cmd.pre_exec(move || {
                    let rlim = libc::rlimit {
                        rlim_cur: limit_bytes,
                        rlim_max: limit_bytes,
                    };
                    if libc::setrlimit(libc::RLIMIT_AS, &rlim) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))?;
        let (out, err) = tokio::join!(
            drain(child.stdout.take(), capture),
            drain(child.stderr.take(), capture)
        );
        out.and(err)
            .map_err(|e| ExecError::Failed(format!("reading payload output: {e}")))?;
        let status = child
            .wait()
            .await
            .map_err(|e| ExecError::Failed(e.to_string()))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ExecError::ExitStatus { code }),
            None => Err(ExecError::Signaled),
        }
    }
}

/// Read `pipe` to EOF, handing each chunk to `capture` as it arrives.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, capture: &OutputCapture) -> std::io::Result<()> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        capture.push_bytes(&chunk[..n]);
    }
}

/// What happened to one confirmed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs confirmed payloads and reports back to the originating thread.
pub struct SnippetExecutor {
    runner: Arc<dyn PayloadRunner>,
    transport: Arc<dyn Transport>,
    display_limit: usize,
    output_limit: usize,
}

impl SnippetExecutor {
    pub fn new(runner: Arc<dyn PayloadRunner>, transport: Arc<dyn Transport>) -> Self {
        Self {
            runner,
            transport,
            display_limit: usize::MAX,
            output_limit: usize::MAX,
        }
    }

    /// Cap the bytes of payload output held in memory.
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Cap the characters of captured output shown in the conversation.
    pub fn with_display_limit(mut self, chars: usize) -> Self {
        self.display_limit = chars;
        self
    }

    /// Run `payload` on its own task so a panic is contained, then post any captured
    /// output followed by the success or failure notice.
    pub async fn execute(&self, payload: &str, destination: &Destination) -> ExecutionOutcome {
        let capture = OutputCapture::with_limit(self.output_limit);
        let runner = Arc::clone(&self.runner);
        let task_payload = payload.to_owned();
        let task_dest = destination.clone();
        let task_capture = capture.clone();

        let result = tokio::spawn(async move {
            runner.run(&task_payload, &task_dest, &task_capture).await
        })
        .await;

        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(join) if join.is_panic() => Some(ExecError::Panicked(panic_message(join.into_panic()))),
            Err(join) => Some(ExecError::Failed(join.to_string())),
        };

        let output = capture.contents();
        let truncated = capture.is_truncated();
        if truncated {
            tracing::warn!(destination = %destination, limit = self.output_limit, "payload output truncated");
        }
        if !output.trim().is_empty() {
            let shown = super::truncate_for_display(output.trim_end(), self.display_limit);
            let mut text = format!("Output:\n```\n{shown}\n```");
            if truncated {
                text.push_str(&format!("\n(output cut off after {} bytes)", self.output_limit));
            }
            notify_best_effort(self.transport.as_ref(), destination, &text).await;
        }

        match &error {
            None => {
                tracing::info!(destination = %destination, "snippet executed");
                notify_best_effort(self.transport.as_ref(), destination, "Snippet executed successfully!").await;
            }
            Some(e) => {
                tracing::warn!(destination = %destination, error = %e, "snippet execution failed");
                notify_best_effort(
                    self.transport.as_ref(),
                    destination,
                    &format!("Error executing snippet: {e}"),
                )
                .await;
            }
        }

        ExecutionOutcome {
            output,
            error: error.map(|e| e.to_string()),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_owned(),
            Err(_) => "unknown panic".to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::RecordingTransport;

    struct Scripted {
        output: &'static str,
        fail: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl PayloadRunner for Scripted {
        async fn run(&self, _: &str, _: &Destination, capture: &OutputCapture) -> Result<(), ExecError> {
            capture.push(self.output);
            match self.fail {
                Some(msg) => Err(ExecError::Failed(msg.into())),
                None => Ok(()),
            }
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl PayloadRunner for Panicking {
        async fn run(&self, _: &str, _: &Destination, capture: &OutputCapture) -> Result<(), ExecError> {
            capture.push("before the fall");
            panic!("boom");
        }
    }

    fn executor(runner: impl PayloadRunner + 'static) -> (SnippetExecutor, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        (SnippetExecutor::new(Arc::new(runner), transport.clone()), transport)
    }

    #[tokio::test]
    async fn success_posts_output_then_notice() {
        let (exec, transport) = executor(Scripted { output: "hi\n", fail: None });
        let dest = Destination::new("C", "T");
        let outcome = exec.execute("echo hi", &dest).await;
        assert!(outcome.succeeded());
        let texts = transport.texts_for(&dest);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("hi"));
        assert_eq!(texts[1], "Snippet executed successfully!");
    }

    #[tokio::test]
    async fn silent_success_posts_only_notice() {
        let (exec, transport) = executor(Scripted { output: "", fail: None });
        let dest = Destination::new("C", "T");
        exec.execute("true", &dest).await;
        assert_eq!(transport.texts_for(&dest), vec!["Snippet executed successfully!".to_owned()]);
    }

    #[tokio::test]
    async fn failure_keeps_partial_output() {
        let (exec, transport) = executor(Scripted { output: "partial", fail: Some("disk on fire") });
        let dest = Destination::new("C", "T");
        let outcome = exec.execute("x", &dest).await;
        assert_eq!(outcome.output, "partial");
        assert_eq!(outcome.error.as_deref(), Some("disk on fire"));
        let texts = transport.texts_for(&dest);
        assert!(texts[0].contains("partial"));
        assert!(texts[1].contains("disk on fire"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (exec, transport) = executor(Panicking);
        let dest = Destination::new("C", "T");
        let outcome = exec.execute("x", &dest).await;
        assert_eq!(outcome.output, "before the fall");
        assert!(outcome.error.unwrap().contains("boom"));
        assert_eq!(transport.count_containing("before the fall"), 1);
        assert_eq!(transport.count_containing("Error executing snippet"), 1);
    }

    #[tokio::test]
    async fn long_output_is_truncated_for_display_only() {
        let (exec, transport) = executor(Scripted { output: "abcdefghij", fail: None });
        let exec = exec.with_display_limit(4);
        let dest = Destination::new("C", "T");
        let outcome = exec.execute("x", &dest).await;
        assert_eq!(outcome.output, "abcdefghij");
        assert!(transport.texts_for(&dest)[0].contains("abcd..."));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_captures_both_streams_and_exit_code() {
        let runner = ShellRunner::new(256);
        let capture = OutputCapture::new();
        let dest = Destination::new("general", "42");
        let err = runner
            .run("echo \"$SNIPGATE_THREAD\"; echo oops >&2; exit 3", &dest, &capture)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ExitStatus { code: 3 }));
        let out = capture.contents();
        assert!(out.contains("42"));
        assert!(out.contains("oops"));
    }

    #[tokio::test]
    async fn capture_keeps_only_the_configured_bytes() {
        let (exec, transport) = executor(Scripted { output: "abcdefghij", fail: None });
        let exec = exec.with_output_limit(4);
        let dest = Destination::new("C", "T");
        let outcome = exec.execute("x", &dest).await;
        assert!(outcome.succeeded());
        assert_eq!(outcome.output, "abcd");
        let texts = transport.texts_for(&dest);
        assert!(texts[0].contains("abcd"));
        assert!(!texts[0].contains("abcde"));
        assert!(texts[0].contains("cut off after 4 bytes"));
        assert_eq!(texts[1], "Snippet executed successfully!");
    }

    #[test]
    fn capture_splits_a_chunk_at_the_limit() {
        let capture = OutputCapture::with_limit(5);
        capture.push("abc");
        assert!(!capture.is_truncated());
        capture.push_bytes(b"defg");
        capture.push("h");
        assert_eq!(capture.contents(), "abcde");
        assert!(capture.is_truncated());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_bounds_a_flood_of_output() {
        let runner = ShellRunner::new(256);
        let capture = OutputCapture::with_limit(1024);
        let dest = Destination::new("C", "T");
        runner
            .run("head -c 20000000 /dev/zero | tr '\\0' a", &dest, &capture)
            .await
            .unwrap();
        let out = capture.contents();
        assert_eq!(out.len(), 1024);
        assert!(capture.is_truncated());
        assert!(out.chars().all(|c| c == 'a'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_runner_hides_parent_environment() {
        let runner = ShellRunner::new(256);
        let capture = OutputCapture::new();
        let dest = Destination::new("C", "T");
        runner
            .run("echo \"home=${HOME:-unset}\"", &dest, &capture)
            .await
            .unwrap();
        assert!(capture.contents().contains("home=unset"));
    }
}

//! Recognition through an external fingerprinting command.
//!
//! The sample is written to a scratch WAV file and the command is run with
//! the file path as its last argument. The first non-empty line of stdout is
//! the title; no output means no match.

use crate::audio::pcm::PcmWindow;
use crate::audio::wav::write_wav;
use crate::error::{NeedledropError, Result};
use crate::recognize::recognizer::{Identification, Recognizer};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const WAIT_POLL: Duration = Duration::from_millis(20);

/// Trait for executing system commands.
///
/// Enables testability by allowing mock implementations.
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, returning stdout on a zero exit status.
    ///
    /// The child is killed and an error returned once `timeout` elapses.
    fn execute(&self, program: &str, args: &[String], timeout: Duration) -> Result<String>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn execute(&self, program: &str, args: &[String], timeout: Duration) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NeedledropError::Recognition {
                message: format!("Failed to execute {}: {}", program, e),
            })?;

        // Drain pipes on their own threads so a chatty child cannot block.
        let stdout = child.stdout.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                if let Err(e) = pipe.read_to_string(&mut buf) {
                    tracing::debug!("Recognizer output unreadable: {}", e);
                }
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                if let Err(e) = pipe.read_to_string(&mut buf) {
                    tracing::debug!("Recognizer output unreadable: {}", e);
                }
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    if let Err(e) = child.kill() {
                        tracing::debug!("Failed to kill {}: {}", program, e);
                    }
                    child.wait().ok();
                    return Err(NeedledropError::Recognition {
                        message: format!("{} timed out after {:?}", program, timeout),
                    });
                }
                Ok(None) => std::thread::sleep(WAIT_POLL),
                Err(e) => {
                    return Err(NeedledropError::Recognition {
                        message: format!("Failed to wait for {}: {}", program, e),
                    });
                }
            }
        };

        let stdout = stdout
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(NeedledropError::Recognition {
                message: format!(
                    "{} failed with status {}: {}",
                    program,
                    status,
                    stderr.trim()
                ),
            });
        }

        Ok(stdout)
    }
}

/// Recognizer backed by an external command.
pub struct CommandRecognizer<E: CommandExecutor = SystemCommandExecutor> {
    command: Vec<String>,
    scratch_path: PathBuf,
    timeout: Duration,
    executor: E,
}

impl CommandRecognizer<SystemCommandExecutor> {
    /// `command` is the program followed by its fixed arguments.
    pub fn new(command: Vec<String>, scratch_path: PathBuf, timeout: Duration) -> Result<Self> {
        Self::with_executor(command, scratch_path, timeout, SystemCommandExecutor)
    }
}

impl<E: CommandExecutor> CommandRecognizer<E> {
    pub fn with_executor(
        command: Vec<String>,
        scratch_path: PathBuf,
        timeout: Duration,
        executor: E,
    ) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(NeedledropError::ConfigInvalidValue {
                key: "recognizer.command".to_string(),
                message: "must name a program".to_string(),
            });
        }
        Ok(Self {
            command,
            scratch_path,
            timeout,
            executor,
        })
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }
}

/// First non-empty trimmed line of command output.
fn parse_title(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

impl<E: CommandExecutor> Recognizer for CommandRecognizer<E> {
    fn identify(&self, sample: &PcmWindow) -> Result<Option<Identification>> {
        write_wav(&self.scratch_path, sample).map_err(|e| NeedledropError::Recognition {
            message: format!("Failed to write recognition sample: {}", e),
        })?;

        let (program, fixed_args) = match self.command.split_first() {
            Some(split) => split,
            None => {
                return Err(NeedledropError::Recognition {
                    message: "no recognizer command configured".to_string(),
                });
            }
        };
        let mut args = fixed_args.to_vec();
        args.push(self.scratch_path.display().to_string());

        tracing::debug!(
            "Running {} on {} frames of audio",
            program,
            sample.frame_count()
        );
        let stdout = self.executor.execute(program, &args, self.timeout)?;
        Ok(parse_title(&stdout).map(Identification::new))
    }

    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockCommandExecutor {
        stdout: String,
        fail: bool,
        calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    }

    impl CommandExecutor for MockCommandExecutor {
        fn execute(&self, program: &str, args: &[String], _timeout: Duration) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            if self.fail {
                Err(NeedledropError::Recognition {
                    message: "exit 1".to_string(),
                })
            } else {
                Ok(self.stdout.clone())
            }
        }
    }

    fn sample() -> PcmWindow {
        PcmWindow::new(44100, 2, vec![100; 882]).unwrap()
    }

    fn recognizer(
        executor: MockCommandExecutor,
        dir: &tempfile::TempDir,
    ) -> CommandRecognizer<MockCommandExecutor> {
        CommandRecognizer::with_executor(
            vec!["fpcalc-lookup".to_string(), "--json".to_string()],
            dir.path().join("sample.wav"),
            Duration::from_secs(5),
            executor,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_title_takes_first_non_empty_line() {
        assert_eq!(
            parse_title("\n  Can - Ege Bamyasi  \nextra\n"),
            Some("Can - Ege Bamyasi".to_string())
        );
        assert_eq!(parse_title(""), None);
        assert_eq!(parse_title("  \n\t\n"), None);
    }

    #[test]
    fn test_identify_appends_sample_path_and_writes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let executor = MockCommandExecutor {
            stdout: "Faust - IV\n".to_string(),
            ..Default::default()
        };
        let calls = executor.calls.clone();
        let recognizer = recognizer(executor, &dir);

        let result = recognizer.identify(&sample()).unwrap();

        assert_eq!(result, Some(Identification::new("Faust - IV")));
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0, "fpcalc-lookup");
        assert_eq!(calls[0].1[0], "--json");
        assert!(calls[0].1[1].ends_with("sample.wav"));

        let written = crate::audio::wav::read_wav(recognizer.scratch_path()).unwrap();
        assert_eq!(written, sample());
    }

    #[test]
    fn test_empty_stdout_is_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = recognizer(MockCommandExecutor::default(), &dir);
        assert_eq!(recognizer.identify(&sample()).unwrap(), None);
    }

    #[test]
    fn test_command_failure_is_recognition_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = MockCommandExecutor {
            fail: true,
            ..Default::default()
        };
        let recognizer = recognizer(executor, &dir);
        assert!(matches!(
            recognizer.identify(&sample()),
            Err(NeedledropError::Recognition { .. })
        ));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let result = CommandRecognizer::new(vec![], PathBuf::from("/tmp/x.wav"), Duration::ZERO);
        assert!(result.is_err());
    }

    #[test]
    fn test_name_is_program() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = recognizer(MockCommandExecutor::default(), &dir);
        assert_eq!(recognizer.name(), "fpcalc-lookup");
    }

    #[test]
    fn test_system_executor_captures_stdout() {
        let out = SystemCommandExecutor
            .execute("echo", &["hello".to_string()], Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_system_executor_nonzero_exit_is_error() {
        let result = SystemCommandExecutor.execute("false", &[], Duration::from_secs(5));
        assert!(matches!(result, Err(NeedledropError::Recognition { .. })));
    }

    #[test]
    fn test_system_executor_times_out() {
        let started = Instant::now();
        let result = SystemCommandExecutor.execute(
            "sleep",
            &["5".to_string()],
            Duration::from_millis(200),
        );
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_system_executor_drains_chatty_stderr() {
        let script = "head -c 262144 /dev/zero >&2; echo done".to_string();
        let out = SystemCommandExecutor
            .execute("sh", &["-c".to_string(), script], Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.trim(), "done");
    }
}

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::reply;

const COMMAND_READ_BUFFER_SIZE: usize = 1024;

/// Sent once before the first real command. The empty command only reads the
/// banner up to the first prompt.
pub const SESSION_SETTINGS: &[&str] = &[
    "",
    "set pagination off",
    // keeps `th=0x...` markers on the line of their frame
    "set width 0",
    "set print elements unlimited",
    "set print repeats unlimited",
];

/// Request/response channel to an expression-evaluating debugger.
///
/// Every call blocks until the reply is framed by the ready prompt. There is
/// no timeout: a wedged debugger blocks the caller.
pub trait Debugger {
    /// Sends `command` and returns the raw reply, prompt line included.
    fn execute(&mut self, command: &str) -> Result<String>;

    /// Detaches from the target, quits and closes the pipes.
    fn shutdown(&mut self) -> Result<()>;

    /// Readies a fresh session for scripted use. Printed values are never
    /// elided, so quoted strings carry the whole object.
    fn prepare(&mut self) -> Result<()> {
        for setting in SESSION_SETTINGS {
            self.execute(setting)?;
        }
        Ok(())
    }

    /// Value of a `$N = value` reply, `None` if the reply has another shape.
    fn try_value(&mut self, command: &str) -> Result<Option<String>> {
        let response = self.execute(command)?;
        Ok(reply::scalar(&response).map(|s| s.as_str().to_string()))
    }

    /// Like [`Debugger::try_value`] but an unexpected shape yields empty text.
    fn execute_for_value(&mut self, command: &str) -> Result<String> {
        Ok(self.try_value(command)?.unwrap_or_default())
    }

    /// Address of a `(type_name *) 0xHEX` reply.
    fn execute_for_pointer(&mut self, command: &str, type_name: &'static str) -> Result<u64> {
        let response = self.execute(command)?;
        reply::typed_pointer(&response, type_name).ok_or_else(|| Error::InvalidPointer {
            expected: type_name,
            reply: response.trim_end_matches(reply::PROMPT).trim().to_string(),
        })
    }
}

/// A gdb subprocess driven over its standard streams.
pub struct Gdb {
    process: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    /// Drains diagnostics so a full stderr pipe never stalls gdb.
    stderr_reader: Option<JoinHandle<()>>,
    args: Vec<OsString>,
}

impl Gdb {
    /// Launches `gdb -silent -nw <executable> <target>`. The session still has
    /// to be prepared with [`Debugger::prepare`].
    pub fn start(gdb_path: &Path, executable: &Path, target: &str) -> Result<Self> {
        let args: Vec<OsString> = vec![
            gdb_path.into(),
            "-silent".into(),
            "-nw".into(),
            executable.into(),
            target.into(),
        ];

        let mut process = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn(gdb_path.display().to_string(), e))?;

        let stdin = process.stdin.take();
        let stdout = process.stdout.take();
        let stderr = process.stderr.take();
        let (Some(_), Some(_), Some(stderr)) = (&stdin, &stdout, stderr) else {
            let _ = process.kill();
            let _ = process.wait();
            return Err(Error::Spawn(
                gdb_path.display().to_string(),
                std::io::Error::other("failed to create pipes to gdb process"),
            ));
        };

        let stderr_reader = thread::Builder::new()
            .name("gdb-stderr".to_string())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    log_gdb("E", &line);
                }
            });
        let stderr_reader = match stderr_reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = process.kill();
                let _ = process.wait();
                return Err(Error::Spawn(gdb_path.display().to_string(), e));
            }
        };

        Ok(Gdb {
            process,
            stdin,
            stdout,
            stderr_reader: Some(stderr_reader),
            args,
        })
    }

    /// Command line used to launch the debugger.
    pub fn command_line(&self) -> String {
        self.args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn send(&mut self, command: &str) -> Result<()> {
        if command.is_empty() {
            return Ok(());
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::SendCommand(command.to_string()))?;
        writeln!(stdin, "{command}")
            .and_then(|_| stdin.flush())
            .map_err(|_| Error::SendCommand(command.to_string()))
    }

    fn read_response(&mut self) -> Vec<u8> {
        match self.stdout.as_mut() {
            Some(stdout) => read_until_prompt(stdout),
            None => Vec::new(),
        }
    }

    fn close_pipes(&mut self) {
        self.stdin.take();
        self.stdout.take();
    }

    /// Waits for gdb to exit, then for its stderr to reach end of stream.
    fn reap(&mut self) {
        if let Err(e) = self.process.wait() {
            warn!("failed to wait for gdb: {e}");
        }
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
    }
}

/// Reads chunks until the prompt line, end of stream or a read error.
fn read_until_prompt(reader: &mut impl Read) -> Vec<u8> {
    let mut response = Vec::new();
    let mut buf = [0u8; COMMAND_READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(e) => {
                debug!("gdb output closed: {e}");
                break;
            }
        }
        if reply::ends_with_prompt(&response) {
            break;
        }
    }
    response
}

fn log_gdb(pre: &str, message: &str) {
    if log::log_enabled!(log::Level::Debug) {
        for line in message.lines() {
            debug!("{pre}: {line}");
        }
    }
}

impl Debugger for Gdb {
    fn execute(&mut self, command: &str) -> Result<String> {
        log_gdb("C", command);
        self.send(command)?;
        let response = String::from_utf8_lossy(&self.read_response()).into_owned();
        log_gdb("R", &response);
        Ok(response)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.stdin.is_none() {
            return Ok(());
        }
        let detached = self
            .execute("detach")
            .and_then(|_| self.execute("quit"))
            .map(|_| ());
        self.close_pipes();
        self.reap();
        detached
    }
}

impl Drop for Gdb {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            // closing stdin makes gdb exit on its own
            self.close_pipes();
            self.reap();
        }
    }
}

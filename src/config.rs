use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static OPTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+)=(.+)$").unwrap());

/// What gdb is pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A live process, stopped by attaching and resumed afterwards.
    Process(Pid),
    /// A crash image.
    Core(PathBuf),
}

impl Target {
    pub fn parse(core_or_pid: &str) -> Self {
        if !core_or_pid.is_empty() && core_or_pid.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(pid) = core_or_pid.parse() {
                return Target::Process(Pid::from_raw(pid));
            }
        }
        Target::Core(PathBuf::from(core_or_pid))
    }

    /// Last argument of the gdb command line.
    pub fn gdb_arg(&self) -> String {
        match self {
            Target::Process(pid) => pid.to_string(),
            Target::Core(path) => path.display().to_string(),
        }
    }
}

/// Free-form `KEY=VALUE` options with typed lookup.
#[derive(Debug, Default, Clone)]
pub struct Options {
    map: HashMap<String, String>,
}

impl Options {
    pub fn insert(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }

    /// An empty value or `0` is false.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.map
            .get(key)
            .map_or(default, |v| !(v.is_empty() || v == "0"))
    }

    pub fn number(&self, key: &str, default: i64) -> i64 {
        self.map
            .get(key)
            .map_or(default, |v| crate::reply::leading_int(v))
    }

    pub fn string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.map.get(key).map_or(default, String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: Target,
    pub executable: PathBuf,
    pub gdb: PathBuf,
    pub options: Options,
}

impl Config {
    /// Builds the configuration from the trailing command line arguments:
    /// `TARGET [EXECUTABLE] [KEY=VALUE]...`. Without an explicit debugger
    /// path the `gdb` option is used, then `gdb` from `PATH`.
    pub fn from_args(gdb: Option<PathBuf>, args: &[String]) -> Result<Self> {
        let mut options = Options::default();
        let mut positional = Vec::new();
        for arg in args {
            match OPTION_RE.captures(arg) {
                Some(caps) => options.insert(&caps[1], &caps[2]),
                None => positional.push(arg.as_str()),
            }
        }

        let target = Target::parse(positional.first().copied().unwrap_or_default());
        let executable = match positional.get(1) {
            Some(exe) => PathBuf::from(exe),
            None => match &target {
                Target::Process(pid) => find_ruby_executable(*pid)?,
                Target::Core(_) => return Err(Error::ExecutableNotFound),
            },
        };

        let gdb = gdb.unwrap_or_else(|| PathBuf::from(options.string("gdb", "gdb")));
        Ok(Config {
            target,
            executable,
            gdb,
            options,
        })
    }
}

fn find_ruby_executable(pid: Pid) -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(exe) = std::fs::read_link(format!("/proc/{pid}/exe")) {
            return Ok(exe);
        }
    }

    let rbenv = which(&["rbenv", "which", "ruby"]);
    if let Some(exe) = rbenv.filter(|p| p.exists()) {
        return Ok(exe);
    }
    which(&["which", "ruby"]).ok_or(Error::ExecutableNotFound)
}

fn which(command: &[&str]) -> Option<PathBuf> {
    let output = Command::new(command[0]).args(&command[1..]).output().ok()?;
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!("`{}` resolved ruby to `{path}`", command.join(" "));
    (!path.is_empty()).then(|| Path::new(&path).to_path_buf())
}

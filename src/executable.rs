use std::fs;
use std::path::Path;

use log::{debug, warn};
use object::{Object, ObjectSymbol};

use crate::error::Result;

/// Globals the trace evaluates, looked up by name in the executable.
pub const RUNTIME_SYMBOLS: &[&str] = &["ruby_current_thread", "ruby_version"];

#[derive(Debug)]
pub struct ExecutableInfo {
    pub format: object::BinaryFormat,
    /// Runtime globals defined by the executable itself.
    pub defined: Vec<&'static str>,
}

impl ExecutableInfo {
    pub fn missing(&self) -> impl Iterator<Item = &'static str> + '_ {
        RUNTIME_SYMBOLS
            .iter()
            .copied()
            .filter(|name| !self.defined.contains(name))
    }
}

/// Checks that `path` is an object file and which runtime globals it defines.
pub fn inspect(path: &Path) -> Result<ExecutableInfo> {
    let data = fs::read(path)?;
    let info = inspect_bytes(&data)?;
    debug!("{}: {:?} object, defines {:?}", path.display(), info.format, info.defined);

    let missing: Vec<_> = info.missing().collect();
    if !missing.is_empty() {
        warn!(
            "{} does not define {}, expecting them from a shared libruby",
            path.display(),
            missing.join(", ")
        );
    }
    Ok(info)
}

fn inspect_bytes(data: &[u8]) -> Result<ExecutableInfo> {
    let file = object::File::parse(data)?;
    let defined = RUNTIME_SYMBOLS
        .iter()
        .copied()
        .filter(|wanted| {
            file.symbols()
                .chain(file.dynamic_symbols())
                .any(|sym| sym.is_definition() && sym.name().is_ok_and(|name| name == *wanted))
        })
        .collect();

    Ok(ExecutableInfo {
        format: file.format(),
        defined,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_rejects_non_object_files() {
        let result = inspect_bytes(b"#!/bin/sh\nexec ruby \"$@\"\n");
        assert!(matches!(result, Err(Error::ObjParsing(_))));
    }

    #[test]
    fn test_missing_symbols() {
        let info = ExecutableInfo {
            format: object::BinaryFormat::Elf,
            defined: vec!["ruby_version"],
        };
        assert_eq!(info.missing().collect::<Vec<_>>(), vec!["ruby_current_thread"]);
    }

    #[test]
    fn test_inspect_own_binary() {
        let exe = std::env::current_exe().unwrap();
        let info = inspect(&exe).unwrap();
        assert!(info.defined.is_empty());
    }
}

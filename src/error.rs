#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- session errors --------------------------------------------
    #[error("failed to spawn debugger `{0}`: {1}")]
    Spawn(String, std::io::Error),
    #[error("failed to send command: [{0}]")]
    SendCommand(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // --------------------------------- reply expectation errors ----------------------------------
    #[error("invalid pointer, expected `{expected} *`: {reply}")]
    InvalidPointer { expected: &'static str, reply: String },
    #[error("unknown ruby version")]
    UnknownVersion,
    #[error("unsupported ruby version {0}")]
    UnsupportedVersion(String),
    #[error("cannot find current thread id in gdb (th=0x{0:x})")]
    ThreadNotFound(u64),
    #[error("cannot classify value `{0}`")]
    Unclassified(String),

    // --------------------------------- hash table errors -----------------------------------------
    #[error("packed table layout not supported: {0}")]
    PackedTable(String),
    #[error("table {0} does not use numeric hash and compare functions")]
    NonNumericTable(String),

    // --------------------------------- startup errors --------------------------------------------
    #[error("failed to detect ruby executable")]
    ExecutableNotFound,
    #[error("object file parsing error: {0}")]
    ObjParsing(#[from] object::Error),
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

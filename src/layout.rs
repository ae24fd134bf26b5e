//! Interpreter internals the decoder knows how to read, keyed by version.

use crate::error::{Error, Result};

/// Names and constants of one interpreter internals revision.
#[derive(Debug, PartialEq, Eq)]
pub struct Layout {
    /// Version prefix this layout applies to, e.g. `2.0.`.
    pub family: &'static str,
    pub current_thread: &'static str,
    pub thread_type: &'static str,
    pub iseq_type: &'static str,
    pub frame_type: &'static str,
    pub top_iseq_type: &'static str,
    pub symbol_table: &'static str,
    pub numeric_hash_fn: &'static str,
    pub numeric_compare_fn: &'static str,
    /// `FL_USER1`, set when string bytes live outside the object.
    pub string_noembed: u64,
    pub cfunc_frame_magic: u64,
    pub frame_magic_mask: u64,
}

pub const RUBY_2_0: Layout = Layout {
    family: "2.0.",
    current_thread: "ruby_current_thread",
    thread_type: "rb_thread_t",
    iseq_type: "rb_iseq_t",
    frame_type: "rb_control_frame_t",
    top_iseq_type: "ISEQ_TYPE_TOP",
    symbol_table: "global_symbols.id_str",
    numeric_hash_fn: "st_numhash",
    numeric_compare_fn: "st_numcmp",
    string_noembed: 1 << (12 + 1),
    cfunc_frame_magic: 0x61,
    frame_magic_mask: !(!0u64 << 8),
};

const LAYOUTS: &[&Layout] = &[&RUBY_2_0];

impl Layout {
    /// Layout for a `ruby_version` string, unknown versions are rejected.
    pub fn for_version(version: &str) -> Result<&'static Layout> {
        let version = version.trim().trim_matches('"');
        if version.is_empty() {
            return Err(Error::UnknownVersion);
        }
        LAYOUTS
            .iter()
            .copied()
            .find(|layout| version.starts_with(layout.family))
            .ok_or_else(|| Error::UnsupportedVersion(version.to_string()))
    }
}

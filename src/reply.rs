//! Shapes of the replies gdb sends back on its standard output.
//!
//! Every matcher returns `None` when the reply does not have the expected
//! shape. Callers decide whether that means "no value" or a layout mismatch.

use once_cell::sync::Lazy;
use regex::Regex;

/// Literal prompt gdb prints when it is ready for the next command.
pub const PROMPT: &str = "(gdb) ";

static SCALAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A\$\d+ =\s+(.+)").unwrap());
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"0x\w+\s+"(.*)""#).unwrap());
static THREAD_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\A[\s\*]+(\d+)").unwrap());
static THREAD_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(th=(0x[0-9a-f]+)").unwrap());
static HEX_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(0x[0-9a-f]+)\z").unwrap());

/// Value part of a `$N = value` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar<'a> {
    /// Anything other than a pointer-annotated string literal.
    Text(&'a str),
    /// Inner text of a `0x... "text"` string reply.
    Quoted(&'a str),
}

impl<'a> Scalar<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            Scalar::Text(s) | Scalar::Quoted(s) => s,
        }
    }
}

pub fn scalar(reply: &str) -> Option<Scalar<'_>> {
    let value = SCALAR_RE.captures(reply)?.get(1)?.as_str();
    match QUOTED_RE.captures(value).and_then(|c| c.get(1)) {
        Some(quoted) => Some(Scalar::Quoted(quoted.as_str())),
        None => Some(Scalar::Text(value)),
    }
}

/// Address of a `(type *) 0xHEX` reply, `type` must match exactly.
pub fn typed_pointer(reply: &str, type_name: &str) -> Option<u64> {
    let pattern = format!(r"\({} \*\) (0x[0-9a-f]+)", regex::escape(type_name));
    let re = Regex::new(&pattern).ok()?;
    let hex = re.captures(reply)?.get(1)?.as_str();
    parse_number(hex)
}

/// Thread number of an `info threads` line, the active thread is starred.
pub fn thread_line(line: &str) -> Option<u32> {
    THREAD_LINE_RE.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Ruby thread pointer found in a native frame argument list (`th=0x...`).
pub fn thread_marker(line: &str) -> Option<u64> {
    parse_number(THREAD_MARKER_RE.captures(line)?.get(1)?.as_str())
}

/// Trailing address of a value such as `(st_table_entry *) 0x6021a0`.
pub fn hex_tail(value: &str) -> Option<u64> {
    parse_number(HEX_TAIL_RE.captures(value.trim_end())?.get(1)?.as_str())
}

/// Lines of a raw reply up to, not including, the prompt line.
pub fn until_prompt(reply: &str) -> impl Iterator<Item = &str> {
    reply
        .split_inclusive('\n')
        .take_while(|line| *line != PROMPT)
        .map(|line| line.trim_end_matches('\n'))
}

/// True once the last line of `buf` is the bare prompt.
pub fn ends_with_prompt(buf: &[u8]) -> bool {
    let last_line = match buf.iter().rposition(|&b| b == b'\n') {
        Some(pos) => &buf[pos + 1..],
        None => buf,
    };
    last_line == PROMPT.as_bytes()
}

/// Parses decimal, `0x` hex, or a negative decimal (two's complement).
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16).ok();
    }
    if text.starts_with('-') {
        return text.parse::<i64>().ok().map(|n| n as u64);
    }
    text.parse().ok()
}

/// Leading integer of a value, 0 when there is none.
pub fn leading_int(text: &str) -> i64 {
    let text = text.trim();
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(text.len(), |(i, _)| i);
    text[..end].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_extracts_value() {
        assert_eq!(scalar("$1 = 42\n(gdb) "), Some(Scalar::Text("42")));
        assert_eq!(
            scalar("$12 = ISEQ_TYPE_METHOD\n(gdb) ").map(|s| s.as_str()),
            Some("ISEQ_TYPE_METHOD")
        );
        assert_eq!(scalar("$3 =   RUBY_T_CLASS\n(gdb) ").map(|s| s.as_str()), Some("RUBY_T_CLASS"));
    }

    #[test]
    fn test_scalar_extracts_quoted_string() {
        assert_eq!(
            scalar("$2 = 0x7ffff7ff2a10 \"/tmp/a.rb\"\n(gdb) "),
            Some(Scalar::Quoted("/tmp/a.rb"))
        );
        assert_eq!(scalar("$2 = 0x601010 \"\"\n(gdb) "), Some(Scalar::Quoted("")));
        // a bare char array is not pointer annotated
        assert_eq!(scalar("$1 = \"2.0.0\"\n(gdb) "), Some(Scalar::Text("\"2.0.0\"")));
    }

    #[test]
    fn test_scalar_rejects_other_shapes() {
        assert_eq!(scalar("No symbol \"foo\" in current context.\n(gdb) "), None);
        assert_eq!(scalar("(gdb) "), None);
        assert_eq!(scalar(""), None);
    }

    #[test]
    fn test_typed_pointer() {
        let reply = "$4 = (rb_thread_t *) 0x601a30\n(gdb) ";
        assert_eq!(typed_pointer(reply, "rb_thread_t"), Some(0x601a30));
        assert_eq!(typed_pointer(reply, "rb_iseq_t"), None);
        assert_eq!(typed_pointer("$5 = 0\n(gdb) ", "rb_thread_t"), None);
    }

    #[test]
    fn test_thread_lines() {
        assert_eq!(thread_line("* 1    Thread 0x7ffff7fd8700 (LWP 100) main"), Some(1));
        assert_eq!(thread_line("  12   Thread 0x7ffff1ef3700 (LWP 112) poll"), Some(12));
        assert_eq!(thread_line("  Id   Target Id         Frame"), None);
        assert_eq!(thread_line("(gdb) "), None);
    }

    #[test]
    fn test_thread_marker() {
        let line = "#3  0x00005 in thread_start_func_2 (th=0x601a30, stack_start=0x7ffe) at thread.c:511";
        assert_eq!(thread_marker(line), Some(0x601a30));
        assert_eq!(thread_marker("#0  0x00007 in poll () from /lib/libc.so.6"), None);
    }

    #[test]
    fn test_until_prompt_stops_at_prompt_line() {
        let reply = "#0  main () at main.c:3\n#1  start ()\n(gdb) ";
        let lines: Vec<_> = until_prompt(reply).collect();
        assert_eq!(lines, vec!["#0  main () at main.c:3", "#1  start ()"]);
    }

    #[test]
    fn test_prompt_detection() {
        assert!(ends_with_prompt(b"$1 = 1\n(gdb) "));
        assert!(ends_with_prompt(b"(gdb) "));
        assert!(!ends_with_prompt(b"$1 = 1\n(gdb"));
        assert!(!ends_with_prompt(b"echo (gdb) "));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse_number("0x1f"), Some(31));
        assert_eq!(parse_number("93825000000000"), Some(93825000000000));
        assert_eq!(parse_number("-1"), Some(u64::MAX));
        assert_eq!(parse_number("RUBY_Qnil"), None);
        assert_eq!(hex_tail("(st_table_entry *) 0x6021a0"), Some(0x6021a0));
        assert_eq!(hex_tail("0x0"), Some(0));
        assert_eq!(leading_int("17"), 17);
        assert_eq!(leading_int("-3"), -3);
        assert_eq!(leading_int("12 '\\f'"), 12);
        assert_eq!(leading_int(""), 0);
    }
}

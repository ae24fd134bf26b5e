use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::io::Write;

use log::{debug, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::config::{Options, Target};
use crate::error::{Error, Result};
use crate::gdb::Debugger;
use crate::layout::Layout;
use crate::reply;
use crate::ruby::{ObjectType, RubyInternal, ValueType};

/// Default bound on the number of control frames walked.
pub const MAX_FRAMES: usize = 30;

/// Ruby thread pointer to gdb thread number.
pub type ThreadMap = HashMap<u64, u32>;

/// One line of the ruby backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub callee: String,
    /// Always empty, argument values are not read.
    pub args: String,
    /// `path:line`, `None` when a C frame has no ruby caller to borrow from.
    pub location: Option<String>,
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location.as_deref().unwrap_or("(unknown)");
        write!(f, "{}({}) <- {}", self.callee, self.args, location)
    }
}

/// Frame and iseq expressions of a ruby level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub cfp: String,
    pub iseq: String,
}

/// Last ruby level frame seen during one walk. C frames have no position of
/// their own and report the one of the ruby frame that called them.
#[derive(Debug, Clone, Default)]
pub struct LocationContext {
    pub previous: Option<Location>,
}

/// Maps every ruby thread to the gdb thread running it, by looking for the
/// `th=0x...` argument in each native backtrace.
pub fn thread_map<D: Debugger + ?Sized>(dbg: &mut D) -> Result<ThreadMap> {
    // one line per thread once pagination is off
    let listing = dbg.execute("info threads")?;
    let mut map = ThreadMap::new();
    for gdb_thread in listing.lines().filter_map(reply::thread_line) {
        dbg.execute(&format!("thread {gdb_thread}"))?;
        let backtrace = dbg.execute("backtrace")?;
        let Some(ruby_thread) = backtrace.lines().find_map(reply::thread_marker) else {
            continue;
        };
        match map.entry(ruby_thread) {
            Entry::Vacant(e) => {
                e.insert(gdb_thread);
            }
            Entry::Occupied(e) => warn!(
                "ruby thread 0x{ruby_thread:x} found in gdb threads {} and {gdb_thread}",
                e.get()
            ),
        }
    }
    Ok(map)
}

fn source_path<D: Debugger + ?Sized>(ri: &mut RubyInternal<'_, D>, iseq: &str) -> Result<String> {
    let path = ri.string_at(&format!("{iseq}->location.absolute_path"))?;
    if !path.is_empty() {
        return Ok(path);
    }
    ri.string_at(&format!("{iseq}->location.path"))
}

fn source_location<D: Debugger + ?Sized>(
    ri: &mut RubyInternal<'_, D>,
    location: &Location,
) -> Result<String> {
    let path = source_path(ri, &location.iseq)?;
    let line = ri.source_line(&location.cfp, &location.iseq)?;
    Ok(format!("{path}:{line}"))
}

/// Name of the class `self` is, empty unless `self` is a class.
fn class_name<D: Debugger + ?Sized>(ri: &mut RubyInternal<'_, D>, cfp: &str) -> Result<String> {
    let self_value = ri.value(&format!("p {cfp}->self"))?;
    match ri.classify(&self_value) {
        Ok(ValueType::Object(ObjectType::Class)) => ri.value(&format!("p rb_class2name({cfp}->self)")),
        Ok(_) => Ok(String::new()),
        Err(e) => {
            warn!("{cfp}->self: {e}");
            Ok(String::new())
        }
    }
}

/// Describes the control frame `offset` slots above the current one.
///
/// Top level iseqs and frames that are neither ruby nor C yield `None`.
pub fn resolve_frame<D: Debugger + ?Sized>(
    ri: &mut RubyInternal<'_, D>,
    offset: usize,
    ctx: &mut LocationContext,
) -> Result<Option<FrameDescriptor>> {
    let layout = ri.layout();
    let cfp = format!("({}->cfp + {offset})", layout.current_thread);
    let iseq = format!("{cfp}->iseq");

    let iseq_ptr = ri
        .debugger()
        .execute_for_pointer(&format!("p {iseq}"), layout.iseq_type)?;
    if iseq_ptr != 0 {
        let iseq_type = ri.value(&format!("p {iseq}->type"))?;
        if iseq_type == layout.top_iseq_type {
            return Ok(None);
        }

        let location = Location { cfp, iseq };
        let source = source_location(ri, &location)?;
        let label = ri.string_at(&format!("{}->location.label", location.iseq))?;
        let base_label = ri.string_at(&format!("{}->location.base_label", location.iseq))?;
        let class_name = class_name(ri, &location.cfp)?;
        debug!("frame {offset}: {label} (base {base_label}) at {source}");

        let callee = match (label.is_empty(), class_name.is_empty()) {
            (true, _) => "(unknown)".to_string(),
            (false, true) => label,
            (false, false) => format!("{class_name}#{label}"),
        };
        ctx.previous = Some(location);
        return Ok(Some(FrameDescriptor {
            callee,
            args: String::new(),
            location: Some(source),
        }));
    }

    if ri.is_cfunc_frame(&cfp)? {
        let mid = ri.value(&format!(
            "p {cfp}->me->def ? {cfp}->me->def->original_id : {cfp}->me->called_id"
        ))?;
        let callee = ri.symbol_name(&mid)?;
        let location = match &ctx.previous {
            Some(previous) => Some(source_location(ri, previous)?),
            None => {
                debug!("frame {offset}: no ruby caller for {callee}");
                None
            }
        };
        return Ok(Some(FrameDescriptor {
            callee,
            args: String::new(),
            location,
        }));
    }

    Ok(None)
}

/// Walks the newest `min(max_frames, frame_count)` frames, oldest first.
pub fn walk_frames<D: Debugger + ?Sized>(
    ri: &mut RubyInternal<'_, D>,
    frame_count: i64,
    max_frames: usize,
    ctx: &mut LocationContext,
) -> Result<Vec<FrameDescriptor>> {
    let depth = max_frames.min(usize::try_from(frame_count).unwrap_or(0));
    let mut frames = Vec::with_capacity(depth);
    for offset in (0..depth).rev() {
        if let Some(frame) = resolve_frame(ri, offset, ctx)? {
            frames.push(frame);
        }
    }
    Ok(frames)
}

/// Report lines, current frame first with the highest number.
pub fn render(frames: &[FrameDescriptor]) -> Vec<String> {
    let count = frames.len();
    frames
        .iter()
        .rev()
        .enumerate()
        .map(|(i, frame)| format!("[{}] {frame}", count - i))
        .collect()
}

fn send_continue(pid: Pid) -> nix::Result<()> {
    signal::kill(pid, Signal::SIGCONT)
}

/// Runs one trace over a debugger session and writes the report to `out`.
///
/// The session is always shut down once, and an attached process is resumed,
/// whether the trace succeeds or not.
pub struct Tracer<D: Debugger, W: Write> {
    dbg: D,
    out: W,
    target: Target,
    options: Options,
    resume: Box<dyn FnMut(Pid) -> nix::Result<()>>,
    detached: bool,
}

impl<D: Debugger, W: Write> Tracer<D, W> {
    pub fn new(dbg: D, target: Target, options: Options, out: W) -> Self {
        Self {
            dbg,
            out,
            target,
            options,
            resume: Box::new(send_continue),
            detached: false,
        }
    }

    pub fn trace(&mut self) -> Result<()> {
        let result = self.report();
        let teardown = self.teardown();
        result.and(teardown)
    }

    fn report(&mut self) -> Result<()> {
        self.dbg.prepare()?;
        if self.options.flag("env", true) {
            self.show_environ()?;
        }
        let layout = self.show_ruby_version()?;
        self.show_backtrace(layout)
    }

    fn show_environ(&mut self) -> Result<()> {
        writeln!(self.out, "environ:")?;
        for i in 0.. {
            let entry = self
                .dbg
                .execute_for_value(&format!("p ((char **)environ)[{i}]"))?;
            if entry.is_empty() || entry == "0x0" {
                break;
            }
            writeln!(self.out, "{entry}")?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn show_ruby_version(&mut self) -> Result<&'static Layout> {
        let version = self
            .dbg
            .try_value("p ruby_version")?
            .ok_or(Error::UnknownVersion)?;
        writeln!(self.out, "ruby_version:")?;
        writeln!(self.out, "{version}")?;
        writeln!(self.out)?;
        Layout::for_version(&version)
    }

    fn select_thread(&mut self, layout: &Layout) -> Result<()> {
        let map = thread_map(&mut self.dbg)?;
        let current = self
            .dbg
            .execute_for_pointer(&format!("p {}", layout.current_thread), layout.thread_type)?;
        let gdb_thread = map.get(&current).ok_or(Error::ThreadNotFound(current))?;
        self.dbg.execute(&format!("thread {gdb_thread}"))?;
        Ok(())
    }

    fn show_c_backtrace(&mut self) -> Result<()> {
        let response = self.dbg.execute("bt")?;
        writeln!(self.out, "c_backtrace:")?;
        for line in reply::until_prompt(&response) {
            writeln!(self.out, "{line}")?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn frame_count(&mut self, layout: &Layout) -> Result<i64> {
        let Layout {
            current_thread: th,
            frame_type,
            ..
        } = *layout;
        let count = self.dbg.execute_for_value(&format!(
            "p ({frame_type} *)({th}->stack + {th}->stack_size) - {th}->cfp"
        ))?;
        Ok(reply::leading_int(&count))
    }

    fn show_backtrace(&mut self, layout: &'static Layout) -> Result<()> {
        self.select_thread(layout)?;
        if self.options.flag("c_trace", true) {
            self.show_c_backtrace()?;
        }

        writeln!(self.out, "ruby_backtrace:")?;
        let frame_count = self.frame_count(layout)?;
        let max_frames = usize::try_from(self.options.number("max_frames", MAX_FRAMES as i64))
            .unwrap_or(MAX_FRAMES);
        // frames cut off by max_frames leave the oldest C frames without a caller
        let mut ctx = LocationContext::default();
        let mut ri = RubyInternal::new(&mut self.dbg, layout);
        let frames = walk_frames(&mut ri, frame_count, max_frames, &mut ctx)?;
        for line in render(&frames) {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        if self.detached {
            return Ok(());
        }
        self.detached = true;

        let shutdown = self.dbg.shutdown();
        if let Err(e) = &shutdown {
            warn!("gdb shutdown: {e}");
        }
        if let Target::Process(pid) = self.target {
            (self.resume)(pid).map_err(|e| Error::Syscall("kill", e))?;
        }
        shutdown
    }
}

impl<D: Debugger, W: Write> Drop for Tracer<D, W> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("teardown: {e}");
        }
    }
}

#[cfg(test)]
impl<D: Debugger, W: Write> Tracer<D, W> {
    fn with_resume(mut self, resume: impl FnMut(Pid) -> nix::Result<()> + 'static) -> Self {
        self.resume = Box::new(resume);
        self
    }
}

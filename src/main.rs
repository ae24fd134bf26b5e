use std::io;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{LevelFilter, warn};

mod config;
mod error;
mod executable;
mod gdb;
mod layout;
mod reply;
mod ruby;
#[cfg(test)]
mod testing;
mod tracer;

use config::Config;
use gdb::Gdb;
use tracer::Tracer;

/// Shows the ruby level call trace of a running ruby process or a core file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// gdb executable, defaults to the `gdb` option or `gdb` in PATH
    #[arg(long)]
    gdb: Option<PathBuf>,

    /// PROCESS_ID [RUBY_EXECUTABLE] or CORE_FILE RUBY_EXECUTABLE, followed by
    /// OPTION=VALUE pairs (env, c_trace, verbose_gdb, max_frames)
    #[arg(required = true, value_name = "ARGS")]
    args: Vec<String>,
}

fn init_logger(verbose_gdb: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose_gdb {
        builder.filter_module("rbtrace::gdb", LevelFilter::Debug);
    }
    builder.init();
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{}", failure_message(&e));
        process::exit(1);
    }
}

fn failure_message(e: &error::Error) -> String {
    format!("rbtrace: {e}")
}

fn run(args: Args) -> error::Result<()> {
    let config = Config::from_args(args.gdb, &args.args)?;
    init_logger(config.options.flag("verbose_gdb", false));

    if let Err(e) = executable::inspect(&config.executable) {
        warn!("cannot inspect {}: {e}", config.executable.display());
    }

    let gdb = Gdb::start(&config.gdb, &config.executable, &config.target.gdb_arg())?;
    println!("command:");
    println!("{}", gdb.command_line());
    println!();

    let mut tracer = Tracer::new(gdb, config.target, config.options, io::stdout().lock());
    tracer.trace()
}

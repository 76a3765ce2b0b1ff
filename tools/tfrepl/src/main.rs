use std::{
    fs,
    io::{self, BufRead, Write},
    panic,
    path::{Path, PathBuf},
};

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use tforth::{Forth, Params};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Targets, prelude::*};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// forth source files to run, in order, before reading from stdin.
    files: Vec<PathBuf>,

    /// a TOML file with VM sizing parameters.
    ///
    /// any of `data_stack_elems`, `return_stack_elems`, `temp_stack_elems`,
    /// `self_stack_elems`, `input_buf_elems` and `output_buf_elems` may be
    /// given; missing keys keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// a comma-separated list of `tracing` targets and levels to enable.
    ///
    /// for example, `warn,tforth::vm=trace` traces every step of the inner
    /// interpreter.
    ///
    /// see <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/targets/struct.Targets.html#filtering-with-targets>
    /// for more details on this syntax.
    #[arg(
        short,
        long = "trace",
        env = "TFORTH_TRACE",
        default_value_t = Targets::new().with_default(LevelFilter::WARN),
    )]
    trace_filter: Targets,
}

fn main() -> miette::Result<()> {
    let Args {
        files,
        config,
        trace_filter,
    } = Args::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .without_time(),
        )
        .with(trace_filter)
        .init();
    // The VM turns panics in native words into `NativeFault` errors and logs
    // them itself.
    panic::set_hook(Box::new(|info| tracing::debug!(%info, "panicked")));

    let params = match config {
        Some(path) => load_params(&path)?,
        None => Params::default(),
    };
    let mut forth = Forth::new(params, (), Forth::FULL_BUILTINS)
        .into_diagnostic()
        .context("failed to create the forth VM")?;

    for path in &files {
        run_file(&mut forth, path)?;
    }
    repl(&mut forth)
}

fn load_params(path: &Path) -> miette::Result<Params> {
    let text = fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text)
        .into_diagnostic()
        .with_context(|| format!("invalid config in {}", path.display()))
}

fn run_line(forth: &mut Forth<()>, line: &str) -> Result<(), tforth::Error> {
    forth.output.clear();
    forth.input.fill(line)?;
    let res = forth.process_line();
    print!("{}", forth.output.as_str());
    forth.output.clear();
    res
}

fn run_file(forth: &mut Forth<()>, path: &Path) -> miette::Result<()> {
    let text = fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("failed to read {}", path.display()))?;
    tracing::info!(path = %path.display(), "loading");
    for (lineno, line) in text.lines().enumerate() {
        run_line(forth, line)
            .into_diagnostic()
            .with_context(|| format!("{}:{}: {line}", path.display(), lineno + 1))?;
    }
    Ok(())
}

fn repl(forth: &mut Forth<()>) -> miette::Result<()> {
    let stdin = io::stdin();
    let mut inp = String::new();
    loop {
        print!("> ");
        io::stdout().flush().into_diagnostic()?;
        inp.clear();
        let read = stdin.lock().read_line(&mut inp).into_diagnostic()?;
        if read == 0 {
            println!();
            return Ok(());
        }
        if let Err(e) = run_line(forth, inp.trim_end()) {
            println!();
            println!("error: {e}");
        }
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use pipespawn_launcher::{Launcher, LauncherConfig, ProcessState, ProcessStateRecord, StreamSlot};

/// Run a command through the pipespawn launcher
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Pipe tag for the child's named pipes
    #[arg(short, long, default_value_t = 1)]
    tag: i32,

    /// Feed the child's input through a named pipe
    #[arg(long)]
    pipe_stdin: bool,

    /// Read the child's output through a named pipe
    #[arg(long)]
    pipe_stdout: bool,

    /// Read the child's error output through a named pipe
    #[arg(long, conflicts_with = "merge_stderr")]
    pipe_stderr: bool,

    /// Send the child's error output into its output pipe
    #[arg(long)]
    merge_stderr: bool,

    /// Query the state once instead of waiting for the child to finish
    #[arg(long)]
    no_wait: bool,

    /// Executable followed by its arguments
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

impl Args {
    fn slots(&self) -> (StreamSlot, StreamSlot, StreamSlot) {
        let input = if self.pipe_stdin {
            StreamSlot::ProcessOwnedIn
        } else {
            StreamSlot::StandardIn
        };
        let output = if self.pipe_stdout || self.merge_stderr {
            StreamSlot::ProcessOwnedOut
        } else {
            StreamSlot::StandardOut
        };
        let error = if self.merge_stderr {
            StreamSlot::ProcessOwnedOut
        } else if self.pipe_stderr {
            StreamSlot::ProcessOwnedErr
        } else {
            StreamSlot::StandardErr
        };
        (input, output, error)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.debug)?;

    let config = match args.config {
        Some(ref path) => {
            info!("Config file: {}", path.display());
            LauncherConfig::load_from_file(path)?
        }
        None => LauncherConfig::default(),
    };

    let launcher = Launcher::new(config);
    launcher.initialize();

    let executable = args.command.first().context("No command given")?;
    let (input, output, error) = args.slots();
    let mut handle = launcher
        .launch(executable, args.command.as_slice(), input, output, error, args.tag)
        .with_context(|| format!("Failed to launch {}", executable))?;
    info!("Started {} as process {}", executable, handle.pid());

    // Not joined: it stays blocked on our stdin after the child is gone.
    if let Some(mut stream) = handle.take_input() {
        thread::Builder::new()
            .name("stdin-pump".to_string())
            .spawn(move || {
                if let Err(e) = io::copy(&mut io::stdin().lock(), &mut stream) {
                    debug!("stdin pump stopped: {}", e);
                }
                if let Err(e) = stream.close() {
                    debug!("Closing child input failed: {}", e);
                }
            })
            .context("Failed to start stdin pump")?;
    }

    let mut pumps = Vec::new();
    if let Some(stream) = handle.take_output() {
        pumps.push(pump("stdout-pump", stream, io::stdout)?);
    }
    if let Some(stream) = handle.take_error() {
        pumps.push(pump("stderr-pump", stream, io::stderr)?);
    }
    for pump in pumps {
        if pump.join().is_err() {
            warn!("Output pump panicked");
        }
    }

    let record = launcher.retrieve_state(handle.pid(), !args.no_wait);
    eprintln!("{}: {}", handle.pid(), record);

    if let Err(e) = launcher.delete_pipes(handle) {
        warn!("Pipe cleanup failed: {}", e);
    }

    std::process::exit(exit_code(&record))
}

fn pump<R, W, F>(name: &str, mut source: R, sink: F) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    W: Write,
    F: FnOnce() -> W + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let mut sink = sink();
            if let Err(e) = io::copy(&mut source, &mut sink) {
                debug!("{} stopped: {}", thread_name, e);
            }
            let _ = sink.flush();
        })
        .with_context(|| format!("Failed to start {}", name))
}

/// Shell convention: the exit code, or 128 + signal for a killed child.
fn exit_code(record: &ProcessStateRecord) -> i32 {
    match record.state {
        ProcessState::Done => record.exit_code,
        ProcessState::Terminated => 128 + record.exit_code,
        ProcessState::Running | ProcessState::Stopped => 0,
    }
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

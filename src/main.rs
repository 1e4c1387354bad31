use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use tunnelvision::{
    lock, tui, AcceptMode, Bridge, Buffer, CircuitRegistry, Config, EditorSession, Router,
    SessionState, StateStore,
};

#[derive(Parser, Debug)]
#[command(name = "tunnelvision")]
#[command(author, version, about = "Terminal editor that routes prompts through AI tunnels")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<tracing::Level>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a file in the editor (default: the last file edited)
    Edit {
        file: Option<PathBuf>,

        /// Circuit to start with
        #[arg(short, long)]
        circuit: Option<String>,

        /// When responses are written into the buffer
        #[arg(short, long, value_enum)]
        accept_mode: Option<AcceptMode>,
    },

    /// Send one prompt and print the response
    Ask {
        /// Circuit to use (a leading @name in the prompt also works)
        #[arg(short, long)]
        circuit: Option<String>,

        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },

    /// List tunnels and whether each backend is reachable
    Tunnels,

    /// List circuits
    Circuits,

    /// Initialize tunnelvision in current directory
    Init,

    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "Error:".red(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    if !matches!(args.command, Command::Edit { .. }) {
        init_stderr_logging(args.log_level);
    }

    match args.command {
        Command::Init => {
            let cwd = std::env::current_dir().context("Could not get current directory")?;
            tunnelvision::init::init_project(&cwd).map_err(anyhow::Error::msg)
        }

        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Args::command(), "tunnelvision", &mut io::stdout());
            Ok(())
        }

        Command::Edit {
            file,
            circuit,
            accept_mode,
        } => edit(file, circuit, accept_mode, args.log_level),

        Command::Ask { circuit, prompt } => {
            let config = Config::load();
            let state = load_state().map(|store| store.load_or_default()).unwrap_or_default();
            let bridge = Bridge::new(Arc::new(build_router(&config, circuit, &state)))
                .context("Could not start worker runtime")?;
            println!("{}", bridge.send_blocking(&prompt.join(" ")));
            Ok(())
        }

        Command::Tunnels => {
            let config = Config::load();
            let tunnels = config.build_tunnels();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Could not start runtime")?;

            println!("{:<12} {:<12} TIMEOUT", "TUNNEL", "STATUS");
            println!("{}", "-".repeat(40));
            for name in tunnels.names() {
                let Some(tunnel) = tunnels.get(name) else {
                    continue;
                };
                let status = if runtime.block_on(tunnel.is_available()) {
                    "available".green()
                } else {
                    "unavailable".red()
                };
                println!("{:<12} {:<12} {}s", name, status, tunnel.timeout().as_secs());
            }
            Ok(())
        }

        Command::Circuits => {
            let config = Config::load();
            let circuits = config.build_circuits(Arc::new(config.build_tunnels()));
            let default = config.default_circuit();

            println!("  {:<12} {:<10} TUNNELS", "CIRCUIT", "KIND");
            println!("{}", "-".repeat(50));
            for circuit in circuits.circuits() {
                let marker = if circuit.name() == default { "*" } else { " " };
                let kind = match circuit.kind().label() {
                    "chain" => "chain".cyan(),
                    "parallel" => "parallel".magenta(),
                    "fallback" => "fallback".yellow(),
                    other => other.white(),
                };
                println!(
                    "{} {:<12} {:<10} {}",
                    marker,
                    circuit.name(),
                    kind,
                    circuit.tunnels().join(" → ")
                );
            }
            Ok(())
        }
    }
}

fn edit(
    file: Option<PathBuf>,
    circuit: Option<String>,
    accept_mode: Option<AcceptMode>,
    log_level: Option<tracing::Level>,
) -> anyhow::Result<()> {
    let store = load_state();
    if let Some(store) = &store {
        init_file_logging(store, log_level)?;
    }

    let config = Config::load();
    let state = store
        .as_ref()
        .map(|s| s.load_or_default())
        .unwrap_or_default();

    let file = file.or_else(|| state.last_file.clone());
    let _lock = match &file {
        Some(path) => Some(lock::acquire(path)?),
        None => None,
    };
    let buffer = match &file {
        Some(path) => Buffer::open(path)?,
        None => Buffer::new(),
    };

    let router = build_router(&config, circuit, &state);
    let bridge = Bridge::new(Arc::new(router)).context("Could not start worker runtime")?;
    let accept_mode = accept_mode
        .or(state.accept_mode)
        .unwrap_or_else(|| config.accept_mode());

    let mut session = EditorSession::new(bridge, buffer, accept_mode);
    tracing::info!(
        circuit = %session.current_circuit(),
        accept_mode = %accept_mode,
        file = ?file,
        "editor started"
    );

    let result = tui::run(&mut session);

    if let Some(store) = &store {
        if let Err(e) = store.save(&session.state()) {
            tracing::warn!(error = %e, "could not save state");
        }
    }
    result
}

/// `--circuit` beats the remembered circuit, which beats the configured default
fn build_router(config: &Config, circuit: Option<String>, state: &SessionState) -> Router {
    let tunnels = Arc::new(config.build_tunnels());
    let circuits: Arc<CircuitRegistry> = Arc::new(config.build_circuits(tunnels));
    let default = circuit
        .or_else(|| state.resolve_circuit(&circuits).map(str::to_string))
        .unwrap_or_else(|| config.default_circuit().to_string());
    Router::new(circuits, default)
}

fn load_state() -> Option<StateStore> {
    match StateStore::default_location() {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "session state disabled");
            None
        }
    }
}

fn init_stderr_logging(level: Option<tracing::Level>) {
    if let Some(level) = level {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(level.to_string()))
            .with_writer(io::stderr)
            .init();
    }
}

/// The editor owns the terminal, so its logs go to `<data dir>/tunnelvision.log`
fn init_file_logging(store: &StateStore, level: Option<tracing::Level>) -> anyhow::Result<()> {
    std::fs::create_dir_all(store.dir())
        .with_context(|| format!("Could not create {}", store.dir().display()))?;
    let path = store.dir().join("tunnelvision.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Could not open {}", path.display()))?;

    let filter = match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

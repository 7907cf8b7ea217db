//! termctl - run one controlled shell session in the host terminal
//!
//! The host terminal does the emulation; termctl owns the process lifecycle,
//! resize negotiation and shell integration around it.
//!
//! # Quick Start
//!
//! ```text
//! termctl                  # Start with the configured or platform shell
//! termctl --shell bash     # Start bash
//! termctl --cwd ~/src      # Start in a directory
//! ```
//!
//! # Keybindings (Ctrl+B prefix)
//!
//! | Key | Action |
//! |-----|--------|
//! | q | Quit |
//! | k | Kill the process |
//! | r | Relaunch |
//! | d | Detach and quit |
//! | c | Copy output to clipboard |
//! | v / ] | Paste |
//! | l | Clear |

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{self, SetTitle};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use termctl::backend::default_backend;
use termctl::config::Config;
use termctl::core::addons::BuiltinAddonLoader;
use termctl::core::dimensions::Dimensions;
use termctl::core::{
    InitialSize, ProcessContext, RenderContext, SessionEvent, SessionId, SessionManager,
};
use termctl::ui::{encode_key, KeyAction, KeyModes, PassthroughInput, PassthroughTerminal, PrefixKeys};

/// Command line options
#[derive(Default)]
struct Args {
    shell: Option<String>,
    cwd: Option<PathBuf>,
    no_shell_integration: bool,
    verbose: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest wait for input when no resize is due
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

fn print_version() {
    eprintln!("termctl {}", VERSION);
}

fn print_help() {
    eprintln!("termctl {} - Terminal session controller", VERSION);
    eprintln!();
    eprintln!("Usage: termctl [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <CMD>          Shell to run (default: config or platform shell)");
    eprintln!("  -C, --cwd <DIR>            Starting directory");
    eprintln!("  --no-shell-integration     Do not inject shell integration");
    eprintln!("  --verbose                  Debug logging");
    eprintln!("  -v, --version              Show version");
    eprintln!("  -h, --help                 Show this help");
    eprintln!();
    eprintln!("Keybindings (Ctrl+B prefix):");
    eprintln!("  Ctrl+B, q                  Quit");
    eprintln!("  Ctrl+B, k                  Kill the process");
    eprintln!("  Ctrl+B, r                  Relaunch the shell");
    eprintln!("  Ctrl+B, d                  Detach (leave the process running) and quit");
    eprintln!("  Ctrl+B, c                  Copy output to the clipboard");
    eprintln!("  Ctrl+B, v or ]             Paste from the clipboard");
    eprintln!("  Ctrl+B, l                  Clear");
    eprintln!("  Ctrl+B, Ctrl+B             Send a literal Ctrl+B");
    eprintln!();
    eprintln!("Configuration: ~/.termctl/config.toml");
    eprintln!("Log file:      ~/.termctl/termctl.log");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                parsed.shell = Some(args[i].clone());
            }
            "-C" | "--cwd" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing directory argument".to_string());
                }
                parsed.cwd = Some(PathBuf::from(&args[i]));
            }
            "--no-shell-integration" => {
                parsed.no_shell_integration = true;
            }
            "--verbose" => {
                parsed.verbose = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to `~/.termctl/termctl.log`; logging is skipped if the file can't be opened
fn init_logging(level: &str) {
    let log_path = Config::data_dir()
        .map(|dir| dir.join("termctl.log"))
        .unwrap_or_else(|| PathBuf::from("termctl.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Command line overrides the config file
    let mut config = Config::load();
    if let Some(shell) = args.shell {
        config.shell = Some(shell);
    }
    if args.cwd.is_some() {
        config.cwd = args.cwd;
    }
    if args.no_shell_integration {
        config.shell_integration.enabled = false;
    }

    let level = if args.verbose { "debug".to_string() } else { config.log_level.clone() };
    init_logging(&level);
    info!("termctl {} starting...", VERSION);

    // Set environment variable so child processes can detect termctl
    env::set_var("TERMCTL", "1");
    env::set_var("TERMCTL_VERSION", VERSION);

    let (cols, rows) = terminal::size()?;
    info!("Terminal size: {}x{}", cols, rows);

    let vt = PassthroughTerminal::new(io::stdout(), config.font.metrics());
    let input = vt.input();
    let modes = vt.modes();

    let mut manager = SessionManager::new(config.session_options());
    let (id, events) = manager.create_session(
        config.launch_config(),
        InitialSize::Grid(Dimensions::new(cols, rows)),
        ProcessContext {
            backend: default_backend(),
            resolver: Box::new(config.launch_resolver()),
        },
        RenderContext {
            terminal: Box::new(vt),
            addon_loader: Box::new(BuiltinAddonLoader),
        },
    );

    terminal::enable_raw_mode()?;
    let result = run_main_loop(&mut manager, id, &events, &input, &modes);

    // Dispose before leaving raw mode so the tail of the output lands first
    manager.dispose_all();
    let _ = terminal::disable_raw_mode();
    print!("\x1b[0m");
    let _ = io::stdout().flush();

    for event in events.try_iter() {
        if let SessionEvent::Exited(exit) = event {
            if let Some(message) = exit.message {
                eprintln!("{}", message);
            }
        }
    }

    if let Err(e) = &result {
        error!("Main loop failed: {}", e);
    }
    info!("termctl exiting");
    result
}

fn run_main_loop(
    manager: &mut SessionManager,
    id: SessionId,
    events: &Receiver<SessionEvent>,
    input: &PassthroughInput,
    modes: &Mutex<KeyModes>,
) -> anyhow::Result<()> {
    let mut prefix = PrefixKeys::new();

    loop {
        let removed = manager.poll_all();
        if removed.contains(&id) || manager.get(id).is_none() {
            info!("Session {} ended", id);
            break;
        }

        for event in events.try_iter() {
            match event {
                SessionEvent::TitleChanged(title) => {
                    let _ = execute!(io::stdout(), SetTitle(title));
                }
                SessionEvent::Exited(exit) => {
                    info!("Session exited: {:?}", exit);
                }
                other => {
                    debug!("Session event: {:?}", other);
                }
            }
        }

        // Wake up in time for a debounced resize
        let timeout = manager
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).min(POLL_TIMEOUT))
            .unwrap_or(POLL_TIMEOUT);
        if !event::poll(timeout)? {
            continue;
        }

        let Some(session) = manager.get_mut(id) else {
            break;
        };

        match event::read()? {
            Event::Key(key) if key.kind != KeyEventKind::Release => match prefix.handle(&key) {
                KeyAction::Send => {
                    let current = modes.lock().map(|m| *m).unwrap_or_default();
                    if let Some(bytes) = encode_key(&key, current) {
                        if !input.send(&bytes) {
                            warn!("Dropped keystroke: session input is closed");
                        }
                    }
                }
                KeyAction::Pending => {}
                KeyAction::Quit => {
                    info!("Quit requested");
                    break;
                }
                KeyAction::Kill => session.kill(),
                KeyAction::Relaunch => session.relaunch(None),
                KeyAction::Detach => {
                    if let Some(persistent) = session.detach(true) {
                        info!("Detached process {} ({})", persistent.id, persistent.executable);
                    }
                    break;
                }
                KeyAction::Copy => {
                    session.select_all();
                    if !session.copy_selection() {
                        warn!("Nothing copied");
                    }
                }
                KeyAction::Paste => session.paste(),
                KeyAction::Clear => session.clear(),
                KeyAction::ScrollUp => session.scroll_lines(-(session.dimensions().rows as i32)),
                KeyAction::ScrollDown => session.scroll_lines(session.dimensions().rows as i32),
            },
            Event::Resize(cols, rows) => {
                info!("Host resized to {}x{}", cols, rows);
                manager.resize_all(Dimensions::new(cols, rows));
            }
            Event::FocusGained => session.focus_changed(true),
            Event::FocusLost => session.focus_changed(false),
            Event::Paste(text) => session.send_text(&text, false),
            _ => {}
        }
    }

    Ok(())
}

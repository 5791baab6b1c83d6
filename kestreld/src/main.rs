//! The Kestrel node CLI: header sync plus a small wallet surface.
//!
//! Exit codes: 0 success, 2 invalid arguments, 3 insufficient funds,
//! 4 bad password, 5 chain not synced, 10 unexpected error.

mod commands;
mod exit;

use gumdrop::Options;
use tracing_subscriber::EnvFilter;

use exit::ExitCode;

#[derive(Debug, Options)]
struct Args {
    /// Print this help message.
    #[options(help = "print help")]
    help: bool,

    #[options(command)]
    command: Option<Command>,
}

#[derive(Debug, Options)]
enum Command {
    /// Download and verify block headers from peers.
    #[options(help = "sync the header chain from peers")]
    ChainSync(commands::ChainSyncOpts),

    /// Wallet operations.
    #[options(help = "create and operate a wallet")]
    Wallet(commands::WalletOpts),
}

fn init_tracing() {
    // KESTREL_LOG_LEVEL overrides the default of info; RUST_LOG still
    // wins when set, for compatibility with the wider ecosystem.
    let level = std::env::var("KESTREL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    init_tracing();
    let _ = color_eyre::install();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match Args::parse_args_default(&args) {
        Ok(parsed) => parsed,
        Err(error) => {
            eprintln!("error: {}", error);
            eprintln!("{}", Args::usage());
            std::process::exit(ExitCode::InvalidArgs as i32);
        }
    };

    if parsed.help_requested() || parsed.command.is_none() {
        println!("{}", Args::usage());
        println!("\nCommands:\n{}", Command::usage());
        std::process::exit(if parsed.command.is_none() && !parsed.help_requested() {
            ExitCode::InvalidArgs as i32
        } else {
            ExitCode::Success as i32
        });
    }

    let code = match parsed.command.expect("checked above") {
        Command::ChainSync(opts) => commands::chain_sync(opts),
        Command::Wallet(opts) => commands::wallet(opts),
    };
    std::process::exit(code as i32);
}

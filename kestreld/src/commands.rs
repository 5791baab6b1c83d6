//! Command implementations.

use std::convert::TryFrom;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use gumdrop::Options;
use tracing::{error, info, warn};

use kestrel_chain::amount::{Amount, NonNegative};
use kestrel_chain::parameters::Network;
use kestrel_chain::transparent::Address;
use kestrel_network::bloom::{BloomFilter, UpdateFlag};
use kestrel_network::{NetworkEvent, PeerGroup, StaticDiscovery};
use kestrel_state::ChainStore;
use kestrel_wallet::{BalanceType, SendRequest, Wallet, WalletStore};

use crate::exit::ExitCode;

const WALLET_FILE: &str = "wallet.dat";

/// Options shared by every command.
fn data_dir(flag: &Option<PathBuf>) -> PathBuf {
    flag.clone()
        .or_else(|| std::env::var("KESTREL_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn network(flag: &Option<String>) -> Result<Network, ExitCode> {
    let name = flag
        .clone()
        .or_else(|| std::env::var("KESTREL_NETWORK").ok())
        .unwrap_or_else(|| "main".to_string());
    name.parse().map_err(|error| {
        eprintln!("error: {}", error);
        ExitCode::InvalidArgs
    })
}

/// Parse a decimal BTC amount into satoshis.
fn parse_btc(input: &str) -> Option<i64> {
    let mut parts = input.splitn(2, '.');
    let whole: i64 = parts.next()?.parse().ok()?;
    let fraction_str = parts.next().unwrap_or("0");
    if fraction_str.len() > 8 || fraction_str.chars().any(|c| !c.is_ascii_digit()) {
        return None;
    }
    let mut padded = fraction_str.to_string();
    while padded.len() < 8 {
        padded.push('0');
    }
    let fraction: i64 = padded.parse().ok()?;
    whole
        .checked_mul(kestrel_chain::amount::COIN)?
        .checked_add(fraction)
}

#[derive(Debug, Options)]
pub struct ChainSyncOpts {
    #[options(help = "print help")]
    help: bool,
    #[options(help = "data directory", meta = "P")]
    data_dir: Option<PathBuf>,
    #[options(help = "network: main, test, or regtest", meta = "N")]
    network: Option<String>,
    #[options(help = "comma-separated peer addresses", meta = "ip:port[,...]")]
    peers: Option<String>,
}

pub fn chain_sync(opts: ChainSyncOpts) -> ExitCode {
    let network = match network(&opts.network) {
        Ok(network) => network,
        Err(code) => return code,
    };
    let data_dir = data_dir(&opts.data_dir);

    let peers: Vec<SocketAddr> = match opts
        .peers
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse())
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(peers) if !peers.is_empty() => peers,
        Ok(_) => {
            eprintln!("error: at least one --peers address is required");
            return ExitCode::InvalidArgs;
        }
        Err(error) => {
            eprintln!("error: bad peer address: {}", error);
            return ExitCode::InvalidArgs;
        }
    };

    let store_config = kestrel_state::Config {
        cache_dir: data_dir.clone(),
        ..Default::default()
    };
    let store = match ChainStore::open(&store_config, network) {
        Ok(store) => Arc::new(store),
        Err(error) => {
            error!(%error, "failed to open header store");
            return ExitCode::Unexpected;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to start runtime");
            return ExitCode::Unexpected;
        }
    };

    let network_config = kestrel_network::Config {
        network,
        initial_peers: peers,
        ..Default::default()
    };

    runtime.block_on(async move {
        let (group, mut events, peer_events) =
            PeerGroup::new(network_config, store.clone(), Box::new(StaticDiscovery(vec![])));

        let runner = group.clone();
        let run = tokio::spawn(async move { runner.run(peer_events).await });

        // If a wallet exists beside the store, watch for its
        // transactions while syncing.
        let wallet_path = data_dir.join(WALLET_FILE);
        let mut wallet = WalletStore::new(&wallet_path)
            .load(network, Default::default())
            .ok();
        if let Some(wallet) = wallet.as_ref() {
            let mut filter = BloomFilter::new(
                wallet.filter_elements().len().max(100),
                0.001,
                UpdateFlag::All,
            );
            for element in wallet.filter_elements() {
                filter.insert(&element);
            }
            group.load_filter(filter).await;
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted; shutting down");
                    break;
                }
                event = events.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    handle_network_event(event, &store, wallet.as_mut());
                }
            }
        }

        group.shutdown();
        run.abort();

        if let Some(mut wallet) = wallet {
            let mut saver = WalletStore::new(&wallet_path);
            if let Err(error) = saver.save(&mut wallet) {
                warn!(%error, "failed to save wallet at shutdown");
            }
        }
        ExitCode::Success
    })
}

fn handle_network_event(event: NetworkEvent, store: &ChainStore, wallet: Option<&mut Wallet>) {
    match event {
        NetworkEvent::ChainAdvanced(chain_event) => {
            if let Some(tip) = chain_event.connected.last() {
                if tip.height.0 % 1000 == 0 || chain_event.is_reorg() {
                    info!(height = tip.height.0, hash = %tip.hash(), "chain advanced");
                }
            }
            if let Some(wallet) = wallet {
                let _ = wallet.reorganize(&chain_event);
            }
        }
        NetworkEvent::FilteredBlock { hash, matched, .. } => {
            if wallet.is_some() {
                if let Ok(Some(stored)) = store.get(&hash) {
                    for txid in matched {
                        // The transactions themselves arrive as separate
                        // tx messages and land via receive_pending; the
                        // match tells us which block they belong to.
                        info!(%txid, height = stored.height.0, "wallet transaction matched");
                    }
                }
            }
        }
        NetworkEvent::TransactionRelayed { transaction, from } => {
            if let Some(wallet) = wallet {
                match wallet.receive_pending((*transaction).clone(), Some(from)) {
                    Ok(true) => info!(txid = %transaction.hash(), "wallet transaction received"),
                    Ok(false) => {} // filter false positive
                    Err(error) => warn!(%error, "failed to apply relayed transaction"),
                }
            }
        }
    }
}

#[derive(Debug, Options)]
pub struct WalletOpts {
    #[options(help = "print help")]
    help: bool,
    #[options(command)]
    command: Option<WalletCommand>,
}

#[derive(Debug, Options)]
pub enum WalletCommand {
    #[options(help = "create a new wallet")]
    New(WalletNewOpts),
    #[options(help = "send coins")]
    Send(WalletSendOpts),
    #[options(help = "show the balance")]
    Balance(WalletBalanceOpts),
}

#[derive(Debug, Options)]
pub struct WalletNewOpts {
    #[options(help = "print help")]
    help: bool,
    #[options(help = "data directory", meta = "P")]
    data_dir: Option<PathBuf>,
    #[options(help = "network: main, test, or regtest", meta = "N")]
    network: Option<String>,
    #[options(help = "encrypt the wallet with a passphrase")]
    encrypted: bool,
    #[options(help = "passphrase for --encrypted", meta = "PW")]
    password: Option<String>,
}

#[derive(Debug, Options)]
pub struct WalletSendOpts {
    #[options(help = "print help")]
    help: bool,
    #[options(help = "data directory", meta = "P")]
    data_dir: Option<PathBuf>,
    #[options(help = "network: main, test, or regtest", meta = "N")]
    network: Option<String>,
    #[options(help = "destination address", meta = "ADDR")]
    to: Option<String>,
    #[options(help = "amount in BTC", meta = "BTC")]
    amount: Option<String>,
    #[options(help = "fee rate in satoshis per kilobyte", meta = "SAT")]
    fee_per_kb: Option<u64>,
    #[options(help = "wallet passphrase, when encrypted", meta = "PW")]
    password: Option<String>,
}

#[derive(Debug, Options)]
pub struct WalletBalanceOpts {
    #[options(help = "print help")]
    help: bool,
    #[options(help = "data directory", meta = "P")]
    data_dir: Option<PathBuf>,
    #[options(help = "network: main, test, or regtest", meta = "N")]
    network: Option<String>,
    #[options(help = "show the estimated (pending-inclusive) balance")]
    estimated: bool,
    #[options(help = "show the available (confirmed) balance")]
    available: bool,
}

pub fn wallet(opts: WalletOpts) -> ExitCode {
    match opts.command {
        Some(WalletCommand::New(opts)) => wallet_new(opts),
        Some(WalletCommand::Send(opts)) => wallet_send(opts),
        Some(WalletCommand::Balance(opts)) => wallet_balance(opts),
        None => {
            eprintln!("error: wallet requires a subcommand (new, send, balance)");
            ExitCode::InvalidArgs
        }
    }
}

fn wallet_new(opts: WalletNewOpts) -> ExitCode {
    let network = match network(&opts.network) {
        Ok(network) => network,
        Err(code) => return code,
    };
    let data_dir = data_dir(&opts.data_dir);
    let path = data_dir.join(WALLET_FILE);
    if path.exists() {
        eprintln!("error: {} already exists", path.display());
        return ExitCode::InvalidArgs;
    }

    let now = chrono::Utc::now().timestamp() as u32;
    let mut wallet = match Wallet::new(network, Default::default(), now) {
        Ok(wallet) => wallet,
        Err(error) => {
            error!(%error, "failed to create wallet");
            return ExitCode::Unexpected;
        }
    };

    let address = match wallet.fresh_receive_address() {
        Ok(address) => address,
        Err(error) => {
            error!(%error, "failed to derive an address");
            return ExitCode::Unexpected;
        }
    };

    // Show the mnemonic exactly once, before encryption locks it away.
    match wallet.keychain().seed().mnemonic() {
        Ok(mnemonic) => {
            println!("recovery phrase: {}", mnemonic);
        }
        Err(_) => {}
    }

    if opts.encrypted {
        let password = match opts.password.as_deref() {
            Some(password) if !password.is_empty() => password,
            _ => {
                eprintln!("error: --encrypted requires --password");
                return ExitCode::InvalidArgs;
            }
        };
        if let Err(error) = wallet.keychain_mut().encrypt(password) {
            error!(%error, "failed to encrypt wallet");
            return ExitCode::Unexpected;
        }
    }

    let mut store = WalletStore::new(&path);
    if let Err(error) = store.save(&mut wallet) {
        error!(%error, "failed to save new wallet");
        return ExitCode::Unexpected;
    }

    println!("wallet created: {}", path.display());
    println!("first receive address: {}", address);
    ExitCode::Success
}

fn wallet_send(opts: WalletSendOpts) -> ExitCode {
    let network = match network(&opts.network) {
        Ok(network) => network,
        Err(code) => return code,
    };
    let data_dir = data_dir(&opts.data_dir);
    let path = data_dir.join(WALLET_FILE);

    let (to, amount) = match (&opts.to, &opts.amount) {
        (Some(to), Some(amount)) => (to, amount),
        _ => {
            eprintln!("error: wallet send requires --to and --amount");
            return ExitCode::InvalidArgs;
        }
    };

    let destination: Address = match to.parse() {
        Ok(address) => address,
        Err(_) => {
            eprintln!("error: unparseable address {:?}", to);
            return ExitCode::InvalidArgs;
        }
    };
    let amount: Amount<NonNegative> = match parse_btc(amount).and_then(|sats| {
        Amount::try_from(sats).ok()
    }) {
        Some(amount) => amount,
        None => {
            eprintln!("error: unparseable amount {:?}", amount);
            return ExitCode::InvalidArgs;
        }
    };

    let mut store = WalletStore::new(&path);
    let mut wallet = match store.load(network, Default::default()) {
        Ok(wallet) => wallet,
        Err(error) => {
            error!(%error, "failed to load wallet");
            return ExitCode::Unexpected;
        }
    };

    // A wallet that has never seen a block cannot know its coins.
    if wallet.last_block_seen().is_none() {
        eprintln!("error: chain not synced; run chain-sync first");
        return ExitCode::ChainNotSynced;
    }

    if wallet.keychain().is_encrypted() {
        let password = match opts.password.as_deref() {
            Some(password) => password,
            None => {
                eprintln!("error: wallet is encrypted; pass --password");
                return ExitCode::BadPassword;
            }
        };
        if let Err(error) = wallet.keychain_mut().decrypt(password) {
            eprintln!("error: {}", error);
            return ExitCode::BadPassword;
        }
    }

    let mut request = SendRequest::to(&destination, amount);
    if let Some(rate) = opts.fee_per_kb {
        request.fee_per_kb = Amount::try_from(rate).ok();
    }

    let tx = match wallet.complete_tx(request) {
        Ok(tx) => tx,
        Err(error) => {
            eprintln!("error: {}", error);
            return ExitCode::from_wallet_error(&error);
        }
    };
    let txid = tx.hash();

    if let Err(error) = wallet.commit_tx(tx) {
        error!(%error, "failed to commit transaction");
        return ExitCode::Unexpected;
    }
    if let Err(error) = store.save(&mut wallet) {
        error!(%error, "failed to save wallet");
        return ExitCode::Unexpected;
    }

    println!("transaction committed: {}", txid);
    println!("broadcast it with chain-sync running, or import it elsewhere");
    ExitCode::Success
}

fn wallet_balance(opts: WalletBalanceOpts) -> ExitCode {
    let network = match network(&opts.network) {
        Ok(network) => network,
        Err(code) => return code,
    };
    let data_dir = data_dir(&opts.data_dir);
    let path = data_dir.join(WALLET_FILE);

    let wallet = match WalletStore::new(&path).load(network, Default::default()) {
        Ok(wallet) => wallet,
        Err(error) => {
            error!(%error, "failed to load wallet");
            return ExitCode::Unexpected;
        }
    };

    match (opts.estimated, opts.available) {
        (true, true) => {
            eprintln!("error: choose one of --estimated or --available");
            ExitCode::InvalidArgs
        }
        (true, false) => {
            println!("{}", wallet.balance(BalanceType::Estimated));
            ExitCode::Success
        }
        _ => {
            println!("{}", wallet.balance(BalanceType::Available));
            ExitCode::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_amounts_parse() {
        assert_eq!(parse_btc("1"), Some(100_000_000));
        assert_eq!(parse_btc("0.5"), Some(50_000_000));
        assert_eq!(parse_btc("0.00000001"), Some(1));
        assert_eq!(parse_btc("21000000"), Some(2_100_000_000_000_000));
        assert_eq!(parse_btc("0.000000001"), None); // too many places
        assert_eq!(parse_btc("abc"), None);
        assert_eq!(parse_btc("1.2.3"), None);
    }
}

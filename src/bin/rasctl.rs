//! rasctl - command-line front end for rasbridge
//!
//! Lists connections, devices and phonebook entries, dials an entry and
//! hangs up connections. Runs against `rasapi32.dll` on Windows and against
//! the simulated backend everywhere else.

use log::{debug, error, info, warn};
use rasbridge::{
    config::Config,
    dialer::DialState,
    error::{RasError, Result},
    RasClient, RasHandle,
};
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;

const USAGE: &str = "\
usage: rasctl [--config <file>] <command>

commands:
  list                        active connections
  devices                     RAS-capable devices
  entries [phonebook]         phonebook entries
  status <handle>             status of a connection
  dial <entry> [phonebook]    dial an entry, Ctrl+C cancels
  hangup <handle>             hang up a connection";

#[tokio::main]
async fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = match take_config(&mut args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rasctl: {e}");
            process::exit(2);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    debug!("rasctl v{}", rasbridge::VERSION);

    if args.is_empty() {
        eprintln!("{USAGE}");
        process::exit(2);
    }

    let client = match open_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to open RAS client: {}", e);
            process::exit(1);
        }
    };
    info!("Capability level {}", client.capability());

    if let Err(e) = run(&client, &args).await {
        error!("{}", e);
        if let Some(code) = e.native_code() {
            if let Ok(text) = client.error_description(code as u32) {
                eprintln!("{code}: {text}");
            }
        }
        process::exit(1);
    }
}

/// Strip `--config <file>` from the arguments and load it
fn take_config(args: &mut Vec<String>) -> Result<Config> {
    match args.iter().position(|a| a == "--config") {
        Some(at) => {
            let path = args
                .get(at + 1)
                .cloned()
                .ok_or_else(|| RasError::Config("--config needs a file".to_string()))?;
            args.drain(at..=at + 1);
            let config = Config::from_file(&path)?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

#[cfg(windows)]
fn open_client(config: Config) -> Result<RasClient> {
    RasClient::system(config)
}

#[cfg(not(windows))]
fn open_client(config: Config) -> Result<RasClient> {
    use rasbridge::marshal::{Entry, VpnStrategy};
    use rasbridge::native::simulated::{DialScript, SimulatedRas};
    use rasbridge::Capability;
    use std::sync::Arc;
    use std::time::Duration;

    warn!("rasapi32.dll is not available on this host; using the simulated backend");
    let sim = Arc::new(SimulatedRas::new(Capability::Win8));
    sim.insert_entry(
        None,
        Entry::vpn("Office", "vpn.example.com", VpnStrategy::Ikev2First),
    );
    sim.set_dial_script(DialScript::connect(Duration::from_millis(200)));
    RasClient::new(sim, config)
}

async fn run(client: &RasClient, args: &[String]) -> Result<()> {
    let arg = |i: usize| args.get(i).map(String::as_str);
    match (arg(0), arg(1)) {
        (Some("list"), _) => {
            let connections = client.connections()?;
            if connections.is_empty() {
                println!("no active connections");
            }
            for conn in connections {
                println!(
                    "{:#x}\t{}\t{}\t{}",
                    conn.handle.id(),
                    conn.entry_name,
                    conn.device.name,
                    conn.phonebook_path
                );
            }
        }
        (Some("devices"), _) => {
            for device in client.devices()? {
                println!("{}\t{}", device.device_type, device.name);
            }
        }
        (Some("entries"), phonebook) => {
            for entry in client.entry_names(phonebook.map(Path::new))? {
                println!("{}\t{}", entry.name, entry.phonebook_path);
            }
        }
        (Some("status"), Some(handle)) => {
            let handle = RasHandle::borrowed(parse_handle(handle)?);
            let status = client.connection_status(&handle)?;
            println!("state:   {}", status.state);
            println!("device:  {} ({})", status.device_name, status.device_type);
            println!("number:  {}", status.phone_number);
            if let Some(local) = status.local_endpoint {
                println!("local:   {local}");
            }
            if let Some(remote) = status.remote_endpoint {
                println!("remote:  {remote}");
            }
            if let Some(code) = status.error_code {
                println!("error:   {code}");
            }
        }
        (Some("dial"), Some(entry)) => dial(client, entry, arg(2)).await?,
        (Some("hangup"), Some(handle)) => {
            let handle = RasHandle::borrowed(parse_handle(handle)?);
            client.hang_up(&handle)?;
            println!("hung up {:#x}", handle.id());
        }
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    }
    Ok(())
}

async fn dial(client: &RasClient, entry: &str, phonebook: Option<&str>) -> Result<()> {
    let mut dialer = client.dialer();
    dialer.entry_name = entry.to_string();
    if let Some(phonebook) = phonebook {
        dialer.phonebook = Some(PathBuf::from(phonebook));
    }
    dialer.on_state_changed(|event| {
        info!("{} (sub-entry {})", event.state, event.sub_entry);
    });

    info!("Dialing '{}'", entry);
    let ticket = dialer.dial_async()?;
    let completed = tokio::select! {
        completed = ticket.completed() => completed,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, cancelling dial");
            ticket.cancel();
            ticket.completed().await
        }
    };

    match completed.state() {
        DialState::Connected => {
            if let Some(handle) = &completed.handle {
                println!("connected {:#x}", handle.id());
            }
            Ok(())
        }
        state => {
            info!("Dial ended {:?}", state);
            completed.into_result().map(|_| ())
        }
    }
}

fn parse_handle(text: &str) -> Result<usize> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| RasError::InvalidHandle(format!("'{text}' is not a connection handle")))
}

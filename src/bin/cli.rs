//! ninalink CLI
//!
//! Drives a simulated co-processor whose flash image persists in a file
//! between runs.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ninalink::sim::Coprocessor;
use ninalink::{Config, Driver, PreferenceType, Preferences, Protocol, Result, Type};
use tracing_subscriber::{fmt, EnvFilter};

/// ninalink CLI
#[derive(Parser, Debug)]
#[command(name = "ninalink-cli")]
#[command(about = "Exercise the co-processor driver against a simulated chip")]
#[command(version)]
struct Args {
    /// Flash image holding preferences and files between runs
    #[arg(short, long, default_value = "./ninalink.img")]
    image: PathBuf,

    /// Per-transaction transfer cap in bytes
    #[arg(long, default_value = "4000")]
    max_transfer: usize,

    /// Dump every frame at trace level
    #[arg(long)]
    trace_frames: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a preference
    Put {
        key: String,
        value: String,

        /// How to store the value
        #[arg(short, long, value_enum, default_value = "str")]
        kind: Kind,

        #[arg(short, long, default_value = "app")]
        namespace: String,
    },

    /// Print a preference
    Get {
        key: String,

        #[arg(short, long, default_value = "app")]
        namespace: String,
    },

    /// Delete a preference
    Del {
        key: String,

        #[arg(short, long, default_value = "app")]
        namespace: String,
    },

    /// Copy a host file into storage
    Write {
        name: String,

        /// Host file to copy
        from: PathBuf,
    },

    /// Print a stored file (or copy it to a host file)
    Read {
        name: String,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete a stored file
    Rm { name: String },

    /// Send a message around a TCP loopback connection
    Echo {
        message: String,

        #[arg(short, long, default_value = "7")]
        port: u16,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Str,
    I32,
    U32,
    I64,
    U64,
    Bool,
    F64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ninalink=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    tracing::info!("ninalink CLI v{}", ninalink::VERSION);

    let chip = Coprocessor::new();
    if args.image.exists() {
        if let Err(e) = chip.load_image(&args.image) {
            tracing::error!("Failed to load flash image {:?}: {}", args.image, e);
            std::process::exit(1);
        }
    }

    let config = Config::builder()
        .max_transfer(args.max_transfer)
        .trace_frames(args.trace_frames)
        .build();
    let driver = Driver::new(chip.clone(), config);

    if let Err(e) = run(&driver, args.command) {
        tracing::error!("Command failed: {} (last error {})", e, driver.last_error());
        std::process::exit(1);
    }

    if let Err(e) = chip.save_image(&args.image) {
        tracing::error!("Failed to save flash image {:?}: {}", args.image, e);
        std::process::exit(1);
    }
}

fn run(driver: &Driver<Coprocessor>, command: Commands) -> Result<()> {
    match command {
        Commands::Put {
            key,
            value,
            kind,
            namespace,
        } => {
            let prefs = open_namespace(driver, &namespace, false)?;
            let written = put(&prefs, &key, &value, kind)?;
            println!("{} bytes written", written);
        }

        Commands::Get { key, namespace } => {
            let prefs = open_namespace(driver, &namespace, true)?;
            match render(&prefs, &key)? {
                Some(text) => println!("{}", text),
                None => println!("(not found)"),
            }
        }

        Commands::Del { key, namespace } => {
            let prefs = open_namespace(driver, &namespace, false)?;
            if prefs.remove(&key)? {
                println!("deleted");
            } else {
                println!("(not found)");
            }
        }

        Commands::Write { name, from } => {
            let data = fs::read(&from)?;
            driver.storage().write(&name, 0, &data)?;
            println!("{} bytes written to {}", data.len(), name);
        }

        Commands::Read { name, out } => {
            let storage = driver.storage();
            let len = match storage.exists(&name)? {
                Some(len) => len,
                None => {
                    println!("(not found)");
                    return Ok(());
                }
            };
            let mut buf = vec![0u8; len];
            let got = storage.read(&name, 0, &mut buf)?;
            buf.truncate(got);

            match out {
                Some(path) => {
                    fs::write(&path, &buf)?;
                    println!("{} bytes copied to {:?}", got, path);
                }
                None => println!("{}", String::from_utf8_lossy(&buf)),
            }
        }

        Commands::Rm { name } => {
            driver.storage().remove(&name)?;
            println!("removed");
        }

        Commands::Echo { message, port } => {
            let reply = echo(driver, message.as_bytes(), port)?;
            println!("{}", String::from_utf8_lossy(&reply));
        }
    }
    Ok(())
}

fn open_namespace(
    driver: &Driver<Coprocessor>,
    namespace: &str,
    read_only: bool,
) -> Result<Preferences<Coprocessor>> {
    let mut prefs = driver.preferences();
    if !prefs.begin(namespace, read_only, None)? {
        return Err(ninalink::LinkError::InvalidArgument(format!(
            "cannot open namespace {:?}",
            namespace
        )));
    }
    Ok(prefs)
}

fn put(prefs: &Preferences<Coprocessor>, key: &str, value: &str, kind: Kind) -> Result<usize> {
    let bad = |e: String| ninalink::LinkError::InvalidArgument(format!("{:?}: {}", value, e));
    match kind {
        Kind::Str => prefs.put_str(key, value),
        Kind::I32 => prefs.put(key, value.parse::<i32>().map_err(|e| bad(e.to_string()))?),
        Kind::U32 => prefs.put(key, value.parse::<u32>().map_err(|e| bad(e.to_string()))?),
        Kind::I64 => prefs.put(key, value.parse::<i64>().map_err(|e| bad(e.to_string()))?),
        Kind::U64 => prefs.put(key, value.parse::<u64>().map_err(|e| bad(e.to_string()))?),
        Kind::Bool => prefs.put(key, value.parse::<bool>().map_err(|e| bad(e.to_string()))?),
        Kind::F64 => prefs.put(key, value.parse::<f64>().map_err(|e| bad(e.to_string()))?),
    }
}

/// Format a stored value by its type tag
fn render(prefs: &Preferences<Coprocessor>, key: &str) -> Result<Option<String>> {
    let text = match prefs.get_type(key)? {
        PreferenceType::Invalid => return Ok(None),
        PreferenceType::I8 => prefs.get(key, 0i8)?.to_string(),
        PreferenceType::U8 => prefs.get(key, 0u8)?.to_string(),
        PreferenceType::I16 => prefs.get(key, 0i16)?.to_string(),
        PreferenceType::U16 => prefs.get(key, 0u16)?.to_string(),
        PreferenceType::I32 => prefs.get(key, 0i32)?.to_string(),
        PreferenceType::U32 => prefs.get(key, 0u32)?.to_string(),
        PreferenceType::I64 => prefs.get(key, 0i64)?.to_string(),
        PreferenceType::U64 => prefs.get(key, 0u64)?.to_string(),
        PreferenceType::Str => prefs.get_string(key, "")?,
        PreferenceType::Blob => {
            let mut buf = vec![0u8; prefs.bytes_length(key)?];
            let got = prefs.get_bytes(key, &mut buf)?;
            buf[..got].iter().map(|b| format!("{:02x}", b)).collect()
        }
    };
    Ok(Some(text))
}

/// Round-trip `message` through a listener and a client on the same chip
fn echo(driver: &Driver<Coprocessor>, message: &[u8], port: u16) -> Result<Vec<u8>> {
    let server = driver.socket(Type::Stream, Protocol::TCP)?;
    server.bind(port)?;
    server.listen(1)?;

    let client = driver.socket(Type::Stream, Protocol::TCP)?;
    client.connect(IpAddr::V4(Ipv4Addr::LOCALHOST), port)?;
    let (conn, peer) = server.accept()?;
    tracing::info!("Accepted connection from {}", peer);

    client.send(message)?;
    let mut buf = vec![0u8; message.len().max(1)];
    let got = conn.recv(&mut buf)?;
    conn.send(&buf[..got])?;

    let mut reply = vec![0u8; got.max(1)];
    let back = client.recv(&mut reply)?;
    reply.truncate(back);
    Ok(reply)
}

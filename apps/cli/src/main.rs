use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ptp_core::protocol::{PropForm, describe, event};
use ptp_core::session::{PtpSession, SessionConfig};
use ptp_core::transport::list_cameras;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "PTP camera tool (Pure Rust)", long_about = None)]
struct Args {
    /// Vendor ID of the camera (hex)
    #[arg(long, value_parser = parse_hex_u16, requires = "pid")]
    vid: Option<u16>,

    /// Product ID of the camera (hex)
    #[arg(long, value_parser = parse_hex_u16, requires = "vid")]
    pid: Option<u16>,

    /// Session configuration (TOML)
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached Still Image devices
    List,
    /// Print the camera's DeviceInfo
    Info,
    /// Read a property by name (e.g. fNumber) or hex code, or write it when a value is given
    Prop {
        property: String,
        value: Option<String>,
    },
    /// Print events as they arrive
    Watch {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn open_session(args: &Args) -> Result<PtpSession> {
    let config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path))?,
        None => SessionConfig::default(),
    };
    let session = match (args.vid, args.pid) {
        (Some(vid), Some(pid)) => PtpSession::open_with_ids(vid, pid, config)?,
        _ => PtpSession::open_first(config)?,
    };
    Ok(session)
}

fn list() -> Result<()> {
    let cameras = list_cameras()?;
    if cameras.is_empty() {
        println!("No PTP devices found");
    }
    for cam in cameras {
        println!(
            "{:04X}:{:04X}  {} {} (interface {})",
            cam.vendor_id,
            cam.product_id,
            cam.manufacturer.as_deref().unwrap_or("?"),
            cam.product.as_deref().unwrap_or("?"),
            cam.interface
        );
    }
    Ok(())
}

fn prop(session: &PtpSession, property: &str, value: Option<&str>) -> Result<()> {
    if let Ok(spec) = session.profile().lookup(property) {
        match value {
            Some(v) => {
                session.set_property(spec.name, v)?;
                println!("{} = {}", spec.name, session.get_property(spec.name)?);
            }
            None => println!("{} = {}", spec.name, session.get_property(spec.name)?),
        }
        return Ok(());
    }

    if value.is_some() {
        bail!("writing raw property codes is not supported; use a property name");
    }
    let code = parse_hex_u16(property)
        .map_err(|_| anyhow::anyhow!("unknown property {:?}", property))?;
    let desc = session.get_device_prop_desc(code)?;
    println!("{} (0x{:04X})", desc.name(), desc.prop_code);
    println!("  type:     {:?}", desc.data_type);
    println!("  writable: {}", desc.writable);
    println!("  current:  {}", desc.current);
    println!("  default:  {}", desc.factory_default);
    match &desc.form {
        PropForm::None => {}
        PropForm::Range { min, max, step } => println!("  range:    {}..={} step {}", min, max, step),
        PropForm::Enumeration(values) => {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            println!("  values:   {}", values.join(", "));
        }
    }
    Ok(())
}

fn watch(session: &PtpSession, seconds: u64) -> Result<()> {
    let seen = Arc::new(AtomicUsize::new(0));
    let ids: Vec<_> = event::TABLE
        .iter()
        .map(|&(code, _)| {
            let seen = Arc::clone(&seen);
            let id = session.on_event_code(code, move |ev| {
                seen.fetch_add(1, Ordering::Relaxed);
                println!("{} {:08X?}", ev.name(), ev.params);
            });
            (code, id)
        })
        .collect();

    info!(seconds, "Watching for events");
    for _ in 0..seconds {
        if session.is_disconnected() {
            bail!("device disconnected");
        }
        thread::sleep(Duration::from_secs(1));
    }
    for (code, id) in ids {
        session.off_event_code(code, id);
    }
    info!(events = seen.load(Ordering::Relaxed), "Done");
    Ok(())
}

fn with_session(args: &Args, f: impl FnOnce(&PtpSession) -> Result<()>) -> Result<()> {
    let session = open_session(args)?;
    info!(
        vid = %format!("{:04X}", session.vendor_id()),
        pid = %format!("{:04X}", session.product_id()),
        "Connected"
    );
    let result = f(&session);
    session.close();
    result
}

fn show_info(session: &PtpSession) -> Result<()> {
    let info = session.get_device_info()?;
    println!("{}", info);
    let ops: Vec<String> = info.operations_supported.iter().map(|c| describe(*c)).collect();
    println!("Operations: {}", ops.join(", "));
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Commands::List => list(),
        Commands::Info => with_session(args, show_info),
        Commands::Prop { property, value } => {
            with_session(args, |s| prop(s, property, value.as_deref()))
        }
        Commands::Watch { seconds } => with_session(args, |s| watch(s, *seconds)),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    if let Err(e) = run(&args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

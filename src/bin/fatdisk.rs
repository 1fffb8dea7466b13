//! The command-line driver (spec §1's "external collaborator"): argument
//! parsing, verbosity wiring, signal handling, and dispatch into
//! [`fatdisk::session::Session`]. Everything interesting lives in the
//! library; this binary only translates between argv and the operation
//! surface of spec §6.
//!
//! Subcommand names and shapes are carried from the original tool's
//! `main.c` usage text (`examples/original_source/main.c`): `info`,
//! `summary`, `list`/`ls`, `find`, `extract`, `add`, `fileadd`, `remove`/`rm`,
//! `hexdump`, `cat`, `format`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};

use fatdisk::format::FormatParams;
use fatdisk::partition::msdos_parse_systype;
use fatdisk::session::{Session, SessionConfig};

#[derive(Parser)]
#[command(name = "fatdisk", version, about = "Read/write engine for FAT12/16/32 disk images, no mounting required")]
struct Cli {
    /// Path to the disk image or block device.
    disk: PathBuf,

    /// Increase logging verbosity; repeat for more (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress informational output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Explicit byte offset to the filesystem's base, e.g. 32256 or 0x7e00.
    #[arg(short, long, global = true, value_parser = parse_offset)]
    offset: Option<u64>,

    /// Partition index to use (0-3); defaults to scanning every entry.
    #[arg(short, long, global = true)]
    partition: Option<usize>,

    /// If no partition table entry names a FAT filesystem, scan the image
    /// in 256-byte steps up to 16 MiB looking for a plausible boot sector.
    #[arg(long, global = true)]
    hunt: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print filesystem geometry and identity.
    #[command(alias = "i")]
    Info,

    /// Print the MBR partition table.
    #[command(alias = "sum", alias = "s")]
    Summary,

    /// List every file or directory matching a filter.
    #[command(alias = "ls", alias = "l")]
    List { filter: String },

    /// Find and raw-list matches; without `--all`, stop at the first hit.
    #[command(alias = "fi", alias = "f")]
    Find {
        filter: String,
        #[arg(long)]
        all: bool,
    },

    /// Hex-dump the body of every matching file.
    #[command(alias = "hex", alias = "h")]
    Hexdump { filter: String },

    /// Raw-dump the body of every matching file to stdout.
    #[command(alias = "ca", alias = "c")]
    Cat { filter: String },

    /// Extract a file or directory tree onto the host filesystem.
    #[command(alias = "x")]
    Extract {
        filter: String,
        /// Destination directory on the host (default: current directory).
        #[arg(default_value = ".")]
        dest: PathBuf,
    },

    /// Add a host file or directory tree, preserving its name.
    #[command(alias = "a")]
    Add { source: PathBuf, dest: String },

    /// Add a single host file under a possibly different name.
    #[command(alias = "fa")]
    FileAdd { source: PathBuf, dest: String },

    /// Remove a file or directory (recursively).
    #[command(alias = "rm", alias = "r")]
    Remove { filter: String },

    /// Format and partition a fresh disk image.
    Format {
        /// Size, e.g. `1G`, `512M`, `2048K`, `4096s` (sectors), or a raw
        /// byte count; `0x`-prefixed values are hex.
        size: String,
        #[arg(long, default_value_t = 0)]
        part: usize,
        #[arg(long)]
        zero: bool,
        #[arg(long)]
        bootloader: Option<PathBuf>,
        #[arg(long, default_value = "FAT32")]
        disktype: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long)]
        sector_start: Option<u64>,
        #[arg(long)]
        sector_end: Option<u64>,
        /// Sectors shaved off the end of the partition to dodge a reported
        /// hypervisor bug; 0 disables the margin entirely.
        #[arg(long)]
        safety_margin_sectors: Option<u64>,
    },
}

fn parse_offset(raw: &str) -> Result<u64, String> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else if let Some(sectors) = raw.strip_suffix(['s', 'S']) {
        sectors
            .parse::<u64>()
            .map(|n| n * fatdisk::format::SECTOR_SIZE)
            .map_err(|e| e.to_string())
    } else {
        raw.parse::<u64>().map_err(|e| e.to_string())
    }
}

/// Parse a format `size` argument: `1G`/`512M`/`2048K`/`4096s`, `0x`-prefixed
/// hex, or a bare byte count (`main.c`'s `command_format` size parsing).
fn parse_size(raw: &str) -> Result<u64, String> {
    let (digits, suffix) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&raw[..raw.len() - 1], Some(c.to_ascii_uppercase())),
        _ => (raw, None),
    };
    let base: u64 = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())?
    } else {
        digits.parse::<u64>().map_err(|e| e.to_string())?
    };
    Ok(match suffix {
        Some('G') => base * 1024 * 1024 * 1024,
        Some('M') => base * 1024 * 1024,
        Some('K') => base * 1024,
        Some('S') => base * fatdisk::format::SECTOR_SIZE,
        _ => base,
    })
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::LevelFilter::Warn
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::new().filter_level(level).init();

    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .expect("failed to install SIGINT handler");

    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(Error::Interrupted) => ExitCode::from(2),
        Err(Error::Fatdisk(e)) => {
            eprintln!("fatdisk: {e}");
            ExitCode::from(1)
        }
    }
}

enum Error {
    Fatdisk(fatdisk::Error),
    Interrupted,
}

impl From<fatdisk::Error> for Error {
    fn from(e: fatdisk::Error) -> Self {
        Error::Fatdisk(e)
    }
}

fn check_interrupted() -> Result<(), Error> {
    if INTERRUPTED.load(Ordering::SeqCst) {
        Err(Error::Interrupted)
    } else {
        Ok(())
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut config = SessionConfig {
        hunt: cli.hunt,
        ..SessionConfig::default()
    };

    if let Command::Format {
        size,
        part,
        zero,
        bootloader,
        disktype,
        name,
        sector_start,
        sector_end,
        safety_margin_sectors,
    } = &cli.command
    {
        if let Some(margin) = safety_margin_sectors {
            config.format_safety_margin_sectors = *margin;
        }
        let size_bytes = parse_size(size).map_err(|e| {
            fatdisk::Error::UserInput(fatdisk::error::UserInputError::InfeasibleFormat(e))
        })?;
        let os_id = msdos_parse_systype(disktype).ok_or_else(|| {
            fatdisk::Error::UserInput(fatdisk::error::UserInputError::InfeasibleFormat(format!(
                "unrecognized disk type `{disktype}`"
            )))
        })?;
        let bootloader_bytes = bootloader
            .as_ref()
            .map(std::fs::read)
            .transpose()
            .map_err(fatdisk::Error::HostIo)?;

        let params = FormatParams {
            image_path: cli.disk.clone(),
            size_bytes,
            partition_index: *part,
            base_offset: cli.offset.unwrap_or(0),
            volume_name: name.clone(),
            sector_start: sector_start.unwrap_or(0),
            sector_end: *sector_end,
            os_id,
            zero_sectors: *zero,
            bootloader: bootloader_bytes,
        };
        let mut session = Session::format(&params, &config)?;
        log::info!("formatted {} as {}", cli.disk.display(), disktype);
        session.close()?;
        return Ok(());
    }

    let mut session = Session::open(&cli.disk, cli.offset, cli.partition, &config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let result = dispatch(&mut session, &cli.command, &mut out);
    session.close()?;
    result
}

fn dispatch(session: &mut Session, command: &Command, out: &mut dyn Write) -> Result<(), Error> {
    check_interrupted()?;
    match command {
        Command::Info => {
            let info = session.info();
            writeln!(out, "variant:       {}", info.variant).ok();
            writeln!(out, "volume label:  {}", info.volume_label).ok();
            writeln!(out, "sector size:   {}", info.sector_size).ok();
            writeln!(out, "cluster size:  {}", info.cluster_size).ok();
            writeln!(out, "media type:    {}", info.media_type).ok();
            writeln!(out, "total sectors: {}", info.total_sectors).ok();
            writeln!(out, "total clusters:{}", info.total_clusters).ok();
            writeln!(out, "free clusters: {}", info.free_clusters).ok();
            writeln!(out, "base offset:   {}", info.base_offset).ok();
            Ok(())
        }
        Command::Summary => {
            write!(out, "{}", session.summary()).ok();
            Ok(())
        }
        Command::List { filter } => {
            let n = session.list(filter, out)?;
            report_match_count(n, filter)
        }
        Command::Find { filter, all } => {
            let n = session.find(filter, *all, out)?;
            report_match_count(n, filter)
        }
        Command::Hexdump { filter } => {
            let n = session.hexdump(filter, out)?;
            report_match_count(n, filter)
        }
        Command::Cat { filter } => {
            let n = session.cat(filter, out)?;
            report_match_count(n, filter)
        }
        Command::Extract { filter, dest } => {
            let n = session.extract(filter, dest)?;
            report_match_count(n, filter)
        }
        Command::Add { source, dest } => {
            let n = session.add(source, dest)?;
            log::info!("added {n} file(s)");
            Ok(())
        }
        Command::FileAdd { source, dest } => {
            let n = session.add_file(source, dest)?;
            log::info!("added {n} file(s)");
            Ok(())
        }
        Command::Remove { filter } => {
            let n = session.remove(filter)?;
            report_match_count(n, filter)
        }
        Command::Format { .. } => unreachable!("handled in run() before a session is opened"),
    }
}

fn report_match_count(n: usize, filter: &str) -> Result<(), Error> {
    if n == 0 {
        return Err(fatdisk::Error::UserInput(
            fatdisk::error::UserInputError::NoMatch(filter.to_string()),
        )
        .into());
    }
    Ok(())
}

mod config;
mod flash;
mod hex;
mod image;
mod preview;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use splitlink::{crc16, Side};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "splitlink")]
#[command(about = "Split keyboard peripheral link tooling")]
struct Cli {
    /// TOML file overriding fields of the built-in peripheral profile
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Log protocol details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show size, page layout and expected CRC of a firmware image
    Inspect {
        /// Intel HEX (.hex) or raw binary image
        image: PathBuf,
        /// Flash address of a raw binary image
        #[arg(long, default_value_t = 0, value_parser = parse_u16)]
        base: u16,
    },
    /// Compute the bootloader CRC16 of a byte range
    Crc {
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Bytes to include; defaults to the rest of the file
        #[arg(long)]
        length: Option<usize>,
    },
    /// Flash an image onto one half
    Flash {
        image: PathBuf,
        #[arg(long, value_enum)]
        side: SideArg,
        /// Run against a simulated bootloader instead of hardware
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value_t = 0, value_parser = parse_u16)]
        base: u16,
    },
    /// Print the LED bank frames for a solid color
    LedPreview {
        /// Color as RRGGBB
        #[arg(long, default_value = "FFFFFF")]
        color: String,
        #[arg(long, default_value_t = 255)]
        brightness: u8,
    },
    /// Print the active peripheral profile as TOML
    Profile,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Left,
    Right,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Left => Side::Left,
            SideArg::Right => Side::Right,
        }
    }
}

fn parse_u16(s: &str) -> Result<u16> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    value.with_context(|| format!("invalid 16-bit address {:?}", s))
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "splitlink=debug"
        } else {
            "splitlink=info"
        })
    });
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let profile = config::load_profile(cli.profile.as_deref())?;

    match cli.command {
        Command::Inspect { image, base } => {
            let loaded = image::load(&image, base, profile.flasher.blank)?;
            let firmware = loaded.firmware();
            let props = &profile.flasher;

            println!("Image:        {}", image.display());
            println!("Size:         {} bytes", loaded.data.len());
            println!("Base address: 0x{:04X}", loaded.base);
            println!(
                "Pages:        {} x {} bytes, {} frames of {} bytes each",
                firmware.page_count(props.page_size),
                props.page_size,
                props.frames_per_page(),
                props.frame_size
            );
            println!("Expected CRC: 0x{:04X}", firmware.expected_crc());
            match firmware.validate(props) {
                Ok(()) => println!("Flashable:    yes"),
                Err(e) => println!("Flashable:    no ({})", e),
            }
        }
        Command::Crc {
            file,
            offset,
            length,
        } => {
            let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let end = match length {
                Some(len) => offset.checked_add(len).context("range overflows")?,
                None => data.len(),
            };
            let Some(range) = data.get(offset..end) else {
                bail!(
                    "range {}..{} is outside the {} byte file",
                    offset,
                    end,
                    data.len()
                );
            };
            println!("0x{:04X}", crc16::checksum(range));
        }
        Command::Flash {
            image,
            side,
            dry_run,
            base,
        } => {
            if !dry_run {
                bail!(
                    "no host bus adapter is supported; the main controller flashes halves itself. \
                     Pass --dry-run to exercise the update against a simulated bootloader."
                );
            }
            let loaded = image::load(&image, base, profile.flasher.blank)?;
            let run = flash::dry_run(&loaded, side.into(), profile, !cli.verbose)?;

            if cli.verbose {
                for line in &run.log {
                    println!("{}", line);
                }
            }
            println!(
                "Flashed {} bytes in {} pages, CRC 0x{:04X} (was version {}, CRC 0x{:04X})",
                run.report.bytes,
                run.report.pages,
                run.report.crc,
                run.report.previous_version,
                run.report.previous_crc
            );
            println!("Simulated bus time: {} ms", run.simulated_ms);
        }
        Command::LedPreview { color, brightness } => {
            let color = preview::parse_color(&color)?;
            for (bank, frame) in preview::bank_frames(profile, color, brightness)
                .iter()
                .enumerate()
            {
                println!("bank {}: {}", bank, preview::format_frame(frame));
            }
        }
        Command::Profile => {
            print!("{}", config::to_toml(&profile)?);
        }
    }

    Ok(())
}

//! Runtime configuration: CLI flags with environment-variable fallback.
//!
//! Every flag can be set three ways, checked in this order: CLI argument,
//! `NS_EMU_*` environment variable, built-in default. Built once in `main`
//! and passed down by reference — no globals.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ns-procon-emu", about = "Nintendo Switch Pro Controller emulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller emulator server.
    Serve(Args),
}

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Path to the HID gadget endpoint device file.
    #[arg(long, env = "NS_EMU_FILEPATH", default_value = "/dev/hidg0")]
    pub filepath: PathBuf,

    /// Address the TCP control surface binds to.
    #[arg(long, env = "NS_EMU_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the TCP control surface listens on.
    #[arg(long, env = "NS_EMU_PORT", default_value_t = 9000)]
    pub port: u16,

    /// Minimum log level: TRACE, DEBUG, INFO, WARN, or ERROR.
    #[arg(long, env = "NS_EMU_LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Directory containing the SPI-ROM blobs `60.bin` and `80.bin`.
    #[arg(long, env = "NS_EMU_SPI_ROM_DIR", default_value = "spi_rom_data")]
    pub spi_rom_dir: PathBuf,

    /// Directory macros are loaded from and saved to.
    #[arg(long, env = "NS_EMU_MACROS_DIR", default_value = "macros")]
    pub macros_dir: PathBuf,
}

impl Args {
    pub fn net_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

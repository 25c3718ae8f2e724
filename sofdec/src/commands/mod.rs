mod create;
mod encrypt;
mod extract;
mod probe;

pub use create::Create;
pub use encrypt::Encrypt;
pub use extract::Extract;
pub use probe::Probe;

use anyhow::{Result, bail};
use clap::{ColorChoice, Parser, Subcommand};
use sofdec_usm::Options;

/// Probe, extract, create and re-encrypt CRI Sofdec USM video files.
#[derive(Debug, Clone, Parser)]
#[command(version, author = "clitic <clitic21@gmail.com>", about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Text encoding of table strings, e.g. shift_jis for older Japanese releases.
    #[arg(long, global = true, default_value = "utf-8")]
    pub encoding: String,

    /// Show debug output for every chunk.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl Args {
    pub fn options(&self) -> Result<Options> {
        match Options::new().encoding_label(&self.encoding) {
            Some(x) => Ok(x),
            None => bail!("unknown text encoding {:?}", self.encoding),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Create(Create),
    Encrypt(Encrypt),
    Extract(Extract),
    Probe(Probe),
}

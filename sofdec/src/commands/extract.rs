use crate::utils;
use anyhow::{Context, Result, bail};
use clap::Args;
use rayon::prelude::*;
use sofdec_usm::{ElementaryStream, Key, Options};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Extract the elementary streams of USM files.
#[derive(Debug, Clone, Args)]
pub struct Extract {
    /// USM file, or a directory searched recursively for USM files.
    #[arg(required = true)]
    input: PathBuf,

    /// Decryption key in hex, e.g. 0x1A2B3C4D5E6F.
    #[arg(short, long)]
    key: Option<Key>,

    /// Directory where `<name>/<kind>_<channel>.<ext>` files are written.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

impl Extract {
    pub fn execute(self, options: Options) -> Result<()> {
        let files = utils::usm_files(&self.input)?;

        let failed = files
            .par_iter()
            .filter(|path| match extract_file(path, &self.output, self.key, options) {
                Ok(count) => {
                    log::info!("{} ({} streams)", path.display(), count);
                    false
                }
                Err(e) => {
                    log::error!("{}: {:#}", path.display(), e);
                    true
                }
            })
            .count();

        if failed > 0 {
            bail!("{} of {} files could not be extracted", failed, files.len());
        }

        Ok(())
    }
}

fn extract_file(path: &Path, output: &Path, key: Option<Key>, options: Options) -> Result<usize> {
    let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let extracted = sofdec_usm::extract(&data, key, options)?;

    let stem = path
        .file_stem()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_else(|| "usm".to_owned());
    let dir = output.join(stem);
    fs::create_dir_all(&dir).with_context(|| format!("cannot create {}", dir.display()))?;

    for stream in &extracted.streams {
        let file = dir.join(output_name(stream));
        let bytes: Vec<u8> = stream.frames.iter().flat_map(|x| x.data.iter().copied()).collect();
        fs::write(&file, bytes).with_context(|| format!("cannot write {}", file.display()))?;
        log::debug!("wrote {}", file.display());
    }

    Ok(extracted.streams.len())
}

fn output_name(stream: &ElementaryStream) -> String {
    let kind = if stream.alpha {
        "alpha"
    } else if stream.codec.is_video() {
        "video"
    } else {
        "audio"
    };

    format!("{}_{}.{}", kind, stream.channel, stream.codec.extension())
}

use crate::utils;
use anyhow::{Context, Result, bail};
use clap::Args;
use rayon::prelude::*;
use sofdec_usm::{Key, Options};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Re-encrypt USM files with another key, or decrypt them when no key is given.
#[derive(Debug, Clone, Args)]
pub struct Encrypt {
    /// USM file, or a directory searched recursively for USM files.
    #[arg(required = true)]
    input: PathBuf,

    /// New key in hex. Files are written in the clear without one.
    #[arg(short, long)]
    key: Option<Key>,

    /// Key the files are currently encrypted with.
    #[arg(long)]
    from: Option<Key>,

    /// Directory for the rewritten files. Files are replaced in place without one.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Encrypt {
    pub fn execute(self, options: Options) -> Result<()> {
        let files = utils::usm_files(&self.input)?;

        if let Some(output) = &self.output {
            fs::create_dir_all(output).with_context(|| format!("cannot create {}", output.display()))?;
        }

        let failed = files
            .par_iter()
            .filter(|path| match self.encrypt_file(path, options) {
                Ok(target) => {
                    log::info!("{} -> {}", path.display(), target.display());
                    false
                }
                Err(e) => {
                    log::error!("{}: {:#}", path.display(), e);
                    true
                }
            })
            .count();

        if failed > 0 {
            bail!("{} of {} files could not be rewritten", failed, files.len());
        }

        Ok(())
    }

    fn encrypt_file(&self, path: &Path, options: Options) -> Result<PathBuf> {
        let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        let rewritten = sofdec_usm::reencrypt(&data, self.from, self.key, &options)?;

        let target = match (&self.output, path.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => path.to_owned(),
        };

        fs::write(&target, rewritten).with_context(|| format!("cannot write {}", target.display()))?;
        Ok(target)
    }
}

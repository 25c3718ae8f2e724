use crate::utils;
use anyhow::{Context, Result, bail};
use clap::Args;
use sofdec_usm::{ContainerMetadata, ElementaryStream, Key, Options, VideoParams};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Build a USM file from a VP9 (IVF) or H.264 (Annex-B) video and HCA audio.
#[derive(Debug, Clone, Args)]
pub struct Create {
    /// Video file, .ivf for VP9 or .h264/.264 for an Annex-B byte stream.
    #[arg(required = true)]
    video: PathBuf,

    /// HCA audio files, written to channels 0, 1, ... in the given order.
    #[arg(short, long)]
    audio: Vec<PathBuf>,

    /// Encryption key in hex.
    #[arg(short, long)]
    key: Option<Key>,

    /// Output path. Defaults to the video path with a .usm extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// H.264 frame width. Read with ffprobe when omitted.
    #[arg(long, requires_all = ["height", "framerate"])]
    width: Option<u32>,

    /// H.264 frame height.
    #[arg(long, requires_all = ["width", "framerate"])]
    height: Option<u32>,

    /// H.264 frames per second, e.g. 29.97.
    #[arg(long, requires_all = ["width", "height"])]
    framerate: Option<f64>,

    /// Largest stream page in bytes. Larger frames are split across pages.
    #[arg(long)]
    max_page_size: Option<usize>,
}

impl Create {
    pub fn execute(self, options: Options) -> Result<()> {
        let options = match self.max_page_size {
            Some(x) => options.max_page_size(x),
            None => options,
        };

        let mut streams = vec![self.read_video()?];

        for (channel, path) in self.audio.iter().enumerate() {
            let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
            let channel = u8::try_from(channel).context("too many audio streams")?;
            let stream = ElementaryStream::from_hca(&data)
                .with_context(|| format!("cannot read {}", path.display()))?
                .channel(channel)
                .filename(file_name(path));
            streams.push(stream);
        }

        let output = self.output.clone().unwrap_or_else(|| self.video.with_extension("usm"));
        let metadata = ContainerMetadata::new(file_name(&output));
        let data = sofdec_usm::create(&streams, &metadata, self.key, &options)?;

        fs::write(&output, &data).with_context(|| format!("cannot write {}", output.display()))?;
        log::info!("{} ({} streams, {} bytes)", output.display(), streams.len(), data.len());
        Ok(())
    }

    fn read_video(&self) -> Result<ElementaryStream> {
        let path = &self.video;
        let data = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;

        let stream = if data.starts_with(b"DKIF") {
            ElementaryStream::from_ivf(&data)?
        } else {
            let extension = path
                .extension()
                .map(|x| x.to_string_lossy().to_lowercase())
                .unwrap_or_default();

            if !matches!(extension.as_str(), "h264" | "264" | "avc") {
                bail!("{} is neither an IVF file nor an H.264 byte stream", path.display());
            }

            let params = match (self.width, self.height, self.framerate) {
                (Some(width), Some(height), Some(fps)) => VideoParams::new(width, height, fps),
                _ => utils::probe_video(path)?,
            };
            ElementaryStream::from_annexb(&data, params)?
        };

        Ok(stream.filename(file_name(path)))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|x| x.to_string_lossy().into_owned())
        .unwrap_or_default()
}

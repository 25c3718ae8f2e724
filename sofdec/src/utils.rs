use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use sofdec_usm::VideoParams;
use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

pub(super) fn find_ffprobe() -> Option<String> {
    let bin = if cfg!(target_os = "windows") {
        "ffprobe.exe"
    } else {
        "ffprobe"
    };

    if Path::new(bin).exists() {
        return Some(bin.to_owned());
    }

    env::var("PATH")
        .ok()?
        .split(if cfg!(target_os = "windows") {
            ';'
        } else {
            ':'
        })
        .find_map(|s| {
            let x = Path::new(s).join(bin);

            if x.exists() {
                x.to_str().map(|x| x.to_owned())
            } else {
                None
            }
        })
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Dimensions and frame rate of the first video stream, as reported by ffprobe.
pub(super) fn probe_video(path: &Path) -> Result<VideoParams> {
    let ffprobe = find_ffprobe().ok_or_else(|| {
        anyhow!("ffprobe is not installed, pass --width, --height and --framerate instead")
    })?;

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .context("cannot run ffprobe")?;

    if !output.status.success() {
        bail!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_ffprobe(&output.stdout).with_context(|| format!("unexpected ffprobe output for {}", path.display()))
}

fn parse_ffprobe(json: &[u8]) -> Result<VideoParams> {
    let output: FfprobeOutput = serde_json::from_slice(json)?;
    let stream = output
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no video stream"))?;

    let (framerate_n, framerate_d) = match stream.r_frame_rate.as_deref().and_then(|x| x.split_once('/')) {
        Some((n, d)) => (n.parse::<u32>()?, d.parse::<u32>()?),
        None => bail!("no frame rate"),
    };

    if framerate_d == 0 {
        bail!("frame rate has a zero denominator");
    }

    Ok(VideoParams {
        width: stream.width.ok_or_else(|| anyhow!("no width"))?,
        height: stream.height.ok_or_else(|| anyhow!("no height"))?,
        framerate_n,
        framerate_d,
    })
}

/// `path` itself when it is a file, otherwise every `.usm` file below it.
pub(super) fn usm_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_owned()]);
    }

    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }

    let dir = path
        .to_str()
        .ok_or_else(|| anyhow!("{} is not valid unicode", path.display()))?;
    let pattern = format!("{}/**/*.usm", glob::Pattern::escape(dir));
    let options = glob::MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };

    let mut files = glob::glob_with(&pattern, options)?
        .collect::<Result<Vec<_>, _>>()?;
    files.sort();

    if files.is_empty() {
        bail!("no .usm files found in {}", path.display());
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffprobe() {
        let json = br#"{"programs": [], "streams": [{"width": 1920, "height": 1080, "r_frame_rate": "30000/1001"}]}"#;
        let params = parse_ffprobe(json).unwrap();

        assert_eq!((params.width, params.height), (1920, 1080));
        assert_eq!((params.framerate_n, params.framerate_d), (30000, 1001));
        assert_eq!(params.frame_rate_x100(), 2997);
    }

    #[test]
    fn test_parse_ffprobe_without_stream() {
        assert!(parse_ffprobe(br#"{"streams": []}"#).is_err());
        assert!(parse_ffprobe(br#"{"streams": [{"width": 1, "height": 1, "r_frame_rate": "0/0"}]}"#).is_err());
    }
}

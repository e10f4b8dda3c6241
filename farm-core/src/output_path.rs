use crate::types::{Eye, OutputFormat};
use std::path::{Path, PathBuf};

/// Computes the bit-exact output path for one `(job, frame, eye)` triple.
///
/// `sbs` is checked first and always wins over `separate_folders` — a job
/// with eye `sbs` and `separate_folders = true` still writes under `SBS/`.
pub fn output_file_path(
    output_dir: &str,
    clip_path: &str,
    format: OutputFormat,
    separate_folders: bool,
    frame_idx: i64,
    eye: Eye,
) -> PathBuf {
    let output_dir = Path::new(output_dir);
    let clip = clip_basename(clip_path);
    let ext = format.extension();
    let filename = format!("{clip}_{frame_idx:06}{ext}");

    match eye {
        Eye::Sbs => output_dir.join("SBS").join(filename),
        Eye::Left | Eye::Right if separate_folders => {
            output_dir.join(eye.letter()).join(filename)
        }
        Eye::Left | Eye::Right => {
            let suffix = eye.letter();
            output_dir.join(format!("{clip}_{suffix}_{frame_idx:06}{ext}"))
        }
    }
}

/// Basename of `clip_path` with its extension stripped, matching `Path::stem`.
fn clip_basename(clip_path: &str) -> String {
    Path::new(clip_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

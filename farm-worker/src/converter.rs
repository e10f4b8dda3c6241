use farm_core::types::{Eye, Job};
use std::collections::HashMap;

/// Builds the argument vector for one converter invocation over a claimed
/// range, per the CLI contract of §6:
/// `<clip_path> <output_dir> <start>-<end> <eye> [flags]`.
pub fn build_args(job: &Job, start_frame: i64, end_frame: i64, eye: Eye) -> Vec<String> {
    let mut args = vec![
        job.clip_path.clone(),
        job.output_dir.clone(),
        format!("{start_frame}-{end_frame}"),
        eye.as_str().to_string(),
        format!("--format={}", job.format.extension().trim_start_matches('.')),
    ];
    if job.use_aces {
        args.push("--aces".to_string());
    }
    if !job.color_input_space.is_empty() {
        args.push(format!("--input-cs={}", job.color_input_space));
    }
    if !job.color_output_space.is_empty() {
        args.push(format!("--output-cs={}", job.color_output_space));
    }
    if job.separate_folders {
        args.push("--separate-folders".to_string());
    }
    if job.use_stmap && !job.stmap_path.is_empty() {
        args.push(format!("--stmap={}", job.stmap_path));
    }
    args
}

/// Parsed result of the `--info` subcommand, which prints `KEY=VALUE` lines
/// describing a clip (frame count, dimensions, frame rate, stereo-ness).
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub frame_count: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub frame_rate: Option<f64>,
    pub stereo: Option<bool>,
}

/// Parses the `KEY=VALUE` lines emitted by `<cli> --info <clip_path>`.
/// Unrecognized keys are ignored; malformed values leave the field `None`
/// rather than failing the whole parse.
pub fn parse_clip_info(stdout: &str) -> ClipInfo {
    let fields: HashMap<&str, &str> = stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    ClipInfo {
        frame_count: fields.get("FRAME_COUNT").and_then(|v| v.parse().ok()),
        width: fields.get("WIDTH").and_then(|v| v.parse().ok()),
        height: fields.get("HEIGHT").and_then(|v| v.parse().ok()),
        frame_rate: fields.get("FRAME_RATE").and_then(|v| v.parse().ok()),
        stereo: fields.get("STEREO").and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        }),
    }
}

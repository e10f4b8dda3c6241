use crate::types::{Job, JobSpec};

/// Finds the `RE-RENDER_FRAMES:` block in a checker report and parses the
/// comma-separated frame indices on the following line. Non-numeric tokens
/// are dropped rather than treated as a parse failure, matching the
/// reference checker's tolerance for stray whitespace/trailing commas.
pub fn parse_report(report: &str) -> Vec<i64> {
    let Some(marker_pos) = report.find("RE-RENDER_FRAMES:") else {
        return Vec::new();
    };
    let after_marker = &report[marker_pos + "RE-RENDER_FRAMES:".len()..];
    let Some(line) = after_marker.lines().find(|l| !l.trim().is_empty()) else {
        return Vec::new();
    };
    line.split(',')
        .filter_map(|tok| tok.trim().parse::<i64>().ok())
        .collect()
}

/// Groups a list of frame indices into maximal consecutive ranges. The
/// input need not be sorted or deduplicated.
pub fn group_into_ranges(frames: &[i64]) -> Vec<(i64, i64)> {
    if frames.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<i64> = frames.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges = Vec::new();
    let mut start = sorted[0];
    let mut end = sorted[0];
    for &frame in &sorted[1..] {
        if frame == end + 1 {
            end = frame;
        } else {
            ranges.push((start, end));
            start = frame;
            end = frame;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Builds the spec for a re-render job from the original job and its
/// reported bad frames: same clip, output settings, and eye set, restricted
/// to the union `[min..max]` of the bad-frame ranges, priority raised by ten
/// and capped at 100. Frames within that span that were not actually bad are
/// re-rendered too — accepted in exchange for not needing a sparse frame
/// selection in the scheduler.
pub fn build_rerender_spec(original: &Job, error_frames: &[i64], new_job_id: String) -> Option<JobSpec> {
    let ranges = group_into_ranges(error_frames);
    let (start_frame, _) = *ranges.first()?;
    let (_, end_frame) = *ranges.last()?;

    Some(JobSpec {
        job_id: new_job_id,
        pool_id: original.pool_id.clone(),
        clip_path: original.clip_path.clone(),
        output_dir: original.output_dir.clone(),
        start_frame,
        end_frame,
        eyes: original.eyes.clone(),
        format: original.format,
        separate_folders: original.separate_folders,
        use_aces: original.use_aces,
        color_input_space: original.color_input_space.clone(),
        color_output_space: original.color_output_space.clone(),
        use_stmap: original.use_stmap,
        stmap_path: original.stmap_path.clone(),
        priority: (original.priority + 10).min(100),
        created_by: "rerender-hook".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Eye, OutputFormat};

    #[test]
    fn parses_comma_separated_frame_list() {
        let report = "checked 100 frames\nRE-RENDER_FRAMES:\n7, 8, 40\nend of report";
        assert_eq!(parse_report(report), vec![7, 8, 40]);
    }

    #[test]
    fn missing_marker_yields_empty() {
        assert_eq!(parse_report("all frames ok"), Vec::<i64>::new());
    }

    #[test]
    fn marker_with_no_frames_yields_empty() {
        let report = "RE-RENDER_FRAMES:\n\n";
        assert_eq!(parse_report(report), Vec::<i64>::new());
    }

    #[test]
    fn groups_consecutive_runs() {
        assert_eq!(
            group_into_ranges(&[7, 8, 40, 41, 42, 100]),
            vec![(7, 8), (40, 42), (100, 100)]
        );
    }

    #[test]
    fn groups_handle_unsorted_duplicate_input() {
        assert_eq!(group_into_ranges(&[8, 7, 7, 40]), vec![(7, 8), (40, 40)]);
    }

    fn sample_job() -> Job {
        Job {
            job_id: "j1".to_string(),
            pool_id: "default".to_string(),
            clip_path: "A.braw".to_string(),
            output_dir: "/out".to_string(),
            start_frame: 0,
            end_frame: 99,
            eyes: [Eye::Left].into_iter().collect(),
            format: OutputFormat::Exr,
            separate_folders: false,
            use_aces: true,
            color_input_space: "BMDFilm WideGamut Gen5".to_string(),
            color_output_space: "ACEScg".to_string(),
            use_stmap: false,
            stmap_path: String::new(),
            status: crate::types::JobStatus::Completed,
            priority: 95,
            created_at: chrono::Utc::now(),
            created_by: "tester".to_string(),
        }
    }

    #[test]
    fn rerender_spec_spans_union_of_bad_ranges_and_caps_priority() {
        let original = sample_job();
        let spec = build_rerender_spec(&original, &[7, 8, 40], "j1-rerender-1".to_string()).unwrap();
        assert_eq!(spec.start_frame, 7);
        assert_eq!(spec.end_frame, 40);
        assert_eq!(spec.priority, 100); // 95 + 10 capped at 100
        assert_eq!(spec.clip_path, original.clip_path);
        assert_eq!(spec.eyes, original.eyes);
    }

    #[test]
    fn rerender_spec_is_none_for_no_bad_frames() {
        let original = sample_job();
        assert!(build_rerender_spec(&original, &[], "j1-rerender-1".to_string()).is_none());
    }
}

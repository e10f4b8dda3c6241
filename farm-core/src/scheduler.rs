/// Effective worker parallelism given how much work is actually pending.
///
/// `min(configured_parallelism, ceil(pending_frames / batch_size))`. Keeps a
/// handful of leftover frames from being spread across many workers that
/// each then run an underfull converter batch.
pub fn effective_parallelism(configured_parallelism: usize, pending_frames: i64, batch_size: i64) -> usize {
    if pending_frames <= 0 || batch_size <= 0 {
        return 0;
    }
    let needed = pending_frames.div_ceil(batch_size) as usize;
    configured_parallelism.min(needed)
}

/// The per-range dispatch timeout: `max(claim_timeout + margin, base +
/// per_frame * frame_count * sbs_multiplier)`.
#[allow(clippy::too_many_arguments)]
pub fn range_timeout(
    claim_timeout: std::time::Duration,
    margin: std::time::Duration,
    base: std::time::Duration,
    per_frame: std::time::Duration,
    frame_count: i64,
    sbs_multiplier: u32,
) -> std::time::Duration {
    let floor = claim_timeout + margin;
    let variable = per_frame * (frame_count.max(0) as u32) * sbs_multiplier;
    std::cmp::max(floor, base + variable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parallelism_caps_at_configured_max() {
        assert_eq!(effective_parallelism(16, 1000, 10), 16);
    }

    #[test]
    fn parallelism_scales_down_for_small_backlogs() {
        assert_eq!(effective_parallelism(16, 25, 10), 3); // ceil(25/10) = 3
    }

    #[test]
    fn parallelism_is_zero_with_no_pending_work() {
        assert_eq!(effective_parallelism(16, 0, 10), 0);
    }

    #[test]
    fn timeout_uses_claim_floor_for_small_ranges() {
        let t = range_timeout(
            Duration::from_secs(180),
            Duration::from_secs(15),
            Duration::from_secs(30),
            Duration::from_secs(2),
            1,
            1,
        );
        assert_eq!(t, Duration::from_secs(195)); // floor wins: 30+2=32 < 195
    }

    #[test]
    fn timeout_uses_variable_term_for_large_sbs_ranges() {
        let t = range_timeout(
            Duration::from_secs(180),
            Duration::from_secs(15),
            Duration::from_secs(30),
            Duration::from_secs(2),
            200,
            2,
        );
        // base + per_frame * frames * sbs_multiplier = 30 + 2*200*2 = 830
        assert_eq!(t, Duration::from_secs(830));
    }
}

/// 帶有時間點（秒）的事件
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for f64 {
    fn timestamp(&self) -> f64 {
        *self
    }
}

/// 過濾時間上過於接近的事件
///
/// 由左至右單次掃描：事件時間必須大於「上一個保留事件的時間 + `min_gap`」才保留。
/// 第一個事件一定保留。輸入需已依時間排序。
#[must_use]
pub fn dedup_by_min_gap<T: Timestamped + Clone>(events: &[T], min_gap: f64) -> Vec<T> {
    let mut last_kept = f64::NEG_INFINITY;

    events
        .iter()
        .filter(|event| {
            let timestamp = event.timestamp();
            if timestamp > last_kept + min_gap {
                last_kept = timestamp;
                true
            } else {
                false
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_event_always_kept() {
        assert_eq!(dedup_by_min_gap(&[-100.0], 3.0), vec![-100.0]);
        assert_eq!(dedup_by_min_gap(&[0.0], 3.0), vec![0.0]);
    }

    #[test]
    fn test_empty_input() {
        assert!(dedup_by_min_gap::<f64>(&[], 2.0).is_empty());
    }

    #[test]
    fn test_gap_is_measured_from_last_kept() {
        let events = [0.0, 1.0, 2.0, 3.0, 3.5, 6.0, 6.6, 10.0];
        let kept = dedup_by_min_gap(&events, 3.0);
        // 3.0 不大於 0 + 3，6.6 是 3.5 之後第一個超過間隔的事件
        assert_eq!(kept, vec![0.0, 3.5, 6.6, 10.0]);
    }

    #[test]
    fn test_consecutive_gaps_exceed_minimum() {
        let events: Vec<f64> = (0..200).map(|i| f64::from(i) * 0.7).collect();
        for gap in [2.0, 3.0] {
            let kept = dedup_by_min_gap(&events, gap);
            for pair in kept.windows(2) {
                assert!(pair[1] - pair[0] > gap);
            }
        }
    }

    #[test]
    fn test_idempotent() {
        let events: Vec<f64> = vec![0.4, 0.8, 2.5, 2.6, 5.0, 5.1, 7.9, 8.0, 8.2, 12.0];
        let once = dedup_by_min_gap(&events, 2.0);
        let twice = dedup_by_min_gap(&once, 2.0);
        assert_eq!(once, twice);
    }
}

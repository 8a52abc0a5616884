use std::time::Instant;

// Microseconds elapsed since `start`, as carried in PSN packet headers
pub fn timestamp_usec(start: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(start).as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timestamp_usec() {
        let start = Instant::now();
        assert_eq!(timestamp_usec(start, start), 0);
        assert_eq!(timestamp_usec(start, start + Duration::from_millis(1500)), 1_500_000);
        assert_eq!(timestamp_usec(start + Duration::from_secs(1), start), 0);
    }
}

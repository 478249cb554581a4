/// Throughput in megabits per second from cumulative bytes and elapsed
/// microseconds. Zero elapsed time yields zero instead of an infinite rate.
pub fn speed_mbps(total_bytes: u64, elapsed_micros: u64) -> f64 {
    if elapsed_micros == 0 {
        return 0.0;
    }
    let seconds = elapsed_micros as f64 / 1_000_000.0;
    (total_bytes as f64 * 8.0) / seconds / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_elapsed_is_zero() {
        assert_eq!(speed_mbps(0, 0), 0.0);
        assert_eq!(speed_mbps(12_500_000, 0), 0.0);
        assert_eq!(speed_mbps(u64::MAX, 0), 0.0);
    }

    #[test]
    fn hundred_megabits() {
        assert_eq!(speed_mbps(12_500_000, 1_000_000), 100.0);
    }

    #[test]
    fn no_bytes_is_zero() {
        assert_eq!(speed_mbps(0, 5_000_000), 0.0);
    }

    #[test]
    fn monotonic_in_bytes_and_time() {
        let t = 2_000_000;
        let mut last = speed_mbps(0, t);
        for bytes in [1, 1_000, 1_000_000, 50_000_000] {
            let s = speed_mbps(bytes, t);
            assert!(s > last);
            last = s;
        }

        let bytes = 10_000_000;
        let mut last = speed_mbps(bytes, 1);
        for t in [10, 1_000, 1_000_000, 60_000_000] {
            let s = speed_mbps(bytes, t);
            assert!(s < last);
            last = s;
        }
    }

    #[test]
    fn always_finite() {
        assert!(speed_mbps(u64::MAX, 1).is_finite());
    }
}

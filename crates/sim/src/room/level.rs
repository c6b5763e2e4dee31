// Kill-count thresholds for levels 2..=5.
const LEVEL_THRESHOLDS: [u32; 4] = [10, 25, 45, 70];

pub const MAX_LEVEL: u8 = 5;

pub fn level_for_kill_count(kill_count: u32) -> u8 {
    1 + LEVEL_THRESHOLDS
        .iter()
        .filter(|threshold| kill_count >= **threshold)
        .count() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_match_thresholds() {
        assert_eq!(level_for_kill_count(0), 1);
        assert_eq!(level_for_kill_count(9), 1);
        assert_eq!(level_for_kill_count(10), 2);
        assert_eq!(level_for_kill_count(24), 2);
        assert_eq!(level_for_kill_count(25), 3);
        assert_eq!(level_for_kill_count(44), 3);
        assert_eq!(level_for_kill_count(45), 4);
        assert_eq!(level_for_kill_count(69), 4);
        assert_eq!(level_for_kill_count(70), 5);
        assert_eq!(level_for_kill_count(u32::MAX), MAX_LEVEL);
    }

    #[test]
    fn level_is_monotonic() {
        let mut previous = level_for_kill_count(0);
        for kills in 1..200 {
            let level = level_for_kill_count(kills);
            assert!(level >= previous);
            previous = level;
        }
    }
}

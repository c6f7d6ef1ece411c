//! Pairwise ELO with a fixed K of 32.
//!
//! The winner is scored against each loser independently; the rounded delta
//! of a pair is credited to the winner and debited from the loser, so every
//! pair is exactly zero-sum. With more than two players the winner's total
//! change is the sum of its pairwise gains.

pub const K_FACTOR: f64 = 32.0;

/// Standard expected score `E = 1 / (1 + 10^((R_opp - R) / 400))`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Rating points transferred from `loser` to `winner` for one pair.
pub fn pair_delta(winner: i32, loser: i32) -> i32 {
    (K_FACTOR * (1.0 - expected_score(winner, loser))).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_match_transfers_sixteen() {
        assert_eq!(pair_delta(1200, 1200), 16);
    }

    #[test]
    fn favorite_gains_less_than_underdog() {
        let favorite_wins = pair_delta(1400, 1200);
        let underdog_wins = pair_delta(1200, 1400);
        assert!(favorite_wins < 16);
        assert!(underdog_wins > 16);
        // Symmetric matchups mirror each other.
        assert_eq!(favorite_wins + underdog_wins, 32);
    }

    #[test]
    fn expected_scores_sum_to_one() {
        for (a, b) in [(1200, 1200), (1000, 1600), (1350, 1280)] {
            let sum = expected_score(a, b) + expected_score(b, a);
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn transfer_is_bounded_by_k() {
        assert!(pair_delta(800, 2400) <= K_FACTOR as i32);
        assert!(pair_delta(2400, 800) >= 0);
    }
}

//! Property-based tests for the composite scorer and dense tie ranking.

use proptest::prelude::*;

use moji_progress::db::operations::leaderboard::{LeaderboardPeriod, UserPeriodSnapshot};
use moji_progress::services::leaderboard::{composite_score, rank_snapshots};

fn snapshot(user_id: &str, period_xp: i64, level: i32, accuracy: f64) -> UserPeriodSnapshot {
    UserPeriodSnapshot {
        user_id: user_id.to_string(),
        period_xp,
        current_level: level,
        streak_count: 0,
        mastered_characters: 0,
        unlocked_achievements: 0,
        practice_days: 0,
        average_accuracy: accuracy,
    }
}

fn arb_snapshots() -> impl Strategy<Value = Vec<UserPeriodSnapshot>> {
    prop::collection::vec((0i64..5000, 1i32..40, 0u32..=1000), 1..60).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (xp, level, accuracy))| {
                snapshot(&format!("user-{i:03}"), xp, level, accuracy as f64 / 10.0)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn ranks_are_dense_and_tie_respecting(snapshots in arb_snapshots()) {
        let period = LeaderboardPeriod::Weekly;
        let ranked = rank_snapshots(snapshots, period);

        prop_assert!(!ranked.is_empty());
        prop_assert_eq!(ranked[0].rank, 1);

        for entry in &ranked {
            let strictly_greater = ranked.iter().filter(|e| e.score > entry.score).count();
            prop_assert_eq!(entry.rank as usize, strictly_greater + 1);
        }

        // Descending by score, stable on userId within a tie.
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].user_id < pair[1].user_id);
                prop_assert_eq!(pair[0].rank, pair[1].rank);
            }
        }
    }

    #[test]
    fn ranking_is_deterministic(snapshots in arb_snapshots()) {
        let first = rank_snapshots(snapshots.clone(), LeaderboardPeriod::Monthly);
        let second = rank_snapshots(snapshots, LeaderboardPeriod::Monthly);
        let lhs: Vec<(String, i32, i64)> = first.iter().map(|e| (e.user_id.clone(), e.rank, e.score)).collect();
        let rhs: Vec<(String, i32, i64)> = second.iter().map(|e| (e.user_id.clone(), e.rank, e.score)).collect();
        prop_assert_eq!(lhs, rhs);
    }

    #[test]
    fn period_multiplier_orders_scores(xp in 0i64..10_000, level in 1i32..40) {
        let snap = snapshot("u1", xp, level, 50.0);
        let daily = composite_score(&snap, LeaderboardPeriod::Daily);
        let weekly = composite_score(&snap, LeaderboardPeriod::Weekly);
        let monthly = composite_score(&snap, LeaderboardPeriod::Monthly);
        let all_time = composite_score(&snap, LeaderboardPeriod::AllTime);
        prop_assert!(daily <= weekly && weekly <= monthly && monthly <= all_time);
        prop_assert!(daily > 0);
    }
}

#[test]
fn two_way_tie_shares_rank_one_and_third_takes_rank_three() {
    // Two users at 1000 XP, one at 900: ranks 1, 1, 3 — no rank 2.
    let ranked = rank_snapshots(
        vec![
            snapshot("a", 1000, 0, 0.0),
            snapshot("b", 1000, 0, 0.0),
            snapshot("c", 900, 0, 0.0),
        ],
        LeaderboardPeriod::Weekly,
    );
    let ranks: Vec<i32> = ranked.iter().map(|e| e.rank).collect();
    assert_eq!(ranks, vec![1, 1, 3]);
}

//! Property-based tests for the XP award calculator and the level curve.
//!
//! Invariants:
//! - levels are >= 1 and capped, monotone in totalXp
//! - xpToNext always lands exactly on the next threshold
//! - calculateXp is deterministic for identical (source, metadata)

use proptest::prelude::*;

use moji_progress::config::XpTuning;
use moji_progress::db::operations::progress::XpSource;
use moji_progress::services::xp::{calculate_xp, level_from_total_xp, MAX_LEVEL};

fn arb_source() -> impl Strategy<Value = XpSource> {
    prop_oneof![
        Just(XpSource::CharacterPractice),
        Just(XpSource::PerfectStroke),
        Just(XpSource::DailyStreak),
        Just(XpSource::AchievementUnlock),
        Just(XpSource::LessonCompletion),
        Just(XpSource::VocabularyLearned),
        Just(XpSource::StreakMilestone),
        Just(XpSource::PerfectScore),
        Just(XpSource::DailyLogin),
        Just(XpSource::WeeklyChallenge),
        Just(XpSource::MonthlyChallenge),
        Just(XpSource::SocialShare),
        Just(XpSource::ReviewSession),
        Just(XpSource::MistakeCorrection),
        Just(XpSource::SpeedChallenge),
    ]
}

proptest! {
    #[test]
    fn level_is_bounded(total in 0i64..5_000_000) {
        let tuning = XpTuning::default();
        let info = level_from_total_xp(total, &tuning);
        prop_assert!(info.level >= 1);
        prop_assert!(info.level <= MAX_LEVEL);
        prop_assert!(info.xp_required <= total);
    }

    #[test]
    fn level_is_monotone_in_total_xp(a in 0i64..2_000_000, b in 0i64..2_000_000) {
        let tuning = XpTuning::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(
            level_from_total_xp(lo, &tuning).level <= level_from_total_xp(hi, &tuning).level
        );
    }

    #[test]
    fn xp_to_next_lands_on_the_next_level(total in 0i64..1_000_000) {
        let tuning = XpTuning::default();
        let info = level_from_total_xp(total, &tuning);
        prop_assert!(info.xp_to_next > 0);
        let bumped = level_from_total_xp(total + info.xp_to_next, &tuning);
        prop_assert_eq!(bumped.level, info.level + 1);
        // One XP short must not level.
        let shy = level_from_total_xp(total + info.xp_to_next - 1, &tuning);
        prop_assert_eq!(shy.level, info.level);
    }

    #[test]
    fn calculate_xp_is_deterministic(
        source in arb_source(),
        streak in any::<bool>(),
        achievement in any::<bool>(),
        reward in 1i64..1000,
    ) {
        let tuning = XpTuning::default();
        let metadata = serde_json::json!({
            "streakMultiplier": streak,
            "achievementMultiplier": achievement,
            "xpReward": reward,
            "streakCount": reward,
        });

        let first = calculate_xp(source, Some(&metadata), &tuning);
        let second = calculate_xp(source, Some(&metadata), &tuning);
        prop_assert_eq!(first.base_xp, second.base_xp);
        prop_assert_eq!(first.total_xp, second.total_xp);
        prop_assert_eq!(first.bonus_xp, second.bonus_xp);
        prop_assert_eq!(first.description, second.description);
    }

    #[test]
    fn ledger_sum_reconciles_with_total_xp(
        awards in prop::collection::vec((arb_source(), any::<bool>()), 1..40),
    ) {
        // totalXp only ever moves by appending a ledger entry of the same
        // amount, so the running sum must always match.
        let tuning = XpTuning::default();
        let mut ledger: Vec<i64> = Vec::new();
        let mut total_xp = 0i64;

        for (source, boosted) in awards {
            let metadata = serde_json::json!({"streakMultiplier": boosted});
            let calc = calculate_xp(source, Some(&metadata), &tuning);
            prop_assert!(calc.total_xp > 0);
            ledger.push(calc.total_xp);
            total_xp += calc.total_xp;
            prop_assert_eq!(ledger.iter().sum::<i64>(), total_xp);
        }
    }

    #[test]
    fn multipliers_never_shrink_the_award(source in arb_source()) {
        let tuning = XpTuning::default();
        let plain = calculate_xp(source, None, &tuning);
        let boosted = calculate_xp(
            source,
            Some(&serde_json::json!({"streakMultiplier": true})),
            &tuning,
        );
        prop_assert!(boosted.total_xp >= plain.total_xp);
        prop_assert!(plain.total_xp > 0);
    }
}

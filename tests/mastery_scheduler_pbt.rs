//! Property-based tests for the mastery updater and review scheduler.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use moji_progress::db::operations::mastery::{CharacterType, MasteryLevel};
use moji_progress::services::mastery::{
    apply_practice, promoted_level, review_interval_days, session_xp, PracticeObservation,
};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
}

fn arb_observation() -> impl Strategy<Value = PracticeObservation> {
    (
        0u32..=1000,     // accuracy in tenths of a percent
        0i64..600,       // seconds spent
        any::<bool>(),   // perfect
        (1i32..=10),     // strokes total
    )
        .prop_flat_map(|(accuracy, time, perfect, total)| {
            (0..=total).prop_map(move |correct| PracticeObservation {
                character_type: CharacterType::Kanji,
                accuracy: accuracy as f64 / 10.0,
                time_spent_secs: time,
                is_perfect: perfect,
                strokes_correct: correct,
                strokes_total: total,
            })
        })
}

proptest! {
    #[test]
    fn running_stats_stay_in_bounds(observations in prop::collection::vec(arb_observation(), 1..20)) {
        let mut state = None;
        let mut when = base_time();

        for obs in &observations {
            let next = apply_practice(state.as_ref(), "u1", "c1", obs, when);

            prop_assert!((0.0..=100.0).contains(&next.accuracy_score));
            prop_assert!((0.0..=100.0).contains(&next.stroke_order_score));
            prop_assert!((0.0..=100.0).contains(&next.recognition_score));
            prop_assert!(next.next_review_date.unwrap() >= next.last_practiced.unwrap());

            state = Some(next);
            when += Duration::hours(6);
        }

        let final_state = state.unwrap();
        prop_assert_eq!(final_state.practice_count as usize, observations.len());
        prop_assert!(final_state.correct_count <= final_state.practice_count);
    }

    #[test]
    fn mastery_level_never_decreases(observations in prop::collection::vec(arb_observation(), 2..20)) {
        let mut state = None;
        let mut when = base_time();
        let mut previous_level = MasteryLevel::Learning;

        for obs in &observations {
            let next = apply_practice(state.as_ref(), "u1", "c1", obs, when);
            prop_assert!(next.mastery_level >= previous_level);
            previous_level = next.mastery_level;
            state = Some(next);
            when += Duration::days(1);
        }
    }

    #[test]
    fn promotion_thresholds_apply_in_priority_order(
        accuracy in 0u32..=1000,
        count in 1i32..50,
    ) {
        let accuracy = accuracy as f64 / 10.0;
        let level = promoted_level(MasteryLevel::Learning, accuracy, count);

        let expected = if accuracy >= 95.0 && count >= 10 {
            MasteryLevel::Expert
        } else if accuracy >= 90.0 && count >= 5 {
            MasteryLevel::Mastered
        } else if accuracy >= 80.0 && count >= 3 {
            MasteryLevel::Practicing
        } else {
            MasteryLevel::Learning
        };
        prop_assert_eq!(level, expected);
    }

    #[test]
    fn review_interval_is_positive_and_capped(
        accuracy in 0u32..=1000,
        streak in 0i32..50,
    ) {
        let accuracy = accuracy as f64 / 10.0;
        for level in [
            MasteryLevel::Learning,
            MasteryLevel::Practicing,
            MasteryLevel::Mastered,
            MasteryLevel::Expert,
        ] {
            let days = review_interval_days(level, accuracy, streak);
            prop_assert!(days >= 1);
            // 14 * 2 * 1.5 is the largest possible stretch.
            prop_assert!(days <= 42);
        }
    }

    #[test]
    fn session_xp_is_within_the_bonus_envelope(
        accuracy in 0u32..=1000,
        time in 0i64..600,
        perfect in any::<bool>(),
    ) {
        let xp = session_xp(accuracy as f64 / 10.0, time, perfect);
        prop_assert!(xp >= 10);
        prop_assert!(xp <= 10 + 20 + 25 + 10);
    }
}

#[test]
fn first_practice_scenario() {
    // totalXp=0 user practices at 96% accuracy, perfect, 3/3 strokes, 25s.
    let obs = PracticeObservation {
        character_type: CharacterType::Hiragana,
        accuracy: 96.0,
        time_spent_secs: 25,
        is_perfect: true,
        strokes_correct: 3,
        strokes_total: 3,
    };
    let mastery = apply_practice(None, "u1", "c1", &obs, base_time());

    assert_eq!(mastery.mastery_level, MasteryLevel::Learning);
    assert_eq!(mastery.accuracy_score, 96.0);
    assert_eq!(session_xp(obs.accuracy, obs.time_spent_secs, obs.is_perfect), 65);
}

#[test]
fn expert_beats_mastered_when_both_qualify() {
    // accuracy=96, practiceCount=12 satisfies every band; highest bar wins.
    assert_eq!(
        promoted_level(MasteryLevel::Learning, 96.0, 12),
        MasteryLevel::Expert
    );
}

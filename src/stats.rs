use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;

/// Tunables for the gamified stats, read from `setup.gamification`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameRules {
    pub hours_per_level: f64,
    pub points_per_hour: f64,
    pub topics_per_level: i64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            hours_per_level: 10.0,
            points_per_hour: 10.0,
            topics_per_level: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourGame {
    pub level: i64,
    pub points: i64,
    pub level_progress: i64,
    pub streak_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicLevel {
    pub level: i64,
    pub level_progress: i64,
}

pub fn completion_percentage(completed_hours: f64, total_hours: f64) -> i64 {
    if total_hours > 0.0 {
        ((completed_hours / total_hours) * 100.0).round() as i64
    } else {
        0
    }
}

/// Level, points and progress-to-next-level earned from completed study hours.
pub fn hour_game(completed_hours: f64, rules: &GameRules, streak_days: u32) -> HourGame {
    let completed_hours = completed_hours.max(0.0);
    let per_level = rules.hours_per_level.max(f64::EPSILON);
    let level = (completed_hours / per_level).floor() as i64 + 1;
    let points = (completed_hours * rules.points_per_hour).round() as i64;
    let level_progress = ((completed_hours % per_level) / per_level * 100.0).round() as i64;
    HourGame {
        level,
        points,
        level_progress,
        streak_days,
    }
}

pub fn topic_level(completed_topics: i64, rules: &GameRules) -> TopicLevel {
    let per_level = rules.topics_per_level.max(1);
    let completed_topics = completed_topics.max(0);
    TopicLevel {
        level: completed_topics / per_level,
        level_progress: completed_topics % per_level,
    }
}

/// Consecutive days with at least one completion, ending today. A streak that
/// ended yesterday still counts since today may not be over yet.
pub fn current_streak(completion_days: &[NaiveDate], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = completion_days.iter().copied().collect();
    let mut check = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut streak = 0;
    while days.contains(&check) {
        streak += 1;
        check -= Duration::days(1);
    }
    streak
}

pub fn longest_streak(completion_days: &[NaiveDate]) -> u32 {
    let days: BTreeSet<NaiveDate> = completion_days.iter().copied().collect();
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for d in days {
        run = match prev {
            Some(p) if d - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(d);
    }
    best
}

const QUOTES: &[&str] = &[
    "The secret of getting ahead is getting started.",
    "Don't watch the clock; do what it does. Keep going.",
    "Success is the sum of small efforts, repeated day in and day out.",
    "The expert in anything was once a beginner.",
    "You don't have to be great to start, but you have to start to be great.",
];

/// Stable for a given day so repeated dashboard loads agree.
pub fn quote_of_the_day(today: NaiveDate) -> &'static str {
    QUOTES[today.ordinal0() as usize % QUOTES.len()]
}

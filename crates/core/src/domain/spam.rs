//! Additive spam heuristics for reader comments.
//!
//! Every signal contributes a fixed weight in hundredths; the sum is capped at
//! 100. Working in integers keeps the classification thresholds exact.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::domain::comments::CommentStatus;

pub const SPAM_KEYWORDS: &[&str] = &[
    "viagra",
    "casino",
    "lottery",
    "prize",
    "winner",
    "click here",
    "buy now",
];

pub const DISPOSABLE_DOMAINS: &[&str] = &["tempmail", "throwaway", "guerrillamail", "10minutemail"];

const MAX_POINTS: u32 = 100;
const SPAM_ABOVE: u32 = 70;
const PENDING_ABOVE: u32 = 30;

const MANY_URLS_POINTS: u32 = 30;
const SOME_URLS_POINTS: u32 = 10;
const KEYWORD_POINTS: u32 = 20;
const SHOUTING_POINTS: u32 = 20;
const REPEATED_RUN_POINTS: u32 = 10;
const DISPOSABLE_EMAIL_POINTS: u32 = 30;
const BOT_SPEED_POINTS: u32 = 40;
const STALE_FORM_POINTS: u32 = 20;
const TOO_SHORT_POINTS: u32 = 20;

const MANY_URLS: usize = 3;
const SHOUTING_RATIO: f64 = 0.3;
const REPEATED_RUN_LEN: usize = 4;
const BOT_SPEED_SECS: f64 = 3.0;
const STALE_FORM_SECS: f64 = 1800.0;
const MIN_CONTENT_CHARS: usize = 10;

/// What the scorer looks at.
#[derive(Debug, Clone, Copy)]
pub struct SpamInput<'a> {
    pub content: &'a str,
    pub author_email: &'a str,
    pub time_to_submit_secs: Option<f64>,
}

/// Individual signals that fired, kept for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpamSignals {
    pub url_count: usize,
    pub keywords: Vec<&'static str>,
    pub shouting: bool,
    pub repeated_run: bool,
    pub disposable_email: bool,
    pub bot_speed: bool,
    pub stale_form: bool,
    pub too_short: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpamScore(u32);

impl SpamScore {
    pub fn from_points(points: u32) -> Self {
        SpamScore(points.min(MAX_POINTS))
    }

    pub fn points(self) -> u32 {
        self.0
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / 100.0
    }

    pub fn classify(self) -> CommentStatus {
        if self.0 > SPAM_ABOVE {
            CommentStatus::Spam
        } else if self.0 > PENDING_ABOVE {
            CommentStatus::Pending
        } else {
            CommentStatus::Approved
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamReport {
    pub score: SpamScore,
    pub signals: SpamSignals,
}

pub fn score(input: SpamInput<'_>) -> SpamReport {
    let signals = detect(input);
    let mut points = 0u32;

    if signals.url_count > MANY_URLS {
        points += MANY_URLS_POINTS;
    } else if signals.url_count > 0 {
        points += SOME_URLS_POINTS;
    }
    points += KEYWORD_POINTS * signals.keywords.len() as u32;
    if signals.shouting {
        points += SHOUTING_POINTS;
    }
    if signals.repeated_run {
        points += REPEATED_RUN_POINTS;
    }
    if signals.disposable_email {
        points += DISPOSABLE_EMAIL_POINTS;
    }
    if signals.bot_speed {
        points += BOT_SPEED_POINTS;
    }
    if signals.stale_form {
        points += STALE_FORM_POINTS;
    }
    if signals.too_short {
        points += TOO_SHORT_POINTS;
    }

    SpamReport {
        score: SpamScore::from_points(points),
        signals,
    }
}

fn detect(input: SpamInput<'_>) -> SpamSignals {
    let content = input.content;
    let lowered = content.to_lowercase();
    let char_count = content.chars().count();

    SpamSignals {
        url_count: count_urls(content),
        keywords: SPAM_KEYWORDS
            .iter()
            .copied()
            .filter(|keyword| lowered.contains(keyword))
            .collect(),
        shouting: uppercase_ratio(content, char_count) > SHOUTING_RATIO,
        repeated_run: has_repeated_run(content, REPEATED_RUN_LEN),
        disposable_email: is_disposable_email(input.author_email),
        bot_speed: input
            .time_to_submit_secs
            .is_some_and(|secs| secs < BOT_SPEED_SECS),
        stale_form: input
            .time_to_submit_secs
            .is_some_and(|secs| secs > STALE_FORM_SECS),
        too_short: char_count < MIN_CONTENT_CHARS,
    }
}

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("url pattern"));

/// Counts `http://` / `https://` links, each running up to the next whitespace.
pub fn count_urls(content: &str) -> usize {
    URL_PATTERN.find_iter(content).count()
}

fn uppercase_ratio(content: &str, char_count: usize) -> f64 {
    if char_count == 0 {
        return 0.0;
    }
    let upper = content.chars().filter(|ch| ch.is_uppercase()).count();
    upper as f64 / char_count as f64
}

/// True when some character other than a newline repeats `run` or more times in a row.
pub fn has_repeated_run(content: &str, run: usize) -> bool {
    let mut previous = None;
    let mut streak = 0;
    for ch in content.chars() {
        if ch == '\n' {
            previous = None;
            streak = 0;
            continue;
        }
        if previous == Some(ch) {
            streak += 1;
        } else {
            previous = Some(ch);
            streak = 1;
        }
        if streak >= run {
            return true;
        }
    }
    false
}

pub fn is_disposable_email(email: &str) -> bool {
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    DISPOSABLE_DOMAINS
        .iter()
        .any(|fragment| domain.contains(fragment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(content: &'a str, email: &'a str, secs: Option<f64>) -> SpamInput<'a> {
        SpamInput {
            content,
            author_email: email,
            time_to_submit_secs: secs,
        }
    }

    #[test]
    fn friendly_comment_scores_zero() {
        let report = score(input(
            "Great article, thanks for sharing!",
            "reader@gmail.com",
            Some(45.0),
        ));
        assert_eq!(report.score.points(), 0);
        assert_eq!(report.score.value(), 0.0);
        assert_eq!(report.score.classify(), CommentStatus::Approved);
    }

    #[test]
    fn obvious_spam_is_capped_at_one() {
        let report = score(input(
            "BUY NOW!!! http://a http://b http://c http://d",
            "x@guerrillamail.com",
            Some(1.0),
        ));
        assert_eq!(report.signals.url_count, 4);
        assert_eq!(report.signals.keywords, vec!["buy now"]);
        assert!(report.signals.disposable_email);
        assert!(report.signals.bot_speed);
        assert_eq!(report.score.value(), 1.0);
        assert_eq!(report.score.classify(), CommentStatus::Spam);
    }

    #[test]
    fn url_tiers() {
        assert_eq!(count_urls("no links here"), 0);
        assert_eq!(count_urls("see https://example.com and http://x.io/a?b"), 2);
        assert_eq!(count_urls("http:// alone"), 0);
        let one = score(input("see https://example.com for details", "a@b.co", None));
        assert_eq!(one.score.points(), 10);
        let many = score(input(
            "http://a.io http://b.io http://c.io http://d.io",
            "a@b.co",
            None,
        ));
        assert_eq!(many.score.points(), 30);
    }

    #[test]
    fn keywords_count_once_each() {
        let report = score(input(
            "You are a WINNER winner, claim the prize at the casino",
            "a@b.co",
            None,
        ));
        assert_eq!(report.signals.keywords, vec!["casino", "prize", "winner"]);
        assert_eq!(report.score.points(), 60);
        assert_eq!(report.score.classify(), CommentStatus::Pending);
    }

    #[test]
    fn boundary_at_thirty_points_stays_approved() {
        // one link (+10) and one keyword (+20)
        let report = score(input("a lottery story http://x.io indeed", "a@b.co", None));
        assert_eq!(report.score.points(), 30);
        assert_eq!(report.score.classify(), CommentStatus::Approved);
    }

    #[test]
    fn shouting_and_repeats() {
        let report = score(input("THIS IS SO GOOD", "a@b.co", None));
        assert!(report.signals.shouting);
        assert!(!report.signals.repeated_run);
        assert!(has_repeated_run("sooooo nice", 4));
        assert!(!has_repeated_run("sooo nice", 4));
        assert!(!has_repeated_run("a\n\n\n\nb", 4));
    }

    #[test]
    fn timing_signals() {
        let fast = score(input("thoughtful comment text", "a@b.co", Some(2.9)));
        assert_eq!(fast.score.points(), 40);
        let stale = score(input("thoughtful comment text", "a@b.co", Some(1801.0)));
        assert_eq!(stale.score.points(), 20);
        let unknown = score(input("thoughtful comment text", "a@b.co", None));
        assert_eq!(unknown.score.points(), 0);
    }

    #[test]
    fn short_content_and_disposable_domain() {
        let report = score(input("nice", "bob@TempMail.org", Some(30.0)));
        assert!(report.signals.too_short);
        assert!(report.signals.disposable_email);
        assert_eq!(report.score.points(), 50);
        assert!(!is_disposable_email("tempmail@gmail.com"));
    }

    #[test]
    fn adding_signals_never_lowers_the_score() {
        let mut content = String::from("a reasonable comment about the post");
        let mut last = score(input(&content, "a@b.co", Some(20.0))).score;
        for keyword in SPAM_KEYWORDS {
            content.push(' ');
            content.push_str(keyword);
            let next = score(input(&content, "a@b.co", Some(20.0))).score;
            assert!(next >= last);
            assert!(next.value() <= 1.0);
            last = next;
        }
        assert_eq!(last.value(), 1.0);
    }
}

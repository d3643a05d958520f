//! Authenticity checks over a single scraped item.
//!
//! Six independent checks each deduct their weight from a starting score of
//! 1.0. The length, spam and promotional checks are hard: failing any of them
//! rejects the item outright. The other three only lower the score, and the
//! item is rejected when the composite falls below `min_score`.

use super::text;
use crate::error::{Error, Result};
use crate::types::ScrapedItem;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    pub min_title_len: usize,
    pub max_title_len: usize,
    pub min_content_len: usize,
    pub max_content_len: usize,

    pub spam_phrases: Vec<String>,
    pub max_exclamations: usize,
    pub max_questions: usize,
    pub max_uppercase_ratio: f64,
    /// Uppercase ratio is only judged on text longer than this.
    pub uppercase_min_len: usize,
    pub repeated_run: usize,

    pub promotional_phrases: Vec<String>,
    pub max_promotional_hits: usize,
    pub promotional_domain_markers: Vec<String>,
    pub price_pattern: String,
    pub max_price_mentions: usize,

    pub placeholder_authors: Vec<String>,
    pub generic_author_pattern: String,
    pub bot_author_markers: Vec<String>,

    pub copy_markers: Vec<String>,
    pub template_patterns: Vec<String>,

    pub weights: CheckWeights,
    pub min_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckWeights {
    pub length: f64,
    pub spam: f64,
    pub promotional: f64,
    pub author: f64,
    pub originality: f64,
    pub engagement: f64,
}

impl Default for CheckWeights {
    fn default() -> Self {
        Self {
            length: 0.3,
            spam: 0.4,
            promotional: 0.3,
            author: 0.2,
            originality: 0.2,
            engagement: 0.1,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_title_len: 10,
            max_title_len: 300,
            min_content_len: 20,
            max_content_len: 10_000,
            spam_phrases: strings(&[
                "buy now",
                "click here",
                "limited time",
                "act now",
                "free money",
                "guaranteed",
                "winner",
                "congratulations",
                "urgent",
                "exclusive offer",
                "make money fast",
                "work from home",
                "get rich quick",
                "no experience needed",
            ]),
            max_exclamations: 5,
            max_questions: 3,
            max_uppercase_ratio: 0.3,
            uppercase_min_len: 50,
            repeated_run: 5,
            promotional_phrases: strings(&[
                "sponsored",
                "ad",
                "promoted",
                "advertisement",
                "affiliate",
                "discount code",
                "promo code",
                "sale",
                "offer expires",
                "limited time",
            ]),
            max_promotional_hits: 1,
            promotional_domain_markers: strings(&["affiliate", "promo", "deal", "discount"]),
            price_pattern: r"\$\d+|\d+\s*dollars?|\d+\s*usd|\bprice\b|\bcost\b|\bbuy\b|\bpurchase\b"
                .into(),
            max_price_mentions: 2,
            placeholder_authors: strings(&["[deleted]", "unknown", "n/a"]),
            generic_author_pattern: r"^(user|guest|anonymous)\d*$".into(),
            bot_author_markers: strings(&["bot", "automated", "script", "crawler"]),
            copy_markers: strings(&[
                "copy and paste",
                "copied from",
                "source:",
                "via @",
                "repost",
                "shared from",
                "originally posted",
                "credit to",
            ]),
            template_patterns: strings(&[
                r"fill in the blank",
                r"\[insert \w+\]",
                r"\{\{\w+\}\}",
                r"\[your \w+\]",
            ]),
            weights: CheckWeights::default(),
            min_score: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    Length,
    Spam,
    Promotional,
    Author,
    Originality,
    Engagement,
}

impl Check {
    /// Hard checks reject on their own; soft ones only lower the score.
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Length | Self::Spam | Self::Promotional)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: Check,
    pub passed: bool,
    pub reason: String,
}

impl CheckResult {
    fn pass(check: Check) -> Self {
        Self {
            check,
            passed: true,
            reason: String::new(),
        }
    }

    fn fail(check: Check, reason: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub score: f64,
    pub reason: String,
    pub checks: Vec<CheckResult>,
}

impl Validation {
    pub fn check(&self, check: Check) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }
}

pub struct ContentValidator {
    rules: ValidationRules,
    price: Regex,
    generic_author: Regex,
    templates: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::config(format!("bad validation pattern '{pattern}': {e}")))
}

impl ContentValidator {
    pub fn new(rules: ValidationRules) -> Result<Self> {
        let price = compile(&rules.price_pattern)?;
        let generic_author = compile(&rules.generic_author_pattern)?;
        let templates = rules
            .template_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            price,
            generic_author,
            templates,
        })
    }

    pub fn validate(&self, item: &ScrapedItem) -> Validation {
        let checks = vec![
            self.check_length(item),
            self.check_spam(item),
            self.check_promotional(item),
            self.check_author(item),
            self.check_originality(item),
            self.check_engagement(item),
        ];

        let mut score = 1.0;
        let mut valid = true;
        let mut reason = String::new();
        for result in checks.iter().filter(|c| !c.passed) {
            score -= self.weight(result.check);
            if result.check.is_hard() {
                if valid {
                    reason = result.reason.clone();
                }
                valid = false;
            }
        }
        let score = f64::clamp(score, 0.0, 1.0);

        if score < self.rules.min_score {
            if valid {
                reason = "overall authenticity score too low".into();
            }
            valid = false;
        }

        Validation {
            valid,
            score,
            reason,
            checks,
        }
    }

    fn weight(&self, check: Check) -> f64 {
        let w = &self.rules.weights;
        match check {
            Check::Length => w.length,
            Check::Spam => w.spam,
            Check::Promotional => w.promotional,
            Check::Author => w.author,
            Check::Originality => w.originality,
            Check::Engagement => w.engagement,
        }
    }

    fn check_length(&self, item: &ScrapedItem) -> CheckResult {
        let r = &self.rules;
        let title = item.title.chars().count();
        let body = item.content.chars().count();

        if title < r.min_title_len {
            return CheckResult::fail(Check::Length, format!("title shorter than {} chars", r.min_title_len));
        }
        if body < r.min_content_len {
            return CheckResult::fail(Check::Length, format!("content shorter than {} chars", r.min_content_len));
        }
        if title > r.max_title_len {
            return CheckResult::fail(Check::Length, format!("title longer than {} chars", r.max_title_len));
        }
        if body > r.max_content_len {
            return CheckResult::fail(Check::Length, format!("content longer than {} chars", r.max_content_len));
        }
        CheckResult::pass(Check::Length)
    }

    fn check_spam(&self, item: &ScrapedItem) -> CheckResult {
        let r = &self.rules;
        let full = format!("{} {}", item.title, item.content);

        let hits = text::matched_phrases(&full, &r.spam_phrases);
        if !hits.is_empty() {
            return CheckResult::fail(Check::Spam, format!("spam phrases: {}", hits.join(", ")));
        }

        let exclamations = full.matches('!').count();
        let questions = full.matches('?').count();
        if exclamations > r.max_exclamations || questions > r.max_questions {
            return CheckResult::fail(Check::Spam, "excessive punctuation");
        }

        if full.chars().count() > r.uppercase_min_len
            && text::uppercase_ratio(&full) > r.max_uppercase_ratio
        {
            return CheckResult::fail(Check::Spam, "excessive capitalization");
        }

        if text::has_repeated_run(&full.to_lowercase(), r.repeated_run) {
            return CheckResult::fail(Check::Spam, "repeated characters");
        }
        CheckResult::pass(Check::Spam)
    }

    fn check_promotional(&self, item: &ScrapedItem) -> CheckResult {
        let r = &self.rules;
        let full = format!("{} {}", item.title, item.content);

        let hits = text::matched_words(&full, &r.promotional_phrases);
        if hits.len() > r.max_promotional_hits {
            return CheckResult::fail(
                Check::Promotional,
                format!("promotional indicators: {}", hits.join(", ")),
            );
        }

        let promo_url = text::extract_urls(&full).iter().any(|url| {
            text::extract_domain(url).is_some_and(|domain| {
                let domain = domain.to_lowercase();
                r.promotional_domain_markers.iter().any(|m| domain.contains(m.as_str()))
            })
        });
        if promo_url {
            return CheckResult::fail(Check::Promotional, "promotional url");
        }

        let prices = self.price.find_iter(&full).count();
        if prices > r.max_price_mentions {
            return CheckResult::fail(Check::Promotional, "multiple price or purchase references");
        }
        CheckResult::pass(Check::Promotional)
    }

    fn check_author(&self, item: &ScrapedItem) -> CheckResult {
        let author = item.author.trim();
        let lower = author.to_lowercase();

        if author.chars().count() < 2 || self.rules.placeholder_authors.iter().any(|p| *p == lower) {
            return CheckResult::fail(Check::Author, "no usable author");
        }
        if self.generic_author.is_match(author) {
            return CheckResult::fail(Check::Author, "generic author name");
        }
        if !text::matched_words(&name_words(author), &self.rules.bot_author_markers).is_empty() {
            return CheckResult::fail(Check::Author, "author looks automated");
        }
        CheckResult::pass(Check::Author)
    }

    fn check_originality(&self, item: &ScrapedItem) -> CheckResult {
        let hits = text::matched_phrases(&item.content, &self.rules.copy_markers);
        if !hits.is_empty() {
            return CheckResult::fail(Check::Originality, format!("copy markers: {}", hits.join(", ")));
        }
        if self.templates.iter().any(|t| t.is_match(&item.content)) {
            return CheckResult::fail(Check::Originality, "template placeholders");
        }
        CheckResult::pass(Check::Originality)
    }

    fn check_engagement(&self, item: &ScrapedItem) -> CheckResult {
        let (likes, comments) = (item.likes, item.comments);

        if likes > 100 && comments == 0 {
            return CheckResult::fail(Check::Engagement, "many likes without comments");
        }
        if comments > likes && likes > 10 {
            return CheckResult::fail(Check::Engagement, "more comments than likes");
        }

        let nonzero: Vec<u64> = [likes, comments, item.shares, item.views]
            .into_iter()
            .filter(|m| *m > 0)
            .collect();
        let round = nonzero.iter().filter(|m| *m % 100 == 0).count();
        if round > 1 && nonzero.len() > 2 {
            return CheckResult::fail(Check::Engagement, "suspiciously round engagement numbers");
        }
        CheckResult::pass(Check::Engagement)
    }
}

/// Split a username into lowercase words at separators, digits and
/// lower-to-upper case changes: `AutoPosterBot` and `promo_bot2` both end in `bot`.
fn name_words(author: &str) -> String {
    let mut out = String::with_capacity(author.len() + 4);
    let mut prev_lower = false;
    for c in author.chars() {
        if !c.is_alphabetic() {
            if !out.ends_with(' ') {
                out.push(' ');
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase();
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Platform;
    use chrono::Utc;

    pub(crate) fn item(title: &str, content: &str) -> ScrapedItem {
        ScrapedItem {
            id: "abc123".into(),
            title: title.into(),
            content: content.into(),
            url: "https://www.reddit.com/r/startups/comments/abc123/x/".into(),
            author: "jane_founder".into(),
            created_at: Some(Utc::now()),
            likes: 42,
            comments: 12,
            shares: 1,
            views: 0,
            thumbnail: None,
            media_urls: Vec::new(),
            tags: Vec::new(),
            platform: Platform::Reddit,
            scope: Some("startups".into()),
            score: 42,
            upvote_ratio: Some(0.93),
        }
    }

    fn validator() -> ContentValidator {
        ContentValidator::new(ValidationRules::default()).unwrap()
    }

    const BODY: &str = "We spent six months talking to customers before writing code, and it changed everything about our roadmap.";

    #[test]
    fn clean_item_passes() {
        let v = validator().validate(&item("Lessons from our first year", BODY));
        assert!(v.valid, "{}", v.reason);
        assert_eq!(v.score, 1.0);
        assert!(v.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn spam_phrase_is_a_hard_fail() {
        let v = validator().validate(&item(
            "Passive income that works",
            "Guaranteed returns, buy now!!!!!",
        ));
        assert!(!v.valid);
        assert!(!v.check(Check::Spam).unwrap().passed);
        assert!(v.reason.contains("guaranteed"));
    }

    #[test]
    fn short_title_rejected() {
        let v = validator().validate(&item("Hi all", BODY));
        assert!(!v.valid);
        assert!(!v.check(Check::Length).unwrap().passed);
    }

    #[test]
    fn shouting_is_spam() {
        let body = "THIS IS THE BEST TOOL I HAVE EVER USED FOR MY BUSINESS HONESTLY";
        let v = validator().validate(&item("Tool recommendation thread", body));
        assert!(!v.valid);
        assert_eq!(v.check(Check::Spam).unwrap().reason, "excessive capitalization");
    }

    #[test]
    fn promotional_words_need_two_hits() {
        let one = item("Our launch went well", "This post is sponsored by nobody, just sharing numbers from launch.");
        assert!(validator().validate(&one).valid);

        let two = item("Our launch went well", "Sponsored post: use promo code LAUNCH for the first month of access.");
        let v = validator().validate(&two);
        assert!(!v.valid);
        assert!(!v.check(Check::Promotional).unwrap().passed);
    }

    #[test]
    fn promotional_domain_rejected() {
        let it = item("Found this tool today", "Check it out at https://best-deals.example.com/tool right away");
        assert!(!validator().validate(&it).valid);
    }

    #[test]
    fn soft_failures_accumulate() {
        let mut it = item("Lessons from our first year", BODY);
        it.author = "user42".into();
        let v = validator().validate(&it);
        assert!(v.valid);
        assert!((v.score - 0.8).abs() < 1e-9);

        it.content = format!("{BODY} Credit to my cofounder.");
        let v = validator().validate(&it);
        assert!(v.valid, "exactly at the threshold still passes");
        assert!((v.score - 0.6).abs() < 1e-9);

        it.likes = 500;
        it.comments = 0;
        let v = validator().validate(&it);
        assert!(!v.valid);
        assert_eq!(v.reason, "overall authenticity score too low");
    }

    #[test]
    fn bot_author_and_templates() {
        let mut it = item("Weekly discussion thread", "Share your [insert topic] wins and losses this week here.");
        it.author = "AutoPosterBot".into();
        let v = validator().validate(&it);
        assert!(!v.check(Check::Author).unwrap().passed);
        assert!(!v.check(Check::Originality).unwrap().passed);
        assert!(v.valid);
    }

    #[test]
    fn bot_markers_match_whole_name_parts() {
        for name in ["Abbott", "robotics_fan", "scripture_reader", "TalbotCo"] {
            let mut it = item("Lessons from our first year", BODY);
            it.author = name.into();
            let v = validator().validate(&it);
            assert!(v.check(Check::Author).unwrap().passed, "{name} flagged");
        }
        for name in ["promo_bot", "news-bot-2", "crawler9000", "DailyBot", "automated poster"] {
            let mut it = item("Lessons from our first year", BODY);
            it.author = name.into();
            let v = validator().validate(&it);
            assert_eq!(v.check(Check::Author).unwrap().reason, "author looks automated", "{name}");
        }
    }

    #[test]
    fn round_engagement_numbers() {
        let mut it = item("Lessons from our first year", BODY);
        it.likes = 200;
        it.comments = 100;
        it.shares = 3;
        let v = validator().validate(&it);
        assert!(!v.check(Check::Engagement).unwrap().passed);
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let rules = ValidationRules {
            price_pattern: "(".into(),
            ..ValidationRules::default()
        };
        assert!(matches!(ContentValidator::new(rules), Err(Error::Config(_))));
    }
}

//! Stateless string helpers shared by the validator, processor and sources.

use rand::seq::IndexedRandom;
use regex::Regex;
use reqwest::Url;
use scraper::Html;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

static HASHTAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\w+)").expect("static regex"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("static regex"));
static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(jpg|jpeg|png|gif|webp|svg|bmp|ico)(\?.*)?$").expect("static regex")
});
static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(mp4|webm|ogg|avi|mov|wmv|flv|m4v)(\?.*)?$|youtube\.com|youtu\.be|vimeo\.com|dailymotion\.com|twitch\.tv")
        .expect("static regex")
});

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Collapse every whitespace run (line breaks and tabs included) to one space
/// and drop control characters.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text content of an HTML fragment, with script and style bodies removed and
/// entities decoded.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.to_string();
    }
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    for node in fragment.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_code = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style"))
        });
        if !in_code {
            out.push_str(text);
        }
    }
    out
}

/// Shorten to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    const SUFFIX: &str = "...";
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(SUFFIX.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(SUFFIX);
    out
}

pub fn extract_hashtags(text: &str) -> Vec<String> {
    HASHTAG
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .collect()
}

pub fn extract_urls(text: &str) -> Vec<String> {
    URL.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

pub fn strip_urls(text: &str) -> String {
    URL.replace_all(text, "").into_owned()
}

pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

pub fn is_image_url(url: &str) -> bool {
    IMAGE_URL.is_match(url)
}

pub fn is_video_url(url: &str) -> bool {
    VIDEO_URL.is_match(url)
}

/// Jaccard similarity of the lowercase word sets of two texts.
pub fn similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.split_whitespace().map(str::to_lowercase).collect()
    };
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    intersection as f64 / union as f64
}

/// Phrases that occur in `text` as case-insensitive substrings.
pub fn matched_phrases<'a>(text: &str, phrases: &'a [String]) -> Vec<&'a str> {
    let lower = text.to_lowercase();
    phrases
        .iter()
        .filter(|p| !p.is_empty() && lower.contains(&p.to_lowercase()))
        .map(String::as_str)
        .collect()
}

/// Phrases that occur in `text` bounded by non-word characters on both sides,
/// so "ad" does not fire on "read".
pub fn matched_words<'a>(text: &str, phrases: &'a [String]) -> Vec<&'a str> {
    let lower = text.to_lowercase();
    phrases
        .iter()
        .filter(|p| !p.is_empty() && contains_word(&lower, &p.to_lowercase()))
        .map(String::as_str)
        .collect()
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Share of alphabetic characters that are uppercase.
pub fn uppercase_ratio(text: &str) -> f64 {
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    if letters == 0 {
        return 0.0;
    }
    let upper = text.chars().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters as f64
}

/// True when some character repeats at least `run` times in a row.
pub fn has_repeated_run(text: &str, run: usize) -> bool {
    if run < 2 {
        return !text.is_empty();
    }
    let mut prev = None;
    let mut count = 0;
    for c in text.chars() {
        if Some(c) == prev {
            count += 1;
        } else {
            prev = Some(c);
            count = 1;
        }
        if count >= run {
            return true;
        }
    }
    false
}

/// `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Stable 64-bit FNV-1a hash of the normalized title and body, as hex.
pub fn fingerprint(title: &str, content: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let normalized: String = format!("{title} {content}")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();
    let normalized = clean_text(&normalized);

    let hash = normalized.bytes().fold(OFFSET, |h, b| (h ^ b as u64).wrapping_mul(PRIME));
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a\n\n b\t\tc  "), "a b c");
        assert_eq!(clean_text("x\u{0007}y z"), "xy z");
    }

    #[test]
    fn strip_html_drops_tags_and_scripts() {
        let html = "<p>Hello <b>world</b></p><script>alert(1)</script> &amp; more";
        assert_eq!(clean_text(&strip_html(html)), "Hello world & more");
        assert_eq!(strip_html("plain text"), "plain text");
    }

    #[test]
    fn truncate_is_char_aware() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn hashtags_and_urls() {
        assert_eq!(extract_hashtags("Love #Rust and #SaaS"), vec!["rust", "saas"]);
        let urls = extract_urls("see https://a.com/x and http://b.org now");
        assert_eq!(urls, vec!["https://a.com/x", "http://b.org"]);
        assert_eq!(strip_urls("go https://a.com now"), "go  now");
        assert_eq!(extract_domain("https://deals.example.com/p?q=1").as_deref(), Some("deals.example.com"));
        assert!(extract_domain("not a url").is_none());
    }

    #[test]
    fn media_type_detection() {
        assert!(is_image_url("https://i.redd.it/abc.PNG"));
        assert!(is_image_url("https://x.com/a.jpg?w=200"));
        assert!(!is_image_url("https://x.com/a.html"));
        assert!(is_video_url("https://youtu.be/xyz"));
        assert!(is_video_url("https://v.redd.it/a.mp4"));
        assert!(is_valid_url("https://ok.com"));
        assert!(!is_valid_url("ftp://nope.com"));
    }

    #[test]
    fn jaccard_similarity() {
        assert_eq!(similarity("a b c", "a b c"), 1.0);
        assert_eq!(similarity("a b", "c d"), 0.0);
        assert!((similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
        assert_eq!(similarity("", "a"), 0.0);
    }

    #[test]
    fn phrase_matching_modes() {
        let phrases = vec!["ad".to_string(), "promo code".to_string()];
        assert_eq!(matched_phrases("Ready to read?", &phrases), vec!["ad"]);
        assert!(matched_words("Ready to read?", &phrases).is_empty());
        assert_eq!(matched_words("Use PROMO CODE now, ad inside", &phrases).len(), 2);
    }

    #[test]
    fn shouting_and_runs() {
        assert!(uppercase_ratio("HELLO world") > 0.45);
        assert_eq!(uppercase_ratio("1234"), 0.0);
        assert!(has_repeated_run("soooooo good", 5));
        assert!(!has_repeated_run("soooo good", 5));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, base, max), Duration::from_secs(5));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(20));
        assert_eq!(backoff_delay(10, base, max), max);
    }

    #[test]
    fn fingerprint_ignores_case_and_punctuation() {
        assert_eq!(fingerprint("Hello, World!", "same  body"), fingerprint("hello world", "same body"));
        assert_ne!(fingerprint("a", "b"), fingerprint("a", "c"));
        assert_eq!(fingerprint("x", "y").len(), 16);
    }

    #[test]
    fn user_agent_comes_from_pool() {
        assert!(USER_AGENTS.contains(&random_user_agent()));
    }
}

//! Bot-challenge interstitial detection.

/// Lowercased markers of anti-bot interstitials.
pub const CHALLENGE_SIGNATURES: &[&str] = &[
    "just a moment...",
    "attention required! | cloudflare",
    "please wait... | cloudflare",
    "cf-browser-verification",
    "cf_clearance",
    "_cf_chl_opt",
];

const SCAN_CHARS: usize = 2000;
const THIN_PAGE_CHARS: usize = 500;

pub fn is_challenge_page(title: &str, text: &str) -> bool {
    let head: String = text.chars().take(SCAN_CHARS).collect();
    let haystack = format!("{title} {head}").to_lowercase();
    if CHALLENGE_SIGNATURES.iter().any(|sig| haystack.contains(sig)) {
        return true;
    }
    // Interstitials are tiny; a thin page titled "...moment..." is one too.
    text.chars().count() < THIN_PAGE_CHARS && title.to_lowercase().contains("moment")
}

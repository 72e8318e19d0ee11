use std::collections::HashSet;

use regex::Regex;
use url::Url;

/// Chooses which links on a rendered page to follow: same origin as the page,
/// matching `pattern`, fragment-stripped, first occurrence kept, at most `max_links`.
pub fn select_follow_links(
    links: &[String],
    page_url: &str,
    pattern: &Regex,
    max_links: usize,
) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    seen.insert(without_fragment(base.clone()));

    links
        .iter()
        .filter_map(|link| Url::parse(link).ok())
        .filter(|url| {
            url.host_str() == base.host_str()
                && url.port_or_known_default() == base.port_or_known_default()
        })
        .map(without_fragment)
        .filter(|url| pattern.is_match(url))
        .filter(|url| seen.insert(url.clone()))
        .take(max_links)
        .collect()
}

fn without_fragment(mut url: Url) -> String {
    url.set_fragment(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_same_origin_matches_in_discovery_order() {
        let pattern = Regex::new(r"/jobs/\d+").expect("regex");
        let found = select_follow_links(
            &links(&[
                "https://lab.org/jobs/2",
                "https://lab.org/about",
                "https://evil.org/jobs/9",
                "https://lab.org/jobs/1#apply",
                "https://lab.org/jobs/2",
                "https://lab.org:8443/jobs/3",
            ]),
            "https://lab.org/jobs",
            &pattern,
            10,
        );
        assert_eq!(
            found,
            vec!["https://lab.org/jobs/2".to_string(), "https://lab.org/jobs/1".to_string()]
        );
    }

    #[test]
    fn caps_at_max_links_and_skips_the_page_itself() {
        let pattern = Regex::new("calls").expect("regex");
        let raw: Vec<String> = (0..30)
            .map(|i| format!("https://studio.org/calls/{i}"))
            .chain(std::iter::once("https://studio.org/calls".to_string()))
            .collect();
        let found = select_follow_links(&raw, "https://studio.org/calls", &pattern, 10);
        assert_eq!(found.len(), 10);
        assert_eq!(found[0], "https://studio.org/calls/0");
        assert!(!found.contains(&"https://studio.org/calls".to_string()));
    }
}

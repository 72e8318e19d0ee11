//! Prompt templates for the three reasoning calls.

use radar_core::{BatchRequest, Candidate, RequestType, UserProfile};

use super::ReasoningError;

/// Character ceiling applied to page content before it goes into a prompt.
pub const CONTENT_CEILING: usize = 15_000;
pub const TRUNCATION_MARKER: &str = "\n...[truncated]...";

/// Cuts `content` to at most `ceiling` chars (on a char boundary) and marks the cut.
pub fn truncate_content(content: &str, ceiling: usize) -> String {
    match content.char_indices().nth(ceiling) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &content[..byte_idx]),
        None => content.to_string(),
    }
}

pub fn classify_prompt(content: &str) -> String {
    format!(
        r#"Decide whether the content below describes at least one opportunity for a technologist: a residency, fellowship or research program; a hackathon or competition; an internship or job opening; a grant; an accelerator or founder program.

Content:
{content}

Answer with JSON only:
{{"contains_opportunity": true|false, "opportunity_types": ["residency"|"hackathon"|"fellowship"|"job"|"grant"|"internship"|"accelerator"], "confidence": 0.0-1.0, "brief_reason": "one sentence"}}"#
    )
}

pub fn extract_prompt(content: &str) -> String {
    format!(
        r#"List every specific, named opportunity in the content below. A newsletter may contain several; return all of them. Ignore generic pages such as "view all open positions" or "careers at X". Each entry needs a concrete title and some detail.

Content:
{content}

Answer with a JSON array only ([] when nothing specific is present). Each element:
{{"title": "...", "organization": "...", "url": "link to this opportunity", "application_url": "...", "type": "residency|hackathon|fellowship|job|grant|internship|accelerator|competition", "deadline": "YYYY-MM-DD or null", "stipend_amount": number or null, "stipend_currency": "USD", "travel_support": "none|partial|full|unknown", "location": "...", "is_remote": true|false|null, "eligibility": "...", "summary": "2-3 sentences", "highlights": ["..."], "prize_details": "..."}}"#
    )
}

fn profile_text(profile: &UserProfile) -> String {
    let constraints = if profile.constraints.is_null() {
        "{}".to_string()
    } else {
        profile.constraints.to_string()
    };
    format!(
        "Name: {}\nBackground: {}\nInterests: {}\nConstraints: {}",
        or_placeholder(&profile.name, "Unknown"),
        or_placeholder(&profile.background, "Not specified"),
        profile.interests.join(", "),
        constraints,
    )
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn score_prompt(candidate: &Candidate, profile: &UserProfile) -> String {
    let field = |value: &Option<String>, fallback: &'static str| {
        value.clone().unwrap_or_else(|| fallback.to_string())
    };
    let stipend = match candidate.stipend_amount {
        Some(amount) => format!(
            "{} {amount}",
            candidate.stipend_currency.as_deref().unwrap_or("USD")
        ),
        None => "Not specified".to_string(),
    };
    let remote = candidate
        .is_remote
        .map(|r| r.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let travel = candidate
        .travel_support
        .and_then(|t| serde_json::to_value(t).ok())
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        r#"Score this opportunity for the candidate. Be strict; do not inflate.

CANDIDATE:
{profile}

OPPORTUNITY:
Title: {title}
Organization: {organization}
Type: {kind}
Location: {location}
Remote: {remote}
Deadline: {deadline}
Stipend: {stipend}
Travel support: {travel}
Summary: {summary}
Eligibility: {eligibility}

relevance_score (0-1): 0.9+ perfect fit with the candidate's core interests; 0.7-0.89 strong; 0.5-0.69 moderate; 0.3-0.49 weak or wrong level; below 0.3 unrelated or ineligible.
Subtract 0.2-0.4 for each hard mismatch (degree requirement, geography without support, unpaid relocation, unrelated field).
Add 0.1-0.2 for each high value signal present.
prestige_score (0-1): how established and selective the organization or program is.

HIGH VALUE SIGNALS:
{high}

LOW VALUE SIGNALS (dealbreakers):
{low}

Answer with JSON only:
{{"relevance_score": 0.0-1.0, "prestige_score": 0.0-1.0, "reasoning": "2-3 sentences", "matched_high_signals": [], "matched_low_signals": [], "recommendation": "strong_apply|apply|maybe|skip"}}
strong_apply above 0.8 relevance, apply 0.6-0.8, maybe 0.4-0.6, skip below 0.4 or when a dealbreaker is present."#,
        profile = profile_text(profile),
        title = field(&candidate.title, "Unknown"),
        organization = field(&candidate.organization, "Unknown"),
        kind = field(&candidate.opportunity_type, "Unknown"),
        location = field(&candidate.location, "Unknown"),
        deadline = field(&candidate.deadline, "Not specified"),
        summary = field(&candidate.summary, "No summary"),
        eligibility = field(&candidate.eligibility, "Not specified"),
        high = bullet_list(&profile.high_value_signals),
        low = bullet_list(&profile.low_value_signals),
    )
}

/// Builds the prompt for a stored batch request. Score requests carry the
/// candidate as JSON in their content.
pub fn prompt_for(request: &BatchRequest, profile: &UserProfile) -> Result<String, ReasoningError> {
    match request.request_type {
        RequestType::Classify => Ok(classify_prompt(&truncate_content(
            &request.content,
            CONTENT_CEILING,
        ))),
        RequestType::Extract => Ok(extract_prompt(&truncate_content(
            &request.content,
            CONTENT_CEILING,
        ))),
        RequestType::Score => {
            let candidate: Candidate = serde_json::from_str(&request.content)
                .map_err(|err| ReasoningError::Unparsable(err.to_string()))?;
            Ok(score_prompt(&candidate, profile))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(20);
        let cut = truncate_content(&text, 5);
        assert_eq!(cut, format!("ééééé{TRUNCATION_MARKER}"));
        assert_eq!(truncate_content("short", 15_000), "short");
        assert_eq!(truncate_content("exact", 5), "exact");
    }

    #[test]
    fn score_prompt_lists_signals_and_stipend() {
        let mut candidate = Candidate::titled("Systems Fellowship");
        candidate.stipend_amount = Some(5000.0);
        let profile = UserProfile {
            name: "Ada".into(),
            high_value_signals: vec!["systems".into(), "paid".into()],
            low_value_signals: vec!["unpaid".into()],
            ..UserProfile::default()
        };
        let prompt = score_prompt(&candidate, &profile);
        assert!(prompt.contains("Title: Systems Fellowship"));
        assert!(prompt.contains("Stipend: USD 5000"));
        assert!(prompt.contains("- systems\n- paid"));
        assert!(prompt.contains("Background: Not specified"));
        assert!(prompt.contains("Constraints: {}"));
    }

    #[test]
    fn score_request_content_must_be_a_candidate() {
        let request = BatchRequest {
            custom_id: "score_0_1".into(),
            request_type: RequestType::Score,
            source_id: None,
            source_url: None,
            content: "not json".into(),
        };
        assert!(prompt_for(&request, &UserProfile::default()).is_err());
    }
}

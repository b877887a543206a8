//! Embedded browser side panel: address bar handling and page analysis.

use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::relay::{Assistant, ChatMessage};

/// maximum characters of page text forwarded to the assistant
pub const PAGE_TEXT_LIMIT: usize = 1000;

const SEARCH_URL: &str = "https://duckduckgo.com/";
const SUSPICIOUS: [&str; 4] = ["phish", "malware", "scam", "fake"];
const TECH_TERMS: [&str; 16] = [
    "blockchain",
    "AI",
    "cybersecurity",
    "web3",
    "quantum computing",
    "neural networks",
    "machine learning",
    "cryptocurrency",
    "NFT",
    "metaverse",
    "decentralized finance",
    "smart contracts",
    "digital identity",
    "virtual reality",
    "augmented reality",
    "artificial intelligence",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisTask {
    PageSummary,
    SecurityScan,
    ContentAnalysis,
    CodeInspector,
    ThreatDetection,
}

impl AnalysisTask {
    pub const ALL: [AnalysisTask; 5] = [
        AnalysisTask::PageSummary,
        AnalysisTask::SecurityScan,
        AnalysisTask::ContentAnalysis,
        AnalysisTask::CodeInspector,
        AnalysisTask::ThreatDetection,
    ];

    pub fn title(self) -> &'static str {
        match self {
            AnalysisTask::PageSummary => "Page Summary",
            AnalysisTask::SecurityScan => "Security Scan",
            AnalysisTask::ContentAnalysis => "Content Analysis",
            AnalysisTask::CodeInspector => "Code Inspector",
            AnalysisTask::ThreatDetection => "Threat Detection",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AnalysisTask::PageSummary => "Generate concise summary of page content",
            AnalysisTask::SecurityScan => "Analyze website security risks",
            AnalysisTask::ContentAnalysis => "Identify main themes and topics",
            AnalysisTask::CodeInspector => "Analyze and explain code on the page",
            AnalysisTask::ThreatDetection => "Advanced malware & phishing detection",
        }
    }

    /// security scan runs locally, everything else goes to the assistant
    pub fn uses_assistant(self) -> bool {
        self != AnalysisTask::SecurityScan
    }
}

impl fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Turns address bar input into a URL.
///
/// Input with a scheme is kept, something that looks like a host gets
/// `https://`, anything else becomes a search.
pub fn normalize_url(input: &str) -> String {
    let input = input.trim();
    let lower = input.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return input.to_string();
    }
    if input.contains('.') && !input.contains(' ') {
        return format!("https://{}", input);
    }
    match Url::parse_with_params(SEARCH_URL, &[("q", input)]) {
        Ok(url) => url.to_string(),
        Err(_) => SEARCH_URL.to_string(),
    }
}

/// up to five completions for a partially typed query
pub fn search_suggestions(query: &str) -> Vec<String> {
    if query.chars().count() < 2 {
        return Vec::new();
    }
    let needle = query.to_lowercase();

    let direct = TECH_TERMS
        .iter()
        .filter(|term| term.to_lowercase().contains(&needle))
        .take(2)
        .map(|term| term.to_string());
    let prefixed = ["how to ", "what is "]
        .iter()
        .map(|prefix| format!("{}{}", prefix, query));
    let suffixed = std::iter::once(format!("{} tutorial", query));

    direct.chain(prefixed).chain(suffixed).take(5).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityReport {
    pub score: u8,
    pub https: bool,
    pub suspicious: bool,
    pub safe: bool,
}

impl SecurityReport {
    pub fn render(&self) -> String {
        let recommendations = if self.safe {
            "- Site appears safe for browsing\n- Connection is encrypted\n- No obvious security threats detected"
        } else {
            "- Exercise caution with sensitive data\n- Verify site legitimacy before proceeding\n- Consider using a secure VPN"
        };
        format!(
            "🔒 Security Report:\n\n• HTTPS: {}\n• Threat Detection: {}\n• Safety Rating: {}/100\n\nRecommendations:\n{}",
            if self.https { "✅ Enabled" } else { "❌ Disabled" },
            if self.suspicious { "⚠️ Suspicious" } else { "✅ Clean" },
            self.score,
            recommendations,
        )
    }
}

/// deterministic url heuristic: 75 base, +10 for https, +10 when nothing suspicious
pub fn security_scan(url: &str) -> SecurityReport {
    let https = url.starts_with("https://");
    let lower = url.to_lowercase();
    let suspicious = SUSPICIOUS.iter().any(|p| lower.contains(p));

    let mut score: u8 = 75;
    if https {
        score += 10;
    }
    if !suspicious {
        score += 10;
    }
    let score = score.min(100);

    SecurityReport {
        score,
        https,
        suspicious,
        safe: score > 75,
    }
}

/// page text cut to [`PAGE_TEXT_LIMIT`] characters
fn page_sample(page_text: Option<&str>) -> String {
    match page_text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => text.chars().take(PAGE_TEXT_LIMIT).collect(),
        None => "Content not accessible due to iframe restrictions".to_string(),
    }
}

pub fn build_prompt(task: AnalysisTask, url: &str, page_text: Option<&str>) -> String {
    let name = task.title().to_lowercase();
    format!(
        "You are Neural Analyst, an AI assistant specialized in analyzing web content.\n\n\
Analyze the following webpage content for a {name} request:\n\n\
URL: {url}\n\n\
Content sample: {sample}\n\n\
Provide a detailed {name} in a concise, informative format with bullet points where appropriate. \
Include relevant insights and recommendations.",
        sample = page_sample(page_text),
    )
}

fn fallback_report(url: &str, page_text: Option<&str>) -> String {
    let content = if page_text.is_some_and(|t| !t.trim().is_empty()) {
        "Available"
    } else {
        "Not accessible"
    };
    format!(
        "Failed to perform advanced analysis. Falling back to basic analysis:\n\nURL: {}\nContent: {}\n\nPlease try again later.",
        url, content
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub task: AnalysisTask,
    pub url: String,
    pub report: String,
    /// set for security scans
    pub score: Option<u8>,
    /// false when the fallback text was used
    pub assisted: bool,
}

/// run a side panel task; assistant failures degrade to a fixed report
pub async fn analyze(
    assistant: &dyn Assistant,
    task: AnalysisTask,
    url: &str,
    page_text: Option<&str>,
) -> AnalysisReport {
    if !task.uses_assistant() {
        let scan = security_scan(url);
        return AnalysisReport {
            task,
            url: url.to_string(),
            report: scan.render(),
            score: Some(scan.score),
            assisted: false,
        };
    }

    let prompt = build_prompt(task, url, page_text);
    let (report, assisted) = match assistant.complete(&[ChatMessage::user(prompt)]).await {
        Ok(text) if !text.trim().is_empty() => (text, true),
        Ok(_) => (
            "Analysis completed, but no insights were generated.".to_string(),
            true,
        ),
        Err(e) => {
            tracing::warn!("{} for {} fell back: {}", task, url, e);
            (fallback_report(url, page_text), false)
        }
    };

    AnalysisReport {
        task,
        url: url.to_string(),
        report,
        score: None,
        assisted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use async_trait::async_trait;

    struct Fixed(Result<&'static str, ()>);

    #[async_trait]
    impl Assistant for Fixed {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
            assert_eq!(messages.len(), 1);
            self.0
                .map(str::to_string)
                .map_err(|_| RelayError::EmptyConversation)
        }
    }

    #[test]
    fn address_bar_input_is_normalized() {
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("example.com/a"), "https://example.com/a");
        assert_eq!(
            normalize_url("rust async"),
            "https://duckduckgo.com/?q=rust+async"
        );
    }

    #[test]
    fn suggestions_need_two_characters() {
        assert!(search_suggestions("a").is_empty());
        let suggestions = search_suggestions("ne");
        assert_eq!(suggestions.len(), 5);
        assert_eq!(suggestions[0], "neural networks");
        assert_eq!(suggestions[2], "how to ne");
    }

    #[test]
    fn security_scan_scores() {
        let safe = security_scan("https://docs.rs");
        assert_eq!(safe.score, 95);
        assert!(safe.safe);

        let plain = security_scan("http://docs.rs");
        assert_eq!(plain.score, 85);
        assert!(plain.safe);

        let bad = security_scan("http://free-Malware.example");
        assert_eq!(bad.score, 75);
        assert!(bad.suspicious);
        assert!(!bad.safe);
        assert!(bad.render().contains("⚠️ Suspicious"));
    }

    #[test]
    fn prompt_truncates_page_text() {
        let text = "x".repeat(5000);
        let prompt = build_prompt(AnalysisTask::PageSummary, "https://a.b", Some(&text));
        assert!(prompt.contains("for a page summary request"));
        assert!(prompt.contains(&"x".repeat(PAGE_TEXT_LIMIT)));
        assert!(!prompt.contains(&"x".repeat(PAGE_TEXT_LIMIT + 1)));

        let prompt = build_prompt(AnalysisTask::CodeInspector, "https://a.b", None);
        assert!(prompt.contains("Content not accessible"));
    }

    #[tokio::test]
    async fn assistant_failure_falls_back() {
        let report = analyze(&Fixed(Err(())), AnalysisTask::ThreatDetection, "https://a.b", None).await;
        assert!(!report.assisted);
        assert!(report.report.contains("URL: https://a.b"));
        assert!(report.report.contains("Content: Not accessible"));
    }

    #[tokio::test]
    async fn security_scan_skips_assistant() {
        let report = analyze(&Fixed(Err(())), AnalysisTask::SecurityScan, "https://a.b", None).await;
        assert_eq!(report.score, Some(95));
        assert!(report.report.starts_with("🔒 Security Report"));
    }

    #[tokio::test]
    async fn assistant_reply_is_used() {
        let report = analyze(&Fixed(Ok("summary")), AnalysisTask::PageSummary, "https://a.b", Some("text")).await;
        assert!(report.assisted);
        assert_eq!(report.report, "summary");
    }
}

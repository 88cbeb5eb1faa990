use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmploymentType {
    #[default]
    #[serde(rename = "Full-time")]
    FullTime,
    #[serde(rename = "Part-time")]
    PartTime,
    Contract,
    Freelance,
    Internship,
}

impl EmploymentType {
    pub const ALL: [EmploymentType; 5] = [
        EmploymentType::FullTime,
        EmploymentType::PartTime,
        EmploymentType::Contract,
        EmploymentType::Freelance,
        EmploymentType::Internship,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EmploymentType::FullTime => "Full-time",
            EmploymentType::PartTime => "Part-time",
            EmploymentType::Contract => "Contract",
            EmploymentType::Freelance => "Freelance",
            EmploymentType::Internship => "Internship",
        }
    }

    /// Next option in form order, wrapping around.
    pub fn cycle(self) -> Self {
        let idx = Self::ALL.iter().position(|t| *t == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for EmploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EmploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Unknown employment type '{}'. Available: Full-time, Part-time, Contract, Freelance, Internship",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Industry {
    #[default]
    Technology,
    Finance,
    Healthcare,
    Education,
    Retail,
    Manufacturing,
    Other,
}

impl Industry {
    pub const ALL: [Industry; 7] = [
        Industry::Technology,
        Industry::Finance,
        Industry::Healthcare,
        Industry::Education,
        Industry::Retail,
        Industry::Manufacturing,
        Industry::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Industry::Technology => "Technology",
            Industry::Finance => "Finance",
            Industry::Healthcare => "Healthcare",
            Industry::Education => "Education",
            Industry::Retail => "Retail",
            Industry::Manufacturing => "Manufacturing",
            Industry::Other => "Other",
        }
    }

    pub fn cycle(self) -> Self {
        let idx = Self::ALL.iter().position(|i| *i == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Industry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Industry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "Unknown industry '{}'. Available: Technology, Finance, Healthcare, Education, Retail, Manufacturing, Other",
                    s
                )
            })
    }
}

/// The six form fields submitted for one audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditRequest {
    pub title: String,
    pub company: String,
    pub requirements: String,
    pub location: String,
    pub employment_type: EmploymentType,
    pub industry: Industry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub impact: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub score: f64,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub factors: Vec<RiskFactor>,
}

/// A normalized audit result, plus whether the score had to be substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub result: AuditResult,
    pub fallback_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub job_title: String,
    pub company: String,
    pub score: f64,
    pub summary: String,
    pub timestamp: String, // assigned by the store
}

impl HistoryEntry {
    /// Calendar date of the timestamp, or "Just now" if it can't be read.
    pub fn date_label(&self) -> String {
        chrono::NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%d %H:%M:%S%.f")
            .map(|ts| ts.date().format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| "Just now".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub job_title: String,
    pub company: String,
    pub score: f64,
    pub summary: String,
}

impl NewHistoryEntry {
    pub fn from_audit(request: &AuditRequest, result: &AuditResult) -> Self {
        Self {
            job_title: request.title.clone(),
            company: request.company.clone(),
            score: result.score,
            summary: result.analysis.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceShare {
    pub name: &'static str,
    pub value: u32, // percent
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyMetrics {
    pub jobs_count: u32,
    pub remote_percent: u32,
    pub avg_age_days: u32,
    pub salary_min: &'static str,
    pub salary_max: &'static str,
    pub trend: f64,
    pub sources: Vec<SourceShare>,
    pub sparkline: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyProfile {
    pub id: u32,
    pub name: &'static str,
    pub location: &'static str,
    pub employees: &'static str,
    pub website: &'static str,
    pub ghost_risk: f64,
    pub metrics: CompanyMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Moderate,
    High,
}

impl RiskTier {
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            RiskTier::Low
        } else if score <= 0.6 {
            RiskTier::Moderate
        } else {
            RiskTier::High
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskTier::Low => "Low Risk",
            RiskTier::Moderate => "Moderate Risk",
            RiskTier::High => "High Risk",
        }
    }

    /// Wording used on the audit result screen.
    pub fn verdict(self) -> &'static str {
        match self {
            RiskTier::Low => "Legitimate",
            RiskTier::Moderate => "Moderate Risk",
            RiskTier::High => "High Probability",
        }
    }
}

/// Whole-number percentage of a [0,1] value, clamped for display.
pub fn percent(value: f64) -> String {
    let clamped = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
    format!("{}%", (clamped * 100.0).round())
}

pub fn trend_label(trend: f64) -> String {
    let sign = if trend > 0.0 { "+" } else { "" };
    format!("{}{:.1}%", sign, trend * 100.0)
}

// The model is free to emit nulls or the wrong types inside factors; keep the
// entry and fill in an empty value instead of rejecting the whole response.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64().unwrap_or(0.0))
}

use crate::models::{CompanyMetrics, CompanyProfile, SourceShare};

const FUZZY_THRESHOLD: f64 = 0.85;
const SPARK_BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Hard-coded company index. There is no live data behind it.
pub fn companies() -> Vec<CompanyProfile> {
    vec![
        CompanyProfile {
            id: 1,
            name: "TechZenith",
            location: "Bengaluru, India",
            employees: "10K+",
            website: "techzenith.in",
            ghost_risk: 0.78,
            metrics: CompanyMetrics {
                jobs_count: 120,
                remote_percent: 15,
                avg_age_days: 155,
                salary_min: "₹10L",
                salary_max: "₹25L",
                trend: 0.05,
                sources: vec![
                    SourceShare { name: "LinkedIn", value: 65 },
                    SourceShare { name: "Indeed", value: 35 },
                ],
                sparkline: vec![10, 15, 12, 18, 16, 20, 22, 19, 24, 25],
            },
        },
        CompanyProfile {
            id: 2,
            name: "EcomXpress",
            location: "Mumbai, India",
            employees: "50K+",
            website: "ecomxpress.com",
            ghost_risk: 0.15,
            metrics: CompanyMetrics {
                jobs_count: 450,
                remote_percent: 5,
                avg_age_days: 35,
                salary_min: "₹5L",
                salary_max: "₹18L",
                trend: -0.02,
                sources: vec![
                    SourceShare { name: "Career Portal", value: 70 },
                    SourceShare { name: "Naukri", value: 30 },
                ],
                sparkline: vec![50, 45, 48, 40, 42, 38, 35, 30, 28, 25],
            },
        },
        CompanyProfile {
            id: 3,
            name: "FinSecure",
            location: "Pune, India",
            employees: "5K+",
            website: "finsecure.co.in",
            ghost_risk: 0.42,
            metrics: CompanyMetrics {
                jobs_count: 60,
                remote_percent: 50,
                avg_age_days: 90,
                salary_min: "₹12L",
                salary_max: "₹30L",
                trend: 0.10,
                sources: vec![
                    SourceShare { name: "Referral", value: 50 },
                    SourceShare { name: "LinkedIn", value: 50 },
                ],
                sparkline: vec![5, 8, 12, 15, 10, 18, 20, 25, 28, 30],
            },
        },
    ]
}

/// Companies whose name or location contains `query`, or whose name is a
/// close fuzzy match. An empty query returns everything.
pub fn search(query: &str) -> Vec<CompanyProfile> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return companies();
    }

    companies()
        .into_iter()
        .filter(|company| {
            let name = company.name.to_lowercase();
            name.contains(&needle)
                || company.location.to_lowercase().contains(&needle)
                || strsim::jaro_winkler(&name, &needle) >= FUZZY_THRESHOLD
        })
        .collect()
}

/// Two-letter badge shown next to the company name.
pub fn initials(name: &str) -> String {
    name.chars().take(2).collect::<String>().to_uppercase()
}

/// Renders a series as unicode block characters scaled between its min and max.
pub fn sparkline_text(data: &[u64]) -> String {
    let (Some(min), Some(max)) = (data.iter().min(), data.iter().max()) else {
        return String::new();
    };
    let span = max - min;
    data.iter()
        .map(|value| {
            if span == 0 {
                SPARK_BARS[SPARK_BARS.len() / 2]
            } else {
                let idx = ((value - min) * (SPARK_BARS.len() as u64 - 1) + span / 2) / span;
                SPARK_BARS[idx as usize]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{percent, RiskTier};

    #[test]
    fn test_directory_contents() {
        let all = companies();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|c| (0.0..=1.0).contains(&c.ghost_risk)));
        assert!(all.iter().all(|c| c.metrics.sparkline.len() == 10));
        assert!(all
            .iter()
            .all(|c| c.metrics.sources.iter().map(|s| s.value).sum::<u32>() == 100));
    }

    #[test]
    fn test_ghost_risk_renders_as_percentage() {
        let techzenith = &companies()[0];
        assert_eq!(techzenith.ghost_risk, 0.78);
        assert_eq!(percent(techzenith.ghost_risk), "78%");
        assert_eq!(RiskTier::from_score(techzenith.ghost_risk), RiskTier::High);
    }

    #[test]
    fn test_each_company_lands_in_a_different_tier() {
        let tiers: Vec<RiskTier> = companies()
            .iter()
            .map(|c| RiskTier::from_score(c.ghost_risk))
            .collect();
        assert_eq!(tiers, vec![RiskTier::High, RiskTier::Low, RiskTier::Moderate]);
    }

    #[test]
    fn test_search_substring_and_location() {
        let names = |query: &str| search(query).iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(names("zen"), vec!["TechZenith"]);
        assert_eq!(names("PUNE"), vec!["FinSecure"]);
        assert_eq!(names("india").len(), 3);
        assert_eq!(names("").len(), 3);
        assert!(names("globex").is_empty());
    }

    #[test]
    fn test_search_tolerates_typos() {
        let found = search("finsecuer");
        assert_eq!(found.len(), 1);
        let found = search("ecomexpress");
        assert_eq!(found[0].name, "EcomXpress");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("TechZenith"), "TE");
        assert_eq!(initials("x"), "X");
    }

    #[test]
    fn test_sparkline_text() {
        assert_eq!(sparkline_text(&[]), "");
        assert_eq!(sparkline_text(&[0, 7]), "▁█");
        assert_eq!(sparkline_text(&[3, 3, 3]), "▅▅▅");
        let line = sparkline_text(&[10, 15, 12, 18, 16, 20, 22, 19, 24, 25]);
        assert_eq!(line.chars().count(), 10);
        assert!(line.starts_with('▁'));
        assert!(line.ends_with('█'));
    }
}

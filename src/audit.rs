//! Ghost-job audit: prompt construction, the provider call, and response
//! normalization.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{error, info, warn};

use crate::ai::{AIProvider, GenerationRequest, ResponseFormat};
use crate::error::AuditError;
use crate::models::{AuditOutcome, AuditRequest, AuditResult, RiskFactor};

pub const AUDIT_TEMPERATURE: f32 = 0.4;
pub const AUDIT_MAX_TOKENS: u32 = 2048;
pub const FALLBACK_SCORE: f64 = 0.5;

const REQUIRED_FIELDS_MESSAGE: &str = "Job Title and Requirements are mandatory.";

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("code fence pattern is valid")
});

/// Rejects requests missing a title or requirements before any network call.
pub fn validate(request: &AuditRequest) -> Result<(), AuditError> {
    if request.title.trim().is_empty() || request.requirements.trim().is_empty() {
        return Err(AuditError::Validation(REQUIRED_FIELDS_MESSAGE.to_string()));
    }
    Ok(())
}

pub fn build_prompt(request: &AuditRequest) -> String {
    format!(
        "You are an expert HR auditor and AI risk analyst. Analyze the following job posting to \
        determine if it is a \"Ghost Job\" (a fake, stale, or compliance-only listing with no intent to hire).\n\n\
        JOB DETAILS:\n\
        Title: {title}\n\
        Company: {company}\n\
        Location: {location}\n\
        Type: {employment_type}\n\
        Industry: {industry}\n\
        Content: {requirements}\n\n\
        TASK:\n\
        Return a JSON object with the following structure:\n\
        {{\n\
        \x20 \"score\": <number between 0.00 and 1.00, where 1.00 is extremely high risk of being a ghost job>,\n\
        \x20 \"analysis\": \"<short summary of why it received this score, max 2 sentences>\",\n\
        \x20 \"factors\": [\n\
        \x20   {{\n\
        \x20     \"name\": \"<Name of risk factor, e.g., 'Vague Responsibilities', 'No Salary', 'Stale Keywords'>\",\n\
        \x20     \"impact\": <number 0.00-1.00 representing contribution to the score>,\n\
        \x20     \"reason\": \"<brief explanation>\"\n\
        \x20   }}\n\
        \x20 ]\n\
        }}\n\n\
        Include between one and six factors. Strictly return valid JSON.",
        title = request.title,
        company = request.company,
        location = request.location,
        employment_type = request.employment_type,
        industry = request.industry,
        requirements = request.requirements,
    )
}

/// Parses the provider's raw reply into an `AuditOutcome`.
///
/// A missing or non-numeric `score` becomes 0.5 and `fallback_applied` is set.
/// Other fields are not checked beyond their JSON shape.
pub fn parse_audit_response(raw: &str) -> Result<AuditOutcome, AuditError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuditError::Service("No response from AI".to_string()));
    }

    let body = CODE_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());

    let value: Value = serde_json::from_str(body)
        .map_err(|e| AuditError::Service(format!("AI returned invalid JSON: {}", e)))?;
    let Value::Object(mut fields) = value else {
        return Err(AuditError::Service(
            "AI response was not a JSON object".to_string(),
        ));
    };

    let (score, fallback_applied) = match fields.get("score").and_then(Value::as_f64) {
        Some(score) => (score, false),
        None => (FALLBACK_SCORE, true),
    };

    let analysis = match fields.remove("analysis") {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let factors = match fields.remove("factors") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RiskFactor>(item).ok())
            .collect(),
        _ => Vec::new(),
    };

    Ok(AuditOutcome {
        result: AuditResult {
            score,
            analysis,
            factors,
        },
        fallback_applied,
    })
}

/// Validates, calls the provider once, and normalizes the reply.
pub fn run_audit(provider: &dyn AIProvider, request: &AuditRequest) -> Result<AuditOutcome, AuditError> {
    validate(request)?;

    let prompt = build_prompt(request);
    info!(
        model = provider.model_name(),
        title = %request.title,
        company = %request.company,
        "Submitting job post for audit"
    );

    let generation = GenerationRequest {
        prompt: &prompt,
        format: ResponseFormat::Json,
        temperature: AUDIT_TEMPERATURE,
        max_tokens: AUDIT_MAX_TOKENS,
    };

    let outcome = provider
        .generate(&generation)
        .and_then(|raw| parse_audit_response(&raw))
        .inspect_err(|e| error!("Ghost job analysis failed: {}", e))?;

    if outcome.fallback_applied {
        warn!("AI response had no numeric score, using fallback {}", FALLBACK_SCORE);
    }
    info!(
        score = outcome.result.score,
        factors = outcome.result.factors.len(),
        "Audit complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedProvider;
    use crate::models::{EmploymentType, Industry};

    fn sample_request() -> AuditRequest {
        AuditRequest {
            title: "Senior Product Manager".to_string(),
            company: "Acme Corp".to_string(),
            requirements: "Own the roadmap. 10+ years required. Rockstar ninja.".to_string(),
            location: "Remote, New York".to_string(),
            employment_type: EmploymentType::Contract,
            industry: Industry::Finance,
        }
    }

    const GOOD_REPLY: &str = r#"{
        "score": 0.78,
        "analysis": "Vague duties and no salary band.",
        "factors": [
            {"name": "No Salary", "impact": 0.6, "reason": "Compensation missing"},
            {"name": "Stale Keywords", "impact": 0.3, "reason": "Buzzwords"}
        ]
    }"#;

    #[test]
    fn test_empty_title_makes_no_call() {
        let provider = ScriptedProvider::replying(GOOD_REPLY);
        let request = AuditRequest {
            title: "   ".to_string(),
            ..sample_request()
        };

        let err = run_audit(&provider, &request).unwrap_err();
        assert_eq!(err, AuditError::Validation(REQUIRED_FIELDS_MESSAGE.to_string()));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_empty_requirements_makes_no_call() {
        let provider = ScriptedProvider::replying(GOOD_REPLY);
        let request = AuditRequest {
            requirements: String::new(),
            ..sample_request()
        };

        assert!(matches!(run_audit(&provider, &request), Err(AuditError::Validation(_))));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_company_and_location_are_optional() {
        let request = AuditRequest {
            company: String::new(),
            location: String::new(),
            ..sample_request()
        };
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn test_prompt_embeds_every_field_verbatim() {
        let prompt = build_prompt(&sample_request());
        assert!(prompt.contains("Title: Senior Product Manager"));
        assert!(prompt.contains("Company: Acme Corp"));
        assert!(prompt.contains("Location: Remote, New York"));
        assert!(prompt.contains("Type: Contract"));
        assert!(prompt.contains("Industry: Finance"));
        assert!(prompt.contains("Content: Own the roadmap. 10+ years required. Rockstar ninja."));
        assert!(prompt.contains("\"factors\""));
        assert!(prompt.contains("Strictly return valid JSON."));
    }

    #[test]
    fn test_run_audit_uses_low_temperature_and_parses() {
        let provider = ScriptedProvider::replying(GOOD_REPLY);
        let outcome = run_audit(&provider, &sample_request()).unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.temperatures.lock().unwrap()[0], AUDIT_TEMPERATURE);
        assert!(!outcome.fallback_applied);
        assert_eq!(outcome.result.score, 0.78);
        assert_eq!(outcome.result.factors.len(), 2);
        assert_eq!(outcome.result.factors[0].name, "No Salary");
    }

    #[test]
    fn test_service_failure_is_propagated() {
        let provider = ScriptedProvider::failing("quota exceeded");
        let err = run_audit(&provider, &sample_request()).unwrap_err();
        assert_eq!(err, AuditError::Service("quota exceeded".to_string()));
    }

    #[test]
    fn test_missing_score_falls_back() {
        let outcome = parse_audit_response(r#"{"analysis": "hmm", "factors": []}"#).unwrap();
        assert_eq!(outcome.result.score, 0.5);
        assert!(outcome.fallback_applied);
    }

    #[test]
    fn test_non_numeric_score_falls_back() {
        for raw in [
            r#"{"score": "0.9"}"#,
            r#"{"score": null}"#,
            r#"{"score": [0.9]}"#,
            r#"{"score": true}"#,
        ] {
            let outcome = parse_audit_response(raw).unwrap();
            assert_eq!(outcome.result.score, 0.5, "input: {}", raw);
            assert!(outcome.fallback_applied);
        }
    }

    #[test]
    fn test_out_of_range_score_is_kept() {
        let outcome = parse_audit_response(r#"{"score": 1.4}"#).unwrap();
        assert_eq!(outcome.result.score, 1.4);
        assert!(!outcome.fallback_applied);
        assert_eq!(outcome.result.analysis, "");
        assert!(outcome.result.factors.is_empty());
    }

    #[test]
    fn test_empty_reply_is_service_error() {
        assert_eq!(
            parse_audit_response("  \n").unwrap_err(),
            AuditError::Service("No response from AI".to_string())
        );
    }

    #[test]
    fn test_unparseable_reply_is_service_error() {
        assert!(matches!(
            parse_audit_response("The posting looks fine to me."),
            Err(AuditError::Service(_))
        ));
        assert!(matches!(parse_audit_response("[1, 2]"), Err(AuditError::Service(_))));
    }

    #[test]
    fn test_code_fenced_reply_is_accepted() {
        let raw = "```json\n{\"score\": 0.2, \"analysis\": \"Looks real.\"}\n```";
        let outcome = parse_audit_response(raw).unwrap();
        assert_eq!(outcome.result.score, 0.2);
        assert_eq!(outcome.result.analysis, "Looks real.");
    }

    #[test]
    fn test_malformed_factors_pass_through() {
        let raw = r#"{"score": 0.4, "factors": [{"name": "No Salary"}, {"impact": 0.9}, 7]}"#;
        let outcome = parse_audit_response(raw).unwrap();
        assert_eq!(outcome.result.factors.len(), 2);
        assert_eq!(outcome.result.factors[0].impact, 0.0);
        assert_eq!(outcome.result.factors[1].name, "");
        assert_eq!(outcome.result.factors[1].impact, 0.9);
    }
}

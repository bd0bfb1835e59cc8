//! Core domain model and field-derivation rules for GovScout.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "govscout-core";

/// NAICS classification reference as carried in upstream documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaicsCode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl NaicsCode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
        }
    }
}

/// Human feedback value. `None` on the opportunity means unrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Feedback {
    Yes,
    No,
}

/// Known opportunity sources, with an explicit fallback variant so an
/// unrecognized upstream type never picks a source by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    SamGov,
    GsaEbuy,
    GovWinTracked,
    StateLocalBids,
    OpportunityManager,
    Unknown,
}

impl Source {
    /// Classify an upstream `type` tag, case-insensitively.
    pub fn from_opp_type(opp_type: &str) -> Self {
        match opp_type.to_ascii_lowercase().as_str() {
            "fbo" => Source::SamGov,
            "tns" => Source::GsaEbuy,
            "opp" | "trackedopp" => Source::GovWinTracked,
            "bid" => Source::StateLocalBids,
            "top" => Source::OpportunityManager,
            _ => Source::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Source::SamGov => "SAM.gov",
            Source::GsaEbuy => "GSA eBuy/Task Orders",
            Source::GovWinTracked => "GovWin Tracked",
            Source::StateLocalBids => "State/Local Bids",
            Source::OpportunityManager => "Opportunity Manager",
            Source::Unknown => "Unknown",
        }
    }
}

/// The single persisted entity. Field names mirror the upstream wire format;
/// every upstream field we do not model explicitly survives round trips in
/// `extra`, since ingest replaces the whole document on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub opp_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opp_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Derived: resolved numeric value, null only when nothing was
    /// discoverable anywhere (see `resolve_inline_value`).
    #[serde(default)]
    pub contract_value: Option<f64>,
    #[serde(rename = "primaryNAICS", default, skip_serializing_if = "Option::is_none")]
    pub primary_naics: Option<NaicsCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_naics: Vec<NaicsCode>,
    /// Derived: primary NAICS first, then the upstream additional list,
    /// duplicates allowed, order-significant.
    #[serde(rename = "allNAICSCodes", default, skip_serializing_if = "Vec::is_empty")]
    pub all_naics_codes: Vec<NaicsCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_code_desc: Option<String>,
    /// Derived: 4-character PSC code extracted from
    /// `classification_code_desc`, or null when unparseable.
    #[serde(default)]
    pub psc_code: Option<String>,
    /// Derived: human-readable source label from `Source`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub relevant: Option<Feedback>,
    #[serde(default)]
    pub pursued: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub competition_types: Vec<serde_json::Value>,
    /// Derived: upstream `competitionTypes` copied verbatim.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_asides: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Opportunity {
    pub fn source_kind(&self) -> Source {
        self.opp_type
            .as_deref()
            .map(Source::from_opp_type)
            .unwrap_or(Source::Unknown)
    }
}

/// First stage of contract-value resolution: the top-level fields, in
/// priority order. The contracts sub-resource fallback lives in the client.
pub fn resolve_inline_value(opp_value: Option<f64>, value: Option<f64>) -> Option<f64> {
    opp_value.or(value)
}

/// `all_naics_codes` derivation: primary first when present, then every
/// entry of the upstream additional list.
pub fn aggregate_naics(primary: Option<&NaicsCode>, additional: &[NaicsCode]) -> Vec<NaicsCode> {
    let mut out = Vec::with_capacity(additional.len() + 1);
    if let Some(primary) = primary {
        out.push(primary.clone());
    }
    out.extend_from_slice(additional);
    out
}

fn psc_strict_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z][A-Z0-9]{3})[\s-]").expect("valid strict PSC pattern"))
}

fn psc_lenient_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9]{4})[\s-]").expect("valid lenient PSC pattern"))
}

/// Extract a leading 4-character PSC code from a classification description.
/// Strict pattern first (letter then three letter-or-digit), then a lenient
/// fallback (any four letter-or-digit); both require a trailing space or dash.
pub fn extract_psc_code(desc: Option<&str>) -> Option<String> {
    let desc = desc?.trim();
    if desc.is_empty() {
        return None;
    }
    for pattern in [psc_strict_pattern(), psc_lenient_pattern()] {
        if let Some(captures) = pattern.captures(desc) {
            return Some(captures[1].to_ascii_uppercase());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psc_extraction_handles_strict_and_lenient_codes() {
        assert_eq!(
            extract_psc_code(Some("R406 - Support- Professional")),
            Some("R406".to_string())
        );
        assert_eq!(
            extract_psc_code(Some("Z1ND - Maintenance of Real Property")),
            Some("Z1ND".to_string())
        );
        // Digit-leading codes only match the lenient pattern.
        assert_eq!(
            extract_psc_code(Some("7A25 - ADP Equipment")),
            Some("7A25".to_string())
        );
    }

    #[test]
    fn psc_extraction_rejects_unparseable_input() {
        assert_eq!(extract_psc_code(None), None);
        assert_eq!(extract_psc_code(Some("")), None);
        assert_eq!(extract_psc_code(Some("miscellaneous services")), None);
        // A bare code with no separator does not match either pattern.
        assert_eq!(extract_psc_code(Some("R406")), None);
    }

    #[test]
    fn source_classification_is_case_insensitive_with_fallback() {
        assert_eq!(Source::from_opp_type("FBO").label(), "SAM.gov");
        assert_eq!(Source::from_opp_type("TNS").label(), "GSA eBuy/Task Orders");
        assert_eq!(Source::from_opp_type("opp").label(), "GovWin Tracked");
        assert_eq!(Source::from_opp_type("TrackedOpp").label(), "GovWin Tracked");
        assert_eq!(Source::from_opp_type("bid").label(), "State/Local Bids");
        assert_eq!(Source::from_opp_type("top").label(), "Opportunity Manager");
        assert_eq!(Source::from_opp_type("xyz").label(), "Unknown");
    }

    #[test]
    fn naics_aggregation_keeps_primary_first() {
        let primary = NaicsCode {
            id: "541611".to_string(),
            title: Some("Administrative Management".to_string()),
        };
        let additional = vec![NaicsCode::new("561611")];
        let all = aggregate_naics(Some(&primary), &additional);
        assert_eq!(
            all.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
            vec!["541611", "561611"]
        );

        assert!(aggregate_naics(None, &[]).is_empty());
        assert_eq!(aggregate_naics(None, &additional).len(), 1);
    }

    #[test]
    fn inline_value_prefers_opp_value() {
        assert_eq!(resolve_inline_value(Some(1_000.0), Some(2.0)), Some(1_000.0));
        assert_eq!(resolve_inline_value(None, Some(2.0)), Some(2.0));
        assert_eq!(resolve_inline_value(None, None), None);
    }

    #[test]
    fn opportunity_round_trips_unknown_upstream_fields() {
        let raw = serde_json::json!({
            "id": "OPP-1",
            "type": "fbo",
            "oppValue": 125000.0,
            "classificationCodeDesc": "R406 - Support- Professional",
            "govEntity": { "title": "Department of the Interior" },
            "solicitationNumber": "140D0425Q0001"
        });
        let doc: Opportunity = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.opp_value, Some(125_000.0));
        assert_eq!(doc.source_kind(), Source::SamGov);

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["govEntity"]["title"], "Department of the Interior");
        assert_eq!(back["solicitationNumber"], "140D0425Q0001");
        assert_eq!(back["type"], "fbo");
    }

    #[test]
    fn feedback_serializes_as_yes_no_strings() {
        assert_eq!(serde_json::to_value(Feedback::Yes).unwrap(), "Yes");
        assert_eq!(serde_json::to_value(Feedback::No).unwrap(), "No");
        let parsed: Feedback = serde_json::from_value(serde_json::json!("Yes")).unwrap();
        assert_eq!(parsed, Feedback::Yes);
    }
}

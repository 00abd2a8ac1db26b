//! Fact-check report types and weighted scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured result of fact-checking one video transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_score")]
    pub overall_score: u8,
    #[serde(default)]
    pub overall_verdict: OverallVerdict,
    #[serde(default)]
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub danger: Vec<DangerItem>,
    #[serde(default)]
    pub whats_right: Vec<String>,
    #[serde(default)]
    pub whats_wrong: Vec<String>,
    #[serde(default)]
    pub missing_context: Vec<String>,
    #[serde(default)]
    pub sources_used: Vec<Source>,
    #[serde(default)]
    pub limitations: Option<String>,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

fn default_score() -> u8 {
    50
}

/// One checkable statement extracted from the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim: String,
    #[serde(default)]
    pub verdict: ClaimVerdict,
    /// 0-100, clamped when scoring
    #[serde(default = "default_confidence")]
    pub confidence: i32,
    /// Relative importance, 0-100, clamped when scoring
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub correction: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

fn default_confidence() -> i32 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DangerItem {
    pub category: DangerCategory,
    /// 0 = none, 5 = severe
    #[serde(default)]
    pub severity: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub publisher: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimVerdict {
    Supported,
    Contradicted,
    Mixed,
    NotAFactualClaim,
    #[default]
    #[serde(other)]
    Unverifiable,
}

impl ClaimVerdict {
    /// Correctness of the verdict at full confidence
    fn base_correctness(self) -> f64 {
        match self {
            ClaimVerdict::Supported => 1.0,
            ClaimVerdict::Contradicted => 0.0,
            ClaimVerdict::Mixed => 0.6,
            ClaimVerdict::Unverifiable | ClaimVerdict::NotAFactualClaim => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallVerdict {
    Accurate,
    MostlyAccurate,
    Mixed,
    Misleading,
    False,
    #[default]
    #[serde(other)]
    Unverifiable,
}

impl OverallVerdict {
    /// Maps a 0-100 score to its verdict band
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => OverallVerdict::Accurate,
            70..=89 => OverallVerdict::MostlyAccurate,
            40..=69 => OverallVerdict::Mixed,
            10..=39 => OverallVerdict::Misleading,
            _ => OverallVerdict::False,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerCategory {
    MedicalMisinformation,
    FinancialScam,
    IllegalInstructions,
    SelfHarm,
    DangerousChallenge,
    HateOrHarassment,
    PrivacyOrDoxxing,
    #[serde(other)]
    Other,
}

/// Share of weight that must be unverifiable before the whole report is
const UNVERIFIABLE_RATIO_THRESHOLD: f64 = 0.6;

/// Maps a claim verdict and confidence to a 0..1 correctness value
///
/// Low confidence pulls the value toward 0.5 (unknown).
pub fn weighted_correctness(verdict: ClaimVerdict, confidence: i32) -> f64 {
    let conf = f64::from(confidence.clamp(0, 100)) / 100.0;
    0.5 + (verdict.base_correctness() - 0.5) * conf
}

impl FactCheckReport {
    /// Recomputes `overall_score` and `overall_verdict` from claim weights
    ///
    /// Also normalizes the claims in place: weights and confidence are
    /// clamped to 0-100 and non-claims get weight 0. When every scorable
    /// claim has weight 0 they are all weighted equally.
    pub fn apply_weighted_score(&mut self) {
        for claim in &mut self.claims {
            claim.confidence = claim.confidence.clamp(0, 100);
            claim.weight = if claim.verdict == ClaimVerdict::NotAFactualClaim {
                0
            } else {
                claim.weight.clamp(0, 100)
            };
        }

        let is_scorable = |c: &Claim| c.verdict != ClaimVerdict::NotAFactualClaim;

        if !self.claims.iter().any(is_scorable) {
            self.set_unverifiable();
            return;
        }

        if self.claims.iter().filter(|c| is_scorable(c)).all(|c| c.weight == 0) {
            for claim in self.claims.iter_mut().filter(|c| is_scorable(c)) {
                claim.weight = 1;
            }
        }

        let mut total_weight = 0.0;
        let mut weighted_sum = 0.0;
        let mut unverifiable_weight = 0.0;

        for claim in &self.claims {
            if claim.verdict == ClaimVerdict::NotAFactualClaim || claim.weight <= 0 {
                continue;
            }
            let weight = f64::from(claim.weight);
            total_weight += weight;
            weighted_sum += weight * weighted_correctness(claim.verdict, claim.confidence);
            if claim.verdict == ClaimVerdict::Unverifiable {
                unverifiable_weight += weight;
            }
        }

        if total_weight <= 0.0 {
            self.set_unverifiable();
            return;
        }

        let score = ((weighted_sum / total_weight) * 100.0)
            .round_ties_even()
            .clamp(0.0, 100.0) as u8;
        self.overall_score = score;
        self.overall_verdict = if unverifiable_weight / total_weight >= UNVERIFIABLE_RATIO_THRESHOLD
        {
            OverallVerdict::Unverifiable
        } else {
            OverallVerdict::from_score(score)
        };
    }

    fn set_unverifiable(&mut self) {
        self.overall_score = 50;
        self.overall_verdict = OverallVerdict::Unverifiable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(verdict: ClaimVerdict, confidence: i32, weight: i32) -> Claim {
        Claim {
            claim: "c".to_string(),
            verdict,
            confidence,
            weight,
            explanation: String::new(),
            correction: None,
            sources: vec![],
        }
    }

    fn report(claims: Vec<Claim>) -> FactCheckReport {
        FactCheckReport {
            summary: String::new(),
            overall_score: 0,
            overall_verdict: OverallVerdict::False,
            claims,
            danger: vec![],
            whats_right: vec![],
            whats_wrong: vec![],
            missing_context: vec![],
            sources_used: vec![],
            limitations: None,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_claim_verdict_wire_names() {
        let verdicts: Vec<ClaimVerdict> =
            serde_json::from_str(r#"["not_a_factual_claim", "supported", "made_up"]"#).unwrap();
        assert_eq!(
            verdicts,
            vec![
                ClaimVerdict::NotAFactualClaim,
                ClaimVerdict::Supported,
                ClaimVerdict::Unverifiable
            ]
        );
        assert_eq!(
            serde_json::to_string(&ClaimVerdict::NotAFactualClaim).unwrap(),
            r#""not_a_factual_claim""#
        );
    }

    #[test]
    fn test_half_scores_round_to_even() {
        // 5/8 of the weight is correct: 62.5
        let mut r = report(vec![
            claim(ClaimVerdict::Supported, 100, 5),
            claim(ClaimVerdict::Contradicted, 100, 3),
        ]);
        r.apply_weighted_score();
        assert_eq!(r.overall_score, 62);
        assert_eq!(r.overall_verdict, OverallVerdict::Mixed);
    }

    #[test]
    fn test_weighted_score_example() {
        let mut r = report(vec![
            claim(ClaimVerdict::Supported, 100, 70),
            claim(ClaimVerdict::Contradicted, 100, 30),
        ]);
        r.apply_weighted_score();
        assert_eq!(r.overall_score, 70);
        assert_eq!(r.overall_verdict, OverallVerdict::MostlyAccurate);
    }

    #[test]
    fn test_no_claims_is_unverifiable() {
        let mut r = report(vec![]);
        r.apply_weighted_score();
        assert_eq!(r.overall_score, 50);
        assert_eq!(r.overall_verdict, OverallVerdict::Unverifiable);

        let mut r = report(vec![claim(ClaimVerdict::NotAFactualClaim, 90, 40)]);
        r.apply_weighted_score();
        assert_eq!(r.overall_score, 50);
        assert_eq!(r.claims[0].weight, 0);
    }

    #[test]
    fn test_zero_weights_become_equal() {
        let mut r = report(vec![
            claim(ClaimVerdict::Supported, 100, 0),
            claim(ClaimVerdict::Contradicted, 100, 0),
        ]);
        r.apply_weighted_score();
        assert_eq!(r.claims[0].weight, 1);
        assert_eq!(r.claims[1].weight, 1);
        assert_eq!(r.overall_score, 50);
        assert_eq!(r.overall_verdict, OverallVerdict::Mixed);
    }

    #[test]
    fn test_mostly_unverifiable_weight_overrides_band() {
        let mut r = report(vec![
            claim(ClaimVerdict::Unverifiable, 80, 60),
            claim(ClaimVerdict::Supported, 100, 40),
        ]);
        r.apply_weighted_score();
        assert_eq!(r.overall_verdict, OverallVerdict::Unverifiable);
    }

    #[test]
    fn test_low_confidence_pulls_toward_half() {
        assert_eq!(weighted_correctness(ClaimVerdict::Contradicted, 0), 0.5);
        assert_eq!(weighted_correctness(ClaimVerdict::Supported, 100), 1.0);
        assert!((weighted_correctness(ClaimVerdict::Mixed, 50) - 0.55).abs() < 1e-9);
        assert_eq!(weighted_correctness(ClaimVerdict::Supported, 250), 1.0);
    }

    #[test]
    fn test_out_of_range_values_clamped() {
        let mut r = report(vec![claim(ClaimVerdict::Contradicted, 150, 500)]);
        r.apply_weighted_score();
        assert_eq!(r.claims[0].weight, 100);
        assert_eq!(r.claims[0].confidence, 100);
        assert_eq!(r.overall_score, 0);
        assert_eq!(r.overall_verdict, OverallVerdict::False);
    }

    #[test]
    fn test_unknown_verdict_deserializes_as_unverifiable() {
        let c: Claim = serde_json::from_str(r#"{"claim": "x", "verdict": "sort_of"}"#).unwrap();
        assert_eq!(c.verdict, ClaimVerdict::Unverifiable);
        assert_eq!(c.confidence, 50);
    }

    #[test]
    fn test_score_bands() {
        assert_eq!(OverallVerdict::from_score(100), OverallVerdict::Accurate);
        assert_eq!(OverallVerdict::from_score(90), OverallVerdict::Accurate);
        assert_eq!(OverallVerdict::from_score(89), OverallVerdict::MostlyAccurate);
        assert_eq!(OverallVerdict::from_score(40), OverallVerdict::Mixed);
        assert_eq!(OverallVerdict::from_score(10), OverallVerdict::Misleading);
        assert_eq!(OverallVerdict::from_score(9), OverallVerdict::False);
    }
}

//! Deterministic risk assessment.
//!
//! Risk is a pure function of the security context and the trust
//! snapshot: enumerate factors, average their scores, bucket into a
//! discrete level. Assessments carry a validity deadline and are
//! re-evaluated rather than cached past it.

use crate::context::SecurityContext;
use crate::trust::TrustScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Discrete risk buckets, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
    Critical,
}

impl RiskLevel {
    /// Bucket a score; lower bounds are inclusive.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            RiskLevel::Critical
        } else if score >= 0.7 {
            RiskLevel::VeryHigh
        } else if score >= 0.5 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else if score >= 0.1 {
            RiskLevel::Low
        } else {
            RiskLevel::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "very_low",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very_high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Severity of a single factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorSeverity {
    Low,
    Medium,
    High,
}

/// One contributing risk factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor_type: String,
    pub severity: FactorSeverity,
    pub description: String,
    pub score: f64,
    pub mitigated: bool,
}

/// The full assessment for one request. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    pub mitigations: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub valid_until: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now <= self.valid_until
    }
}

/// Stateless assessor.
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    /// How long an assessment stays usable.
    pub validity_ms: i64,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self {
            validity_ms: 5 * 60 * 1000,
        }
    }
}

impl RiskAssessor {
    /// Assess one request.
    pub fn assess(&self, context: &SecurityContext, trust: &TrustScore) -> RiskAssessment {
        let mut factors = Vec::new();

        if !context.identity.verified {
            factors.push(RiskFactor {
                factor_type: "identity".to_string(),
                severity: FactorSeverity::High,
                description: "agent identity is not verified".to_string(),
                score: 0.8,
                mitigated: false,
            });
        }
        if context.behavior.anomaly_score > 0.7 {
            factors.push(RiskFactor {
                factor_type: "behavior".to_string(),
                severity: FactorSeverity::Medium,
                description: format!(
                    "behavioral anomaly score {:.2} exceeds threshold",
                    context.behavior.anomaly_score
                ),
                score: 0.6,
                mitigated: false,
            });
        }
        if trust.overall < 0.3 {
            factors.push(RiskFactor {
                factor_type: "identity".to_string(),
                severity: FactorSeverity::High,
                description: format!("overall trust {:.2} is critically low", trust.overall),
                score: 0.9,
                mitigated: false,
            });
        }

        let score = if factors.is_empty() {
            0.0
        } else {
            factors.iter().map(|f| f.score).sum::<f64>() / factors.len() as f64
        };
        let mut level = RiskLevel::from_score(score);
        // An unverified actor behaving at the extreme end of the anomaly
        // scale is critical regardless of the averaged score.
        if !context.identity.verified && context.behavior.anomaly_score >= 0.9 {
            level = RiskLevel::Critical;
        }

        let mut mitigations = Vec::new();
        let mut recommendations = BTreeSet::new();
        for factor in &factors {
            match factor.factor_type.as_str() {
                "identity" => {
                    mitigations.push("require re-authentication".to_string());
                    recommendations.insert("verify agent certificates".to_string());
                }
                "behavior" => {
                    mitigations.push("enhance monitoring".to_string());
                    recommendations.insert("review recent agent activity".to_string());
                }
                _ => {
                    recommendations.insert("review manually".to_string());
                }
            }
        }

        // Confidence grows with evidence; capped below certainty.
        let confidence = (0.6 + 0.1 * factors.len() as f64).clamp(0.0, 0.95);

        RiskAssessment {
            level,
            score,
            factors,
            mitigations,
            recommendations: recommendations.into_iter().collect(),
            confidence,
            valid_until: Utc::now() + chrono::Duration::milliseconds(self.validity_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PartialContext, SecurityContext};
    use crate::trust::{TrustCalculator, TrustConfig};

    fn trust_at(overall: f64) -> TrustScore {
        let calc = TrustCalculator::new(TrustConfig {
            initial_score: overall,
            ..Default::default()
        });
        calc.get_or_init("agent-risk")
    }

    #[test]
    fn test_level_thresholds_lower_inclusive() {
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.9), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.89), RiskLevel::VeryHigh);
        assert_eq!(RiskLevel::from_score(0.7), RiskLevel::VeryHigh);
        assert_eq!(RiskLevel::from_score(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.09), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::VeryLow);
    }

    #[test]
    fn test_clean_context_is_low_risk() {
        let ctx = SecurityContext::complete(
            "a1",
            "r",
            PartialContext {
                identity_verified: Some(true),
                ..Default::default()
            },
        );
        let assessment = RiskAssessor::default().assess(&ctx, &trust_at(0.8));
        assert_eq!(assessment.level, RiskLevel::VeryLow);
        assert_eq!(assessment.score, 0.0);
        assert!(assessment.factors.is_empty());
    }

    #[test]
    fn test_unverified_identity_factor() {
        let ctx = SecurityContext::complete("a1", "r", PartialContext::default());
        let assessment = RiskAssessor::default().assess(&ctx, &trust_at(0.8));
        assert_eq!(assessment.factors.len(), 1);
        assert_eq!(assessment.factors[0].factor_type, "identity");
        assert!((assessment.score - 0.8).abs() < 1e-9);
        assert_eq!(assessment.level, RiskLevel::VeryHigh);
    }

    #[test]
    fn test_unverified_plus_extreme_anomaly_is_critical() {
        let ctx = SecurityContext::complete(
            "a1",
            "r",
            PartialContext {
                anomaly_score: Some(0.95),
                ..Default::default()
            },
        );
        let assessment = RiskAssessor::default().assess(&ctx, &trust_at(0.1));
        assert_eq!(assessment.factors.len(), 3);
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(!assessment.mitigations.is_empty());
    }

    #[test]
    fn test_verified_extreme_anomaly_is_not_escalated() {
        let ctx = SecurityContext::complete(
            "a1",
            "r",
            PartialContext {
                identity_verified: Some(true),
                anomaly_score: Some(0.95),
                ..Default::default()
            },
        );
        let assessment = RiskAssessor::default().assess(&ctx, &trust_at(0.8));
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[test]
    fn test_recommendations_deduplicated() {
        // Two identity factors produce one certificate recommendation.
        let ctx = SecurityContext::complete("a1", "r", PartialContext::default());
        let assessment = RiskAssessor::default().assess(&ctx, &trust_at(0.1));
        let certificate_recs = assessment
            .recommendations
            .iter()
            .filter(|r| r.contains("certificates"))
            .count();
        assert_eq!(certificate_recs, 1);
    }

    #[test]
    fn test_validity_deadline() {
        let ctx = SecurityContext::complete("a1", "r", PartialContext::default());
        let assessment = RiskAssessor::default().assess(&ctx, &trust_at(0.5));
        assert!(assessment.is_valid(Utc::now()));
        assert!(!assessment.is_valid(Utc::now() + chrono::Duration::minutes(6)));
    }
}

//! Alert severity classification.
//!
//! A structured effect is authoritative. Without one, the header and
//! description are scanned for disruption vocabulary. With neither, the
//! alert is a [`SeverityTier::Delay`]: the feed reported *something* for the
//! route, so it is never reported as good service by default.

use tracing::debug;

use crate::model::{Alert, AlertEffect, Classification, ClassificationBasis, SeverityTier};

/// Phrases that indicate trains are not running the normal pattern.
static SERVICE_CHANGE_TERMS: &[&str] = &["suspended", "no service", "not operating"];

/// Phrases that indicate trains are running late.
static DELAY_TERMS: &[&str] = &["delay", "running behind"];

static SCHEDULE_CHANGE_TERMS: &[&str] = &["modified schedule", "adjusted schedule"];

/// Mirrors [`GOOD_SERVICE_TEXT`](crate::model::GOOD_SERVICE_TEXT), the
/// route status board label, which some agencies also post as alert text
/// once a disruption clears. Only consulted when no disruption phrase
/// matches.
static GOOD_SERVICE_TERMS: &[&str] = &["good service"];

/// Returns the severity tier for `alert`.
pub fn classify(alert: &Alert) -> SeverityTier {
    classify_detailed(alert).tier
}

/// Classifies `alert` and reports what the decision was based on.
///
/// | Evidence                                       | Tier           |
/// |------------------------------------------------|----------------|
/// | NO_SERVICE, REDUCED_SERVICE, DETOUR,           | ServiceChange  |
/// | MODIFIED_SERVICE, STOP_MOVED                   |                |
/// | SIGNIFICANT_DELAYS                             | Delay          |
/// | NO_EFFECT, ADDITIONAL_SERVICE,                 | Good           |
/// | ACCESSIBILITY_ISSUE                            |                |
/// | OTHER/UNKNOWN_EFFECT or none                   | text, then Delay |
pub fn classify_detailed(alert: &Alert) -> Classification {
    if let Some(tier) = alert.effect.and_then(effect_tier) {
        return Classification {
            tier,
            basis: ClassificationBasis::Effect,
            ambiguous: false,
        };
    }

    let classification = match text_tier(&alert.combined_text()) {
        Some((tier, conflicting)) => Classification {
            tier,
            basis: ClassificationBasis::Text,
            ambiguous: conflicting,
        },
        None => Classification {
            tier: SeverityTier::Delay,
            basis: ClassificationBasis::Default,
            ambiguous: true,
        },
    };

    if classification.ambiguous {
        debug!(
            alert_id = %alert.id,
            tier = classification.tier.as_str(),
            basis = ?classification.basis,
            "Ambiguous alert classification"
        );
    }

    classification
}

/// Maps a structured effect onto a tier. `None` means the effect carries no
/// usable signal and text heuristics should decide.
fn effect_tier(effect: AlertEffect) -> Option<SeverityTier> {
    match effect {
        AlertEffect::NoService
        | AlertEffect::ReducedService
        | AlertEffect::Detour
        | AlertEffect::ModifiedService
        | AlertEffect::StopMoved => Some(SeverityTier::ServiceChange),
        AlertEffect::SignificantDelays => Some(SeverityTier::Delay),
        AlertEffect::NoEffect
        | AlertEffect::AdditionalService
        | AlertEffect::AccessibilityIssue => Some(SeverityTier::Good),
        AlertEffect::OtherEffect | AlertEffect::UnknownEffect => None,
    }
}

/// Scans free text in precedence order. The flag is set when the text also
/// matches vocabulary of a different tier.
fn text_tier(text: &str) -> Option<(SeverityTier, bool)> {
    let text = text.to_lowercase();
    let has_any = |terms: &[&str]| terms.iter().any(|t| text.contains(t));

    let suspended = has_any(SERVICE_CHANGE_TERMS);
    let delayed = has_any(DELAY_TERMS);
    let skipping = text.contains("skip");
    let express = text.contains("express") && (text.contains("running") || skipping);
    let rescheduled = has_any(SCHEDULE_CHANGE_TERMS);
    let good = has_any(GOOD_SERVICE_TERMS);

    let service_change = suspended || skipping || express || rescheduled;

    if suspended {
        Some((SeverityTier::ServiceChange, delayed))
    } else if delayed {
        Some((SeverityTier::Delay, service_change))
    } else if service_change {
        Some((SeverityTier::ServiceChange, false))
    } else if good {
        Some((SeverityTier::Good, false))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn alert(header: &str, description: &str, effect: Option<AlertEffect>) -> Alert {
        Alert {
            id: "alert".to_string(),
            affected_routes: BTreeSet::from(["A".to_string()]),
            header: header.to_string(),
            description: description.to_string(),
            url: None,
            active_periods: vec![],
            effect,
            cause: None,
        }
    }

    #[test]
    fn test_delays_effect_label_is_delay() {
        let a = alert("", "", AlertEffect::from_label("DELAYS"));
        assert_eq!(classify(&a), SeverityTier::Delay);
    }

    #[test]
    fn test_effect_wins_over_text() {
        let a = alert(
            "Trains are suspended",
            "",
            Some(AlertEffect::SignificantDelays),
        );
        let c = classify_detailed(&a);
        assert_eq!(c.tier, SeverityTier::Delay);
        assert_eq!(c.basis, ClassificationBasis::Effect);

        let a = alert("Trains are delayed", "", Some(AlertEffect::NoService));
        assert_eq!(classify(&a), SeverityTier::ServiceChange);
    }

    #[test]
    fn test_non_authoritative_effect_falls_back_to_text() {
        let a = alert(
            "No service between 59 St and 125 St",
            "",
            Some(AlertEffect::UnknownEffect),
        );
        let c = classify_detailed(&a);
        assert_eq!(c.tier, SeverityTier::ServiceChange);
        assert_eq!(c.basis, ClassificationBasis::Text);
    }

    #[test]
    fn test_text_heuristics() {
        let cases = [
            ("Northbound trains are delayed", SeverityTier::Delay),
            ("Trains running behind schedule", SeverityTier::Delay),
            ("Trains skip 23 St", SeverityTier::ServiceChange),
            ("Local trains running express", SeverityTier::ServiceChange),
            ("Modified schedule this weekend", SeverityTier::ServiceChange),
            ("Service suspended", SeverityTier::ServiceChange),
            ("Good service resumed", SeverityTier::Good),
            ("Good service on the local, delays on the express", SeverityTier::Delay),
        ];

        for (header, expected) in cases {
            assert_eq!(classify(&alert(header, "", None)), expected, "{header}");
        }
    }

    #[test]
    fn test_description_is_considered() {
        let a = alert("Update", "Trains are not operating", None);
        assert_eq!(classify(&a), SeverityTier::ServiceChange);
    }

    #[test]
    fn test_no_evidence_defaults_to_delay() {
        let c = classify_detailed(&alert("Elevator notice", "", None));
        assert_eq!(c.tier, SeverityTier::Delay);
        assert_eq!(c.basis, ClassificationBasis::Default);
        assert!(c.ambiguous);
    }

    #[test]
    fn test_conflicting_text_is_flagged() {
        let c = classify_detailed(&alert("Delays while trains skip stops", "", None));
        assert_eq!(c.tier, SeverityTier::Delay);
        assert!(c.ambiguous);
    }

    #[test]
    fn test_classification_is_stable() {
        let alerts = [
            alert("Delays", "", None),
            alert("", "", Some(AlertEffect::Detour)),
            alert("", "", None),
            alert("Some text", "more", Some(AlertEffect::OtherEffect)),
        ];
        for a in &alerts {
            let first = classify_detailed(a);
            for _ in 0..5 {
                assert_eq!(classify_detailed(a), first);
            }
        }
    }
}

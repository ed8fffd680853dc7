use crate::error::DescribeError;
use crate::types::BusStatus;
use async_trait::async_trait;
use tracing::warn;

/// Deterministic fallback sentence used whenever a describer fails.
pub fn fallback_sentence(bus: &BusStatus) -> String {
    format!("{} is {}.", bus.route, bus.state)
}

/// Turns a settled bus status into a short human-readable announcement.
///
/// Implementations may call out to a remote generative service; the core
/// treats them as best-effort and falls back to [`fallback_sentence`] on any
/// failure, so a describer can never affect state machine correctness.
#[async_trait]
pub trait Describer: Send + Sync {
    async fn describe(
        &self,
        bus: &BusStatus,
        terminal_name: &str,
        bay_number: &str,
    ) -> Result<String, DescribeError>;
}

/// Default describer producing the template sentence directly, for
/// deployments without a generative backend.
pub struct TemplateDescriber;

#[async_trait]
impl Describer for TemplateDescriber {
    async fn describe(
        &self,
        bus: &BusStatus,
        _terminal_name: &str,
        _bay_number: &str,
    ) -> Result<String, DescribeError> {
        Ok(fallback_sentence(bus))
    }
}

/// Run a describer and swallow its failure into the template sentence.
pub async fn describe_or_fallback(
    describer: &dyn Describer,
    bus: &BusStatus,
    terminal_name: &str,
    bay_number: &str,
) -> String {
    match describer.describe(bus, terminal_name, bay_number).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Description generation failed, using template: {}", e);
            fallback_sentence(bus)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArrivalState;

    fn bus(state: ArrivalState) -> BusStatus {
        BusStatus {
            tag_id: "E280-11AC-0001".to_string(),
            route: "Route 402 - Northgate".to_string(),
            state,
            confidence: 60,
            first_seen_ms: 0,
            last_seen_ms: 0,
            avg_rssi: -60.0,
            description: String::new(),
        }
    }

    struct FailingDescriber;

    #[async_trait]
    impl Describer for FailingDescriber {
        async fn describe(
            &self,
            _bus: &BusStatus,
            _terminal_name: &str,
            _bay_number: &str,
        ) -> Result<String, DescribeError> {
            Err(DescribeError::Unavailable {
                details: "offline".to_string(),
            })
        }
    }

    #[test]
    fn test_fallback_sentence() {
        assert_eq!(
            fallback_sentence(&bus(ArrivalState::Arrived)),
            "Route 402 - Northgate is arrived."
        );
        assert_eq!(
            fallback_sentence(&bus(ArrivalState::Approaching)),
            "Route 402 - Northgate is approaching."
        );
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_template() {
        let text = describe_or_fallback(
            &FailingDescriber,
            &bus(ArrivalState::Approaching),
            "Kottarakara",
            "Bay 12",
        )
        .await;
        assert_eq!(text, "Route 402 - Northgate is approaching.");
    }

    #[tokio::test]
    async fn test_template_describer() {
        let text = describe_or_fallback(
            &TemplateDescriber,
            &bus(ArrivalState::Arrived),
            "Kottarakara",
            "Bay 12",
        )
        .await;
        assert_eq!(text, "Route 402 - Northgate is arrived.");
    }
}

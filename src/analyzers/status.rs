use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::analyzers::types::{AlertMessage, RouteStatus, ServiceStatus};
use crate::model::{ClassifiedAlert, GOOD_SERVICE_TEXT, RouteInfo, SeverityTier};

const MAX_HEADER_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 1000;
const MAX_TEXT_CHARS: usize = 300;

/// Aggregates alerts into a per-route status.
///
/// Every route in `routes` is present in the result; routes that only appear
/// in alerts are added with `known = false`. Alerts not active at `now` are
/// ignored. The worst tier wins; among equally severe alerts the one later in
/// feed order supplies the representative message.
pub fn aggregate_status(
    alerts: &[ClassifiedAlert],
    routes: &BTreeMap<String, RouteInfo>,
    now: DateTime<Utc>,
) -> ServiceStatus {
    let mut statuses: BTreeMap<String, RouteStatus> = routes
        .values()
        .map(|info| (info.id.clone(), good_service(&info.id, Some(info), true)))
        .collect();

    // representative alert per route: (tier, message text)
    let mut representative: BTreeMap<String, (SeverityTier, String)> = BTreeMap::new();

    for alert in alerts.iter().filter(|a| a.alert.is_active_at(now)) {
        let message = alert_message(alert);

        for route_id in &alert.alert.affected_routes {
            let status = statuses
                .entry(route_id.clone())
                .or_insert_with(|| good_service(route_id, None, false));
            status.messages.push(message.clone());

            let replace = representative
                .get(route_id)
                .is_none_or(|(tier, _)| alert.tier() >= *tier);
            if replace {
                representative.insert(route_id.clone(), (alert.tier(), message.text.clone()));
            }
        }
    }

    for (route_id, (tier, text)) in representative {
        if let Some(status) = statuses.get_mut(&route_id) {
            status.tier = tier;
            status.message = text;
        }
    }

    ServiceStatus { routes: statuses }
}

fn good_service(route_id: &str, info: Option<&RouteInfo>, known: bool) -> RouteStatus {
    RouteStatus {
        route_id: route_id.to_string(),
        name: info.map(display_name),
        tier: SeverityTier::Good,
        message: GOOD_SERVICE_TEXT.to_string(),
        messages: Vec::new(),
        known,
    }
}

fn display_name(info: &RouteInfo) -> String {
    match (info.short_name.is_empty(), info.long_name.is_empty()) {
        (false, _) => format!("{} Line", info.short_name),
        (true, false) => info.long_name.clone(),
        (true, true) => info.id.clone(),
    }
}

fn alert_message(alert: &ClassifiedAlert) -> AlertMessage {
    AlertMessage {
        alert_id: alert.alert.id.clone(),
        header: truncate_chars(&alert.alert.header, MAX_HEADER_CHARS),
        description: truncate_chars(&alert.alert.description, MAX_DESCRIPTION_CHARS),
        text: truncate_chars(&alert.alert.combined_text(), MAX_TEXT_CHARS),
        status: alert.tier(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

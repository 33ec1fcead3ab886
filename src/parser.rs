//! Protobuf decoder for GTFS Realtime feeds.
//!
//! [`parse_feed`] only checks that the bytes are a `FeedMessage`;
//! [`decode`] validates the envelope and normalizes alerts and trip updates
//! into a [`DecodedFeed`].

use chrono::{DateTime, Utc};
use prost::Message;
use std::collections::BTreeSet;

use crate::error::DecodeError;
use crate::gtfs_rt::{
    self, FeedMessage, TranslatedString, feed_header::Incrementality, trip_update,
};
use crate::model::{
    ActivePeriod, Alert, AlertCause, AlertEffect, Arrival, DecodedFeed, Direction,
};

/// Major versions of the gtfs-realtime schema this decoder understands.
const SUPPORTED_MAJOR_VERSIONS: &[&str] = &["1", "2"];

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`DecodeError::MalformedEnvelope`] if the bytes are not valid
/// protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    FeedMessage::decode(bytes).map_err(|e| DecodeError::MalformedEnvelope(e.to_string()))
}

/// Decodes and normalizes a feed payload.
///
/// Pure: identical bytes always produce an identical [`DecodedFeed`].
pub fn decode(bytes: &[u8]) -> Result<DecodedFeed, DecodeError> {
    let feed = parse_feed(bytes)?;
    validate_header(&feed.header)?;

    let mut decoded = DecodedFeed {
        feed_timestamp: feed.header.timestamp.and_then(unix_seconds),
        ..Default::default()
    };

    for entity in &feed.entity {
        if entity.is_deleted.unwrap_or(false) {
            continue;
        }

        if let Some(alert) = &entity.alert {
            decoded.alerts.push(normalize_alert(&entity.id, alert));
        }

        if let Some(update) = &entity.trip_update {
            decoded.arrivals.extend(normalize_trip_update(update));
        }
    }

    Ok(decoded)
}

fn validate_header(header: &gtfs_rt::FeedHeader) -> Result<(), DecodeError> {
    let version = header.gtfs_realtime_version.trim();
    if version.is_empty() {
        return Err(DecodeError::MalformedEnvelope(
            "feed header carries no gtfs_realtime_version".to_string(),
        ));
    }

    let major = version.split('.').next().unwrap_or_default();
    if !SUPPORTED_MAJOR_VERSIONS.contains(&major) {
        return Err(DecodeError::UnsupportedVersion(version.to_string()));
    }

    if let Some(raw) = header.incrementality {
        match Incrementality::try_from(raw) {
            Ok(Incrementality::FullDataset) => {}
            Ok(Incrementality::Differential) => {
                return Err(DecodeError::UnexpectedSchema(
                    "differential feeds are not supported".to_string(),
                ));
            }
            Err(_) => {
                return Err(DecodeError::UnexpectedSchema(format!(
                    "unknown incrementality value {raw}"
                )));
            }
        }
    }

    Ok(())
}

fn normalize_alert(entity_id: &str, alert: &gtfs_rt::Alert) -> Alert {
    let affected_routes: BTreeSet<String> = alert
        .informed_entity
        .iter()
        .filter_map(|e| e.route_id.as_deref())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();

    let active_periods = alert
        .active_period
        .iter()
        .map(|p| ActivePeriod {
            start: p.start.and_then(unix_seconds),
            end: p.end.and_then(unix_seconds),
        })
        .collect();

    Alert {
        id: entity_id.to_string(),
        affected_routes,
        header: translated_text(alert.header_text.as_ref()),
        description: translated_text(alert.description_text.as_ref()),
        url: Some(translated_text(alert.url.as_ref())).filter(|u| !u.is_empty()),
        active_periods,
        effect: alert
            .effect
            .and_then(|raw| gtfs_rt::alert::Effect::try_from(raw).ok())
            .map(AlertEffect::from),
        cause: alert
            .cause
            .and_then(|raw| gtfs_rt::alert::Cause::try_from(raw).ok())
            .map(AlertCause::from),
    }
}

fn normalize_trip_update(update: &gtfs_rt::TripUpdate) -> Vec<Arrival> {
    let route_id = update.trip.route_id.clone().unwrap_or_default();
    let trip_id = update.trip.trip_id.clone().unwrap_or_default();

    update
        .stop_time_update
        .iter()
        .filter_map(|stu| {
            let stop_id = stu.stop_id.as_deref()?;
            let time = event_time(stu.arrival.as_ref()).or(event_time(stu.departure.as_ref()))?;
            let (station_id, direction) = split_stop_id(stop_id, update.trip.direction_id);

            Some(Arrival {
                station_id,
                stop_id: stop_id.to_string(),
                route_id: route_id.clone(),
                direction,
                arrival_time: time,
                trip_id: trip_id.clone(),
            })
        })
        .collect()
}

fn event_time(event: Option<&trip_update::StopTimeEvent>) -> Option<DateTime<Utc>> {
    event?.time.and_then(|t| DateTime::from_timestamp(t, 0))
}

/// Splits a platform stop id such as `127N` into its parent station and the
/// direction of travel. `direction_id` is used when there is no suffix.
fn split_stop_id(stop_id: &str, direction_id: Option<u32>) -> (String, Direction) {
    let suffixed = |suffix: char| stop_id.len() > 1 && stop_id.ends_with(suffix);

    if suffixed('N') {
        (stop_id[..stop_id.len() - 1].to_string(), Direction::Uptown)
    } else if suffixed('S') {
        (stop_id[..stop_id.len() - 1].to_string(), Direction::Downtown)
    } else {
        let direction = match direction_id {
            Some(0) => Direction::Uptown,
            Some(1) => Direction::Downtown,
            _ => Direction::Unknown,
        };
        (stop_id.to_string(), direction)
    }
}

/// Picks the English translation when one is tagged, otherwise the first.
fn translated_text(text: Option<&TranslatedString>) -> String {
    let Some(text) = text else {
        return String::new();
    };

    text.translation
        .iter()
        .find(|t| {
            t.language
                .as_deref()
                .is_some_and(|lang| lang.eq_ignore_ascii_case("en"))
        })
        .or_else(|| text.translation.first())
        .map(|t| t.text.trim().to_string())
        .unwrap_or_default()
}

fn unix_seconds(secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

impl From<gtfs_rt::alert::Effect> for AlertEffect {
    fn from(effect: gtfs_rt::alert::Effect) -> Self {
        use gtfs_rt::alert::Effect;
        match effect {
            Effect::NoService => AlertEffect::NoService,
            Effect::ReducedService => AlertEffect::ReducedService,
            Effect::SignificantDelays => AlertEffect::SignificantDelays,
            Effect::Detour => AlertEffect::Detour,
            Effect::AdditionalService => AlertEffect::AdditionalService,
            Effect::ModifiedService => AlertEffect::ModifiedService,
            Effect::OtherEffect => AlertEffect::OtherEffect,
            Effect::UnknownEffect => AlertEffect::UnknownEffect,
            Effect::StopMoved => AlertEffect::StopMoved,
            Effect::NoEffect => AlertEffect::NoEffect,
            Effect::AccessibilityIssue => AlertEffect::AccessibilityIssue,
        }
    }
}

impl From<gtfs_rt::alert::Cause> for AlertCause {
    fn from(cause: gtfs_rt::alert::Cause) -> Self {
        use gtfs_rt::alert::Cause;
        match cause {
            Cause::UnknownCause => AlertCause::UnknownCause,
            Cause::OtherCause => AlertCause::OtherCause,
            Cause::TechnicalProblem => AlertCause::TechnicalProblem,
            Cause::Strike => AlertCause::Strike,
            Cause::Demonstration => AlertCause::Demonstration,
            Cause::Accident => AlertCause::Accident,
            Cause::Holiday => AlertCause::Holiday,
            Cause::Weather => AlertCause::Weather,
            Cause::Maintenance => AlertCause::Maintenance,
            Cause::Construction => AlertCause::Construction,
            Cause::PoliceActivity => AlertCause::PoliceActivity,
            Cause::MedicalEmergency => AlertCause::MedicalEmergency,
        }
    }
}

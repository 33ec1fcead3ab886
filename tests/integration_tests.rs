use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use prost::Message;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transit_feed_engine::TransitEngine;
use transit_feed_engine::cache::CycleOutcome;
use transit_feed_engine::clock::{Clock, ManualClock};
use transit_feed_engine::config::{EngineConfig, FeedEndpoint};
use transit_feed_engine::error::{CycleError, FetchError, QueryError};
use transit_feed_engine::fetch::{FeedFetcher, RawFeedPayload};
use transit_feed_engine::gtfs_rt::{
    self, EntitySelector, FeedEntity, FeedHeader, FeedMessage, TimeRange, TranslatedString,
    TripDescriptor, TripUpdate,
    trip_update::{StopTimeEvent, StopTimeUpdate},
};
use transit_feed_engine::model::{LatLon, RouteInfo, RouteShape, SeverityTier, Station};
use transit_feed_engine::services::shape_source::StaticNetwork;

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn secs(at: DateTime<Utc>) -> u64 {
    at.timestamp() as u64
}

fn route(id: &str) -> RouteInfo {
    RouteInfo {
        id: id.to_string(),
        short_name: id.to_string(),
        long_name: format!("{id} Local"),
        color: Some("#0039A6".to_string()),
    }
}

fn station(id: &str, name: &str) -> Station {
    Station {
        id: id.to_string(),
        name: name.to_string(),
        lat: 40.757,
        lon: -73.989,
        lines: BTreeSet::new(),
    }
}

fn network() -> StaticNetwork {
    let track: Vec<LatLon> = (0..4)
        .map(|k| LatLon::new(40.757, -73.99 + k as f64 * 0.001))
        .collect();

    StaticNetwork {
        routes: BTreeMap::from([
            ("A".to_string(), route("A")),
            ("C".to_string(), route("C")),
        ]),
        shapes: vec![
            RouteShape {
                route_id: "C".to_string(),
                points: track.clone(),
                color: None,
            },
            RouteShape {
                route_id: "A".to_string(),
                points: track,
                color: None,
            },
        ],
        stations: BTreeMap::from([
            ("A27".to_string(), station("A27", "42 St-Port Authority")),
            ("A28".to_string(), station("A28", "34 St-Penn Station")),
        ]),
        stop_parents: BTreeMap::new(),
    }
}

fn text(s: &str) -> Option<TranslatedString> {
    Some(TranslatedString {
        translation: vec![gtfs_rt::translated_string::Translation {
            text: s.to_string(),
            language: Some("en".to_string()),
        }],
    })
}

fn alert_entity(
    id: &str,
    routes: &[&str],
    header: &str,
    effect: Option<gtfs_rt::alert::Effect>,
) -> FeedEntity {
    FeedEntity {
        id: id.to_string(),
        alert: Some(gtfs_rt::Alert {
            informed_entity: routes
                .iter()
                .map(|r| EntitySelector {
                    route_id: Some(r.to_string()),
                    ..Default::default()
                })
                .collect(),
            header_text: text(header),
            effect: effect.map(|e| e as i32),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn trip_entity(trip_id: &str, stops: &[(&str, DateTime<Utc>)]) -> FeedEntity {
    FeedEntity {
        id: trip_id.to_string(),
        trip_update: Some(TripUpdate {
            trip: TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                route_id: Some("A".to_string()),
                ..Default::default()
            },
            stop_time_update: stops
                .iter()
                .map(|(stop, at)| StopTimeUpdate {
                    stop_id: Some(stop.to_string()),
                    arrival: Some(StopTimeEvent {
                        time: Some(at.timestamp()),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn encode(entity: Vec<FeedEntity>, at: DateTime<Utc>) -> Vec<u8> {
    FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: Some(secs(at)),
            feed_version: None,
        },
        entity,
    }
    .encode_to_vec()
}

enum Step {
    Serve(Vec<u8>),
    Fail,
    Hang,
}

type Responder = dyn Fn(&str, u32) -> Step + Send + Sync;

/// Answers each request from a closure of (endpoint name, call number).
struct ScriptedFetcher {
    clock: Arc<ManualClock>,
    calls: Mutex<HashMap<String, u32>>,
    respond: Box<Responder>,
}

impl ScriptedFetcher {
    fn new(clock: Arc<ManualClock>, respond: impl Fn(&str, u32) -> Step + Send + Sync + 'static) -> Self {
        Self {
            clock,
            calls: Mutex::new(HashMap::new()),
            respond: Box::new(respond),
        }
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, endpoint: &FeedEndpoint) -> Result<RawFeedPayload, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(endpoint.name.clone()).or_insert(0);
            *n += 1;
            *n
        };

        match (self.respond)(&endpoint.name, call) {
            Step::Serve(bytes) => Ok(RawFeedPayload {
                endpoint: endpoint.name.clone(),
                url: endpoint.url.clone(),
                bytes: bytes.into(),
                fetched_at: self.clock.now(),
            }),
            Step::Fail => Err(FetchError::HttpStatus {
                url: endpoint.url.clone(),
                status: 503,
            }),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        feed_urls: vec![
            FeedEndpoint::new("alerts", "http://feeds.test/alerts"),
            FeedEndpoint::new("ace", "http://feeds.test/ace"),
        ],
        fetch_retries: 0,
        ..EngineConfig::default()
    }
}

fn engine(
    clock: &Arc<ManualClock>,
    respond: impl Fn(&str, u32) -> Step + Send + Sync + 'static,
) -> TransitEngine {
    let fetcher = ScriptedFetcher::new(Arc::clone(clock), respond);
    TransitEngine::new(&config(), Arc::new(fetcher), network(), clock.clone())
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_queries_before_first_cycle() {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&clock, |_, _| Step::Fail);

    assert_eq!(engine.service_status().unwrap_err(), QueryError::NotYetAvailable);
    assert_eq!(engine.arrivals("A27").unwrap_err(), QueryError::NotYetAvailable);
    assert_eq!(engine.arrivals("Z99").unwrap_err(), QueryError::NotYetAvailable);

    // a failed cycle does not make data appear
    assert!(matches!(engine.refresh_once().await, CycleOutcome::Failed { .. }));
    assert_eq!(engine.service_status().unwrap_err(), QueryError::NotYetAvailable);
}

#[tokio::test]
async fn test_delays_effect_yields_delay_status() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, _| match endpoint {
        "alerts" => Step::Serve(encode(
            vec![alert_entity(
                "lga-1",
                &["A"],
                "Northbound A trains are delayed",
                Some(gtfs_rt::alert::Effect::SignificantDelays),
            )],
            now,
        )),
        _ => Step::Serve(encode(vec![], now)),
    });

    assert_eq!(engine.refresh_once().await, CycleOutcome::Refreshed { cycle: 1 });
    let status = engine.service_status().unwrap();
    assert!(!status.is_stale);

    let a = status.value.get("A").unwrap();
    assert_eq!(a.tier, SeverityTier::Delay);
    assert_eq!(a.message, "Northbound A trains are delayed");
    assert_eq!(a.name.as_deref(), Some("A Line"));

    let c = status.value.get("C").unwrap();
    assert_eq!(c.tier, SeverityTier::Good);
    assert_eq!(c.message, "Good Service");
    assert!(c.messages.is_empty());
}

#[tokio::test]
async fn test_worst_tier_wins_and_unknown_routes_are_kept() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, _| match endpoint {
        "alerts" => Step::Serve(encode(
            vec![
                alert_entity("1", &["A"], "A trains are suspended between 59 St and 125 St", None),
                alert_entity("2", &["A", "X"], "Minor delays", None),
            ],
            now,
        )),
        _ => Step::Serve(encode(vec![], now)),
    });
    engine.refresh_once().await;

    let status = engine.service_status().unwrap().value;
    let a = status.get("A").unwrap();
    assert_eq!(a.tier, SeverityTier::ServiceChange);
    assert_eq!(a.messages.len(), 2);

    let x = status.get("X").unwrap();
    assert!(!x.known);
    assert_eq!(x.tier, SeverityTier::Delay);

    let (snapshot, _) = engine.current().unwrap();
    assert!(snapshot.alerts[1].unknown_routes.contains("X"));
}

#[tokio::test]
async fn test_expired_alert_is_ignored() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, _| match endpoint {
        "alerts" => {
            let mut entity = alert_entity("old", &["A"], "A trains are suspended", None);
            if let Some(alert) = entity.alert.as_mut() {
                alert.active_period = vec![TimeRange {
                    start: Some(secs(now - ChronoDuration::hours(3))),
                    end: Some(secs(now - ChronoDuration::hours(1))),
                }];
            }
            Step::Serve(encode(vec![entity], now))
        }
        _ => Step::Serve(encode(vec![], now)),
    });
    engine.refresh_once().await;

    let status = engine.service_status().unwrap().value;
    assert_eq!(status.get("A").unwrap().tier, SeverityTier::Good);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_timeout_keeps_previous_snapshot() {
    let clock = Arc::new(ManualClock::new(t0()));
    let feed_clock = Arc::clone(&clock);
    let engine = engine(&clock, move |endpoint, call| {
        if call == 5 && endpoint == "ace" {
            return Step::Hang;
        }
        let now = feed_clock.now();
        match endpoint {
            "ace" => Step::Serve(encode(
                vec![trip_entity(&format!("trip-{call}"), &[("A27N", now + ChronoDuration::minutes(4))])],
                now,
            )),
            _ => Step::Serve(encode(vec![], now)),
        }
    });

    for cycle in 1..=4 {
        assert_eq!(engine.refresh_once().await, CycleOutcome::Refreshed { cycle });
        clock.advance(ChronoDuration::seconds(30));
    }
    let cycle4_fetched_at = t0() + ChronoDuration::seconds(90);

    let outcome = engine.refresh_once().await;
    assert_eq!(
        outcome,
        CycleOutcome::Failed {
            cycle: 5,
            error: CycleError::DeadlineElapsed { deadline_secs: 20 }
        }
    );

    let (snapshot, is_stale) = engine.current().unwrap();
    assert_eq!(snapshot.cycle, 4);
    assert_eq!(snapshot.fetched_at, cycle4_fetched_at);
    assert!(!is_stale);
    assert_eq!(snapshot.arrivals_at("A27")[0].trip_id, "trip-4");

    let status = engine.refresh_status();
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.unwrap().contains("deadline"));

    // stale only once the threshold (2 x 30 s) has fully passed, and stays so
    clock.set(cycle4_fetched_at + ChronoDuration::seconds(60));
    assert!(!engine.arrivals("A27").unwrap().is_stale);
    clock.set(cycle4_fetched_at + ChronoDuration::seconds(61));
    assert!(engine.arrivals("A27").unwrap().is_stale);
    clock.advance(ChronoDuration::hours(1));
    assert!(engine.service_status().unwrap().is_stale);
}

#[tokio::test]
async fn test_endpoint_failure_keeps_previous_snapshot() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, call| match (endpoint, call) {
        ("alerts", 2) => Step::Fail,
        _ => Step::Serve(encode(vec![], now)),
    });

    assert_eq!(engine.refresh_once().await, CycleOutcome::Refreshed { cycle: 1 });
    match engine.refresh_once().await {
        CycleOutcome::Failed { cycle: 2, error: CycleError::Endpoints(failures) } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].endpoint(), "alerts");
            assert_eq!(failures[0].kind(), "http_status");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(engine.current().unwrap().0.cycle, 1);
}

#[tokio::test]
async fn test_undecodable_payload_fails_cycle() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, _| match endpoint {
        "ace" => Step::Serve(vec![0xff, 0xff, 0xff]),
        _ => Step::Serve(encode(vec![], now)),
    });

    match engine.refresh_once().await {
        CycleOutcome::Failed { error: CycleError::Endpoints(failures), .. } => {
            assert_eq!(failures[0].kind(), "malformed_envelope");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_known_station_without_predictions_is_empty() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, _| match endpoint {
        "ace" => Step::Serve(encode(
            vec![trip_entity("t1", &[("A27S", now + ChronoDuration::minutes(2))])],
            now,
        )),
        _ => Step::Serve(encode(vec![], now)),
    });
    engine.refresh_once().await;

    let arrivals = engine.arrivals("A28").unwrap();
    assert!(arrivals.value.is_empty());
    assert!(!arrivals.is_stale);

    // ids missing from the static data are not an error either
    let unknown = engine.arrivals("Z99").unwrap();
    assert!(unknown.value.is_empty());
    assert_eq!(unknown.cycle, 1);
}

#[tokio::test]
async fn test_arrivals_are_sorted_and_limited() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |endpoint, _| match endpoint {
        "ace" => {
            // twelve trips, listed latest first
            let trips = (0..12)
                .rev()
                .map(|k| {
                    trip_entity(
                        &format!("trip-{k:02}"),
                        &[("A27N", now + ChronoDuration::minutes(k + 1))],
                    )
                })
                .collect();
            Step::Serve(encode(trips, now))
        }
        _ => Step::Serve(encode(vec![], now)),
    });
    engine.refresh_once().await;

    let arrivals = engine.arrivals("A27").unwrap().value;
    assert_eq!(arrivals.len(), 10);
    assert!(arrivals.windows(2).all(|w| w[0].arrival_time <= w[1].arrival_time));
    assert_eq!(arrivals[0].trip_id, "trip-00");
    assert_eq!(arrivals[0].minutes_away(now), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_a_mixed_snapshot() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = Arc::new(engine(&clock, move |endpoint, call| match endpoint {
        "alerts" => Step::Serve(encode(
            vec![alert_entity(&format!("cycle-{call}"), &["A"], "Delays", None)],
            now,
        )),
        _ => Step::Serve(encode(
            vec![trip_entity(
                &format!("cycle-{call}"),
                &[("A27N", now + ChronoDuration::minutes(3))],
            )],
            now,
        )),
    }));
    engine.refresh_once().await;

    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        readers.push(tokio::spawn(async move {
            for _ in 0..500 {
                let (snapshot, _) = engine.current().unwrap();
                let expected = format!("cycle-{}", snapshot.cycle);
                assert_eq!(snapshot.alerts[0].alert.id, expected);
                assert_eq!(snapshot.arrivals_at("A27")[0].trip_id, expected);
                tokio::task::yield_now().await;
            }
        }));
    }

    for _ in 0..25 {
        assert!(matches!(engine.refresh_once().await, CycleOutcome::Refreshed { .. }));
    }
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_background_refresh_stops_on_shutdown() {
    let clock = Arc::new(ManualClock::new(t0()));
    let now = t0();
    let engine = engine(&clock, move |_, _| Step::Serve(encode(vec![], now)));

    let handle = engine.spawn_refresh();
    tokio::time::sleep(Duration::from_secs(95)).await;
    handle.shutdown().await;

    let attempted = engine.refresh_status().cycles_attempted;
    assert_eq!(attempted, 4);
    assert_eq!(engine.current().unwrap().0.cycle, 4);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(engine.refresh_status().cycles_attempted, attempted);
}

#[tokio::test]
async fn test_route_polylines_separate_shared_track() {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = engine(&clock, |_, _| Step::Fail);

    let polylines = engine.route_polylines();
    let ids: Vec<&str> = polylines.iter().map(|p| p.route_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C"]);

    for (a, c) in polylines[0].points.iter().zip(&polylines[1].points) {
        // 12 m apart along a meridian, about 1.08e-4 degrees of latitude
        assert!((a.lat - c.lat).abs() > 1.0e-4);
        assert!((a.lon - c.lon).abs() < 1.0e-6);
    }
    assert_eq!(engine.stations().count(), 2);
}

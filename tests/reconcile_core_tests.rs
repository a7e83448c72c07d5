//! Integration tests for the reconciliation core:
//! - state-machine edge disjointness over a grid of component states
//! - the documented end-to-end scenarios, decomposed to the pure core
//! - duration grammar round-trips across the option set

use bos_engine::clock;
use bos_engine::filters::{
    ActualBootStateIsSet, ActualStateAge, BootArtifactStatesMatch, DesiredBootStateIsNone,
    DesiredStateIsNone, LastActionIs, LocalFilter, StatesMatch, TimeSinceLastAction,
};
use bos_engine::operators::DiscoveryOperator;
use bos_engine::{
    Action, ActualState, BootArtifacts, Component, DesiredState, LastAction, Options,
};
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;

// ============================================================================
// Test fixtures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Power {
    On,
    Off,
}

fn artifacts(kernel: &str, token: &str) -> BootArtifacts {
    BootArtifacts {
        kernel: kernel.to_string(),
        initrd: "s3://boot/initrd".to_string(),
        kernel_parameters: "console=ttyS0".to_string(),
        bss_token: token.to_string(),
    }
}

fn component(
    desired: Option<BootArtifacts>,
    actual: Option<BootArtifacts>,
    action: Action,
    minutes_since_action: i64,
) -> Component {
    Component {
        id: "x1c0s0b0n0".to_string(),
        enabled: true,
        desired_state: DesiredState {
            boot_artifacts: desired.unwrap_or_default(),
            configuration: String::new(),
        },
        actual_state: ActualState {
            boot_artifacts: actual.unwrap_or_default(),
            last_updated: clock::format_timestamp(clock::now() - ChronoDuration::minutes(30)),
        },
        last_action: LastAction {
            action,
            failed: false,
            num_attempts: 0,
            last_updated: if action == Action::None {
                String::new()
            } else {
                clock::format_timestamp(
                    clock::now() - ChronoDuration::minutes(minutes_since_action),
                )
            },
        },
        ..Component::default()
    }
}

// ============================================================================
// Edge disjointness
// ============================================================================

/// The local predicate of each power-flow edge, combined with the power
/// state its batch filters demand. HSM-enabled is assumed true for all, as
/// every edge requires it.
fn accepting_edges(c: &Component, power: Power, hsm_ready: bool) -> Vec<&'static str> {
    let mut accepted = Vec::new();

    // power_on: desired boot set, not a recent power_on, powered off.
    let wait = TimeSinceLastAction::seconds(300);
    if !DesiredBootStateIsNone.matches(c)
        && (!LastActionIs::new(vec![Action::PowerOn]).matches(c) || wait.matches(c))
        && power == Power::Off
    {
        accepted.push("power_on");
    }

    // power_off_graceful: artifacts disagree, settled last action, powered on.
    if !BootArtifactStatesMatch.matches(c)
        && LastActionIs::new(vec![Action::Complete, Action::Recovery, Action::None]).matches(c)
        && power == Power::On
    {
        accepted.push("power_off_graceful");
    }

    // power_off_forceful: off-leg pending for over five minutes, still on.
    if !StatesMatch.matches(c)
        && LastActionIs::new(vec![Action::PowerOffGracefully, Action::PowerOffForcefully])
            .matches(c)
        && TimeSinceLastAction::minutes(5).matches(c)
        && power == Power::On
    {
        accepted.push("power_off_forceful");
    }

    // ready_recovery: powered on five minutes ago, still not Ready in HSM.
    if !DesiredStateIsNone.matches(c)
        && LastActionIs::new(vec![Action::PowerOn]).matches(c)
        && TimeSinceLastAction::minutes(5).matches(c)
        && !hsm_ready
        && power == Power::On
    {
        accepted.push("ready_recovery");
    }

    // disable: fully reconciled and on, or nothing desired and off.
    if (StatesMatch.matches(c) && power == Power::On)
        || (DesiredStateIsNone.matches(c) && power == Power::Off)
    {
        accepted.push("disable");
    }

    accepted
}

#[test]
fn at_most_one_edge_accepts_each_component_state() {
    let desired = artifacts("k-new", "t-new");
    let stale = artifacts("k-old", "t-old");

    let records = vec![
        // Fresh: desired set, nothing actual, never acted on.
        component(Some(desired.clone()), None, Action::None, 0),
        // Power-on called recently.
        component(Some(desired.clone()), None, Action::PowerOn, 1),
        // Power-on called long ago (retry window open).
        component(Some(desired.clone()), None, Action::PowerOn, 10),
        // Booted to the wrong artifacts, settled.
        component(Some(desired.clone()), Some(stale.clone()), Action::None, 0),
        // Graceful off called recently.
        component(
            Some(desired.clone()),
            Some(stale.clone()),
            Action::PowerOffGracefully,
            1,
        ),
        // Graceful off called six minutes ago.
        component(
            Some(desired.clone()),
            Some(stale.clone()),
            Action::PowerOffGracefully,
            6,
        ),
        // Fully reconciled.
        component(Some(desired.clone()), Some(desired.clone()), Action::PowerOn, 10),
        // Nothing desired, nothing actual.
        component(None, None, Action::None, 0),
        // Nothing desired, stale actual.
        component(None, Some(stale), Action::Complete, 20),
    ];

    for (i, record) in records.iter().enumerate() {
        for power in [Power::On, Power::Off] {
            for hsm_ready in [true, false] {
                // A node that has reported the desired boot necessarily ran
                // its reporter, which only happens once HSM sees it Ready.
                if record.states_match() && !hsm_ready {
                    continue;
                }
                let accepted = accepting_edges(record, power, hsm_ready);
                assert!(
                    accepted.len() <= 1,
                    "record {i} with power {power:?}, ready={hsm_ready} accepted by {accepted:?}"
                );
            }
        }
    }
}

#[test]
fn the_boot_cycle_walks_the_expected_edges() {
    let desired = artifacts("k-new", "t-new");
    let stale = artifacts("k-old", "t-old");

    // A node booted to the wrong artifacts: graceful off first.
    let wrong_boot = component(Some(desired.clone()), Some(stale.clone()), Action::None, 0);
    assert_eq!(
        accepting_edges(&wrong_boot, Power::On, true),
        vec!["power_off_graceful"]
    );

    // Six minutes after the graceful off it is still on: escalate.
    let stuck = component(
        Some(desired.clone()),
        Some(stale.clone()),
        Action::PowerOffGracefully,
        6,
    );
    assert_eq!(
        accepting_edges(&stuck, Power::On, true),
        vec!["power_off_forceful"]
    );

    // Once off (actual state expired separately), power on.
    let down = component(Some(desired.clone()), None, Action::PowerOffForcefully, 2);
    assert_eq!(accepting_edges(&down, Power::Off, true), vec!["power_on"]);

    // Powered on but stalled short of Ready for five minutes: recovery.
    let stalled = component(Some(desired.clone()), None, Action::PowerOn, 6);
    assert_eq!(
        accepting_edges(&stalled, Power::On, false),
        vec!["ready_recovery"]
    );

    // Booted to the desired artifacts: terminal edge.
    let done = component(Some(desired.clone()), Some(desired), Action::PowerOn, 3);
    assert_eq!(accepting_edges(&done, Power::On, true), vec!["disable"]);
}

// ============================================================================
// Scenario: stale actual state
// ============================================================================

#[test]
fn five_hour_old_actual_state_expires_under_a_four_hour_ttl() {
    let options = Options::default();
    assert_eq!(options.component_actual_state_ttl, "4h");
    let ttl_seconds = options.actual_state_ttl().as_secs() as i64;

    let mut stale = component(None, Some(artifacts("k", "t")), Action::None, 0);
    stale.actual_state.last_updated =
        clock::format_timestamp(clock::now() - ChronoDuration::hours(5));

    assert!(ActualBootStateIsSet.matches(&stale));
    assert!(ActualStateAge::seconds(ttl_seconds).matches(&stale));

    // A fresh report is left alone.
    let mut fresh = stale.clone();
    fresh.actual_state.last_updated = clock::now_string();
    assert!(!ActualStateAge::seconds(ttl_seconds).matches(&fresh));
}

// ============================================================================
// Scenario: discovery reconcile
// ============================================================================

#[test]
fn discovery_adds_missing_components_once() {
    let hsm: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    let mut bos: HashSet<String> = ["a"].iter().map(|s| s.to_string()).collect();

    let first_pass = DiscoveryOperator::missing_ids(&hsm, &bos);
    assert_eq!(first_pass, vec!["b", "c"]);

    // The records land in the store disabled with empty states.
    for id in &first_pass {
        let record = Component::newly_discovered(id);
        assert!(!record.enabled);
        assert!(record.desired_state.is_none());
        assert!(record.actual_state.is_empty());
        assert_eq!(record.last_action.action, Action::NewlyDiscovered);
        bos.insert(record.id);
    }

    // A second pass with identical HSM output finds nothing to add.
    assert!(DiscoveryOperator::missing_ids(&hsm, &bos).is_empty());
}

// ============================================================================
// Scenario: session cleanup gating
// ============================================================================

#[test]
fn session_cleanup_age_comes_from_the_ttl_option() {
    let options = Options {
        cleanup_completed_session_ttl: "24h".to_string(),
        ..Options::default()
    };
    let ttl = options.session_cleanup_ttl().unwrap();
    assert_eq!(clock::format_duration(ttl), "1d");
    assert_eq!(clock::parse_duration("24h").unwrap(), ttl);

    let disabled = Options {
        cleanup_completed_session_ttl: "0s".to_string(),
        ..Options::default()
    };
    assert!(disabled.session_cleanup_ttl().is_none());
}

// ============================================================================
// Duration grammar round-trips over the option set
// ============================================================================

#[test]
fn option_duration_strings_round_trip() {
    let options = Options::default();
    for raw in [
        options.cleanup_completed_session_ttl.as_str(),
        options.component_actual_state_ttl.as_str(),
        "90s",
        "30m",
        "2w",
    ] {
        let parsed = clock::parse_duration(raw).unwrap();
        let rendered = clock::format_duration(parsed);
        assert_eq!(
            clock::parse_duration(&rendered).unwrap(),
            parsed,
            "{raw} should survive parse/format/parse"
        );
    }
}

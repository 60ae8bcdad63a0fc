//! End-to-end reconciliation scenarios
//!
//! Drives the bridge through its loop callbacks with an in-memory cloud and
//! radio, then checks what it published and what it wrote to the cloud.

use std::time::Duration;
use trv_bridge::cloud::{CloudDevice, CloudError};
use trv_bridge::radio::{RadioCommand, RadioError};
use trv_bridge::testing::{test_bridge_config, CloudWrite, MockCloud, MockRadio};
use trv_bridge::transport::{InboundMessage, LoopHandler, Outbox};
use trv_bridge::{BridgeError, TrvBridge};

type TestBridge = TrvBridge<MockCloud, MockRadio>;

const LOUNGE: (&str, u32, u64, f64) = ("lounge", 8220, 4411, 0.0);
const BEDROOM: (&str, u32, u64, f64) = ("bedroom", 7746, 4412, 0.0);

fn bridge_with(trvs: &[(&str, u32, u64, f64)], cloud: MockCloud) -> TestBridge {
    TrvBridge::new(&test_bridge_config(trvs), cloud, MockRadio::new()).unwrap()
}

fn last_payload(outbox: &Outbox, topic: &str) -> Option<String> {
    outbox
        .iter()
        .filter(|m| m.topic == topic)
        .last()
        .map(|m| m.payload.clone())
}

async fn send(bridge: &mut TestBridge, outbox: &mut Outbox, topic: &str, payload: &str) {
    bridge
        .on_message(InboundMessage::new(topic.to_string(), payload.to_string()), outbox)
        .await
        .unwrap();
}

async fn report(bridge: &mut TestBridge, outbox: &mut Outbox, radio_id: u32, temperature: f64) {
    bridge.radio_mut().push_reading(radio_id, temperature);
    bridge.on_tick(outbox).await.unwrap();
}

#[tokio::test]
async fn test_first_reading_bootstraps_from_cloud_target() {
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    let mut bridge = bridge_with(&[LOUNGE], cloud);
    let mut outbox = Outbox::new();

    bridge.start(&mut outbox).await;
    assert_eq!(last_payload(&outbox, "home/lounge/trv/state").as_deref(), Some("Off"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("off"));
    outbox.take_all();

    report(&mut bridge, &mut outbox, 8220, 18.0).await;

    let record = bridge.registry().get("lounge").unwrap();
    assert_eq!(record.cloud_reference, Some(20.0));
    assert_eq!(record.local_target, Some(19.0));

    assert_eq!(last_payload(&outbox, "home/lounge/trv/current").as_deref(), Some("18"));
    assert_eq!(last_payload(&outbox, "home/lounge/trv/state").as_deref(), Some("Heat"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("on"));
    // The cloud already agrees with the demand
    assert!(bridge.cloud_api().writes().await.is_empty());
}

#[tokio::test]
async fn test_local_set_nudges_cloud_across_the_reading() {
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    let mut bridge = bridge_with(&[LOUNGE], cloud);
    let mut outbox = Outbox::new();
    bridge.start(&mut outbox).await;
    report(&mut bridge, &mut outbox, 8220, 18.0).await;
    outbox.take_all();

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "21").await;
    assert_eq!(bridge.cloud_api().target_writes().await, vec![(4411, 22.0)]);
    assert_eq!(last_payload(&outbox, "home/lounge/trv/target").as_deref(), Some("21"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("on"));
    outbox.take_all();

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "16").await;
    assert_eq!(
        bridge.cloud_api().target_writes().await,
        vec![(4411, 22.0), (4411, 15.0)]
    );
    assert_eq!(last_payload(&outbox, "home/lounge/trv/state").as_deref(), Some("Off"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("off"));
    assert_eq!(bridge.cloud_api().device_target(4411).await, Some(15.0));
}

#[tokio::test]
async fn test_set_equal_to_reading_nudges_up_then_down() {
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    let mut bridge = bridge_with(&[LOUNGE], cloud);
    let mut outbox = Outbox::new();
    bridge.start(&mut outbox).await;
    report(&mut bridge, &mut outbox, 8220, 18.0).await;
    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "21").await;
    bridge.cloud_api().clear_writes().await;
    outbox.take_all();

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "18").await;

    // The set pushes up, then the pass sees a room at target and drops it
    assert_eq!(
        bridge.cloud_api().target_writes().await,
        vec![(4411, 19.0), (4411, 17.0)]
    );
    assert_eq!(bridge.cloud_api().device_target(4411).await, Some(17.0));
    assert_eq!(bridge.registry().get("lounge").unwrap().cloud_reference, Some(17.0));
    assert_eq!(last_payload(&outbox, "home/lounge/trv/target").as_deref(), Some("18"));
    assert_eq!(last_payload(&outbox, "home/lounge/trv/state").as_deref(), Some("Off"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("off"));
}

#[tokio::test]
async fn test_set_before_any_reading_leaves_cloud_alone() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "21").await;

    assert!(bridge.cloud_api().writes().await.is_empty());
    assert_eq!(bridge.registry().get("lounge").unwrap().local_target, Some(21.0));
    // No reading counts as warm enough
    assert_eq!(last_payload(&outbox, "home/lounge/trv/state").as_deref(), Some("Off"));
}

#[tokio::test]
async fn test_offset_applies_to_cloud_values() {
    let mut bridge = bridge_with(&[("nursery", 7746, 183449, 2.0)], MockCloud::new());
    let mut outbox = Outbox::new();

    report(&mut bridge, &mut outbox, 7746, 20.0).await;
    send(&mut bridge, &mut outbox, "home/nursery/trv/set", "22.5").await;

    // floor(22.5 - 2) + margin
    assert_eq!(bridge.cloud_api().target_writes().await, vec![(183449, 21.0)]);
    assert_eq!(last_payload(&outbox, "home/nursery/trv/target").as_deref(), Some("22.5"));
}

#[tokio::test(start_paused = true)]
async fn test_external_cloud_edit_is_adopted() {
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    let mut bridge = bridge_with(&[LOUNGE], cloud);
    let mut outbox = Outbox::new();
    bridge.start(&mut outbox).await;
    report(&mut bridge, &mut outbox, 8220, 18.0).await;
    outbox.take_all();

    bridge.cloud_api().set_device_target(4411, 23.0).await;
    tokio::time::advance(Duration::from_secs(31)).await;
    bridge.on_tick(&mut outbox).await.unwrap();

    let record = bridge.registry().get("lounge").unwrap();
    assert_eq!(record.local_target, Some(23.0));
    assert_eq!(last_payload(&outbox, "home/lounge/trv/target").as_deref(), Some("23"));
    assert_eq!(bridge.cloud_api().target_writes().await, vec![(4411, 24.0)]);

    // Our own write is not mistaken for another edit
    outbox.take_all();
    tokio::time::advance(Duration::from_secs(31)).await;
    bridge.on_tick(&mut outbox).await.unwrap();
    assert_eq!(bridge.registry().get("lounge").unwrap().local_target, Some(23.0));
    assert_eq!(bridge.cloud_api().target_writes().await.len(), 1);
}

#[tokio::test]
async fn test_failed_cloud_write_is_retried() {
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    let mut bridge = bridge_with(&[LOUNGE], cloud);
    let mut outbox = Outbox::new();
    bridge.start(&mut outbox).await;
    report(&mut bridge, &mut outbox, 8220, 18.0).await;

    bridge.cloud_api().fail_next_write(CloudError::Timeout).await;
    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "21").await;

    assert_eq!(
        bridge.cloud_api().target_writes().await,
        vec![(4411, 22.0), (4411, 22.0)]
    );
    assert_eq!(bridge.cloud_api().device_target(4411).await, Some(22.0));
    assert_eq!(
        bridge.registry().get("lounge").unwrap().cloud_reference,
        Some(22.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cloud_outage_is_retried_on_schedule() {
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    cloud.fail_list(CloudError::Http {
        status: 503,
        body: "Service Unavailable".to_string(),
    })
    .await;
    let mut bridge = bridge_with(&[LOUNGE], cloud);
    let mut outbox = Outbox::new();

    bridge.start(&mut outbox).await;
    assert_eq!(bridge.cloud_api().list_calls(), 1);

    bridge.on_tick(&mut outbox).await.unwrap();
    assert_eq!(bridge.cloud_api().list_calls(), 1);

    tokio::time::advance(Duration::from_secs(30)).await;
    bridge.on_tick(&mut outbox).await.unwrap();
    assert_eq!(bridge.cloud_api().list_calls(), 2);
    assert_eq!(
        bridge.registry().get("lounge").unwrap().cloud_target,
        Some(20.0)
    );
}

#[tokio::test]
async fn test_boiler_demand_aggregates_devices() {
    let mut bridge = bridge_with(&[LOUNGE, BEDROOM], MockCloud::new());
    let mut outbox = Outbox::new();

    report(&mut bridge, &mut outbox, 8220, 18.0).await;
    report(&mut bridge, &mut outbox, 7746, 19.0).await;
    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "21").await;
    send(&mut bridge, &mut outbox, "home/bedroom/trv/set", "16").await;

    assert_eq!(last_payload(&outbox, "home/lounge/trv/state").as_deref(), Some("Heat"));
    assert_eq!(last_payload(&outbox, "home/bedroom/trv/state").as_deref(), Some("Off"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("on"));

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "17").await;
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("off"));

    let demand = outbox
        .iter()
        .find(|m| m.topic == "home/nest/call_for_heat")
        .unwrap();
    assert!(!demand.retain);
    let state = outbox
        .iter()
        .find(|m| m.topic == "home/lounge/trv/state")
        .unwrap();
    assert!(state.retain);
}

#[tokio::test]
async fn test_unchanged_reading_does_not_republish_state() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    report(&mut bridge, &mut outbox, 8220, 18.0).await;
    outbox.take_all();
    report(&mut bridge, &mut outbox, 8220, 18.0).await;

    assert_eq!(last_payload(&outbox, "home/lounge/trv/current").as_deref(), Some("18"));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat"), None);
}

#[tokio::test]
async fn test_reading_from_unknown_valve_is_ignored() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();
    bridge.start(&mut outbox).await;
    outbox.take_all();

    report(&mut bridge, &mut outbox, 1, 18.0).await;

    assert!(outbox.is_empty());
    assert_eq!(bridge.registry().get("lounge").unwrap().ambient, None);
}

#[tokio::test]
async fn test_energenie_switch_reaches_radio() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    send(&mut bridge, &mut outbox, "home/energenie/6c6c6/1", "ON").await;
    send(&mut bridge, &mut outbox, "home/energenie/6c6c6/2", "off").await;

    assert_eq!(
        bridge.radio_mut().commands(),
        &[
            RadioCommand::Switch {
                house_code: 0x6c6c6,
                index: 1,
                on: true
            },
            RadioCommand::Switch {
                house_code: 0x6c6c6,
                index: 2,
                on: false
            },
        ]
    );
}

#[tokio::test]
async fn test_radio_failure_is_not_fatal() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();
    bridge.radio_mut().fail_commands(RadioError::Disconnected);

    send(&mut bridge, &mut outbox, "home/energenie/6c6c6/1", "ON").await;
    assert_eq!(bridge.radio_mut().commands().len(), 1);
}

#[tokio::test]
async fn test_set_forwarded_to_valve_when_enabled() {
    let mut config = test_bridge_config(&[LOUNGE]);
    config.reconcile.push_setpoint_to_valve = true;
    let mut bridge = TrvBridge::new(&config, MockCloud::new(), MockRadio::new()).unwrap();
    let mut outbox = Outbox::new();

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "21.5").await;

    assert_eq!(
        bridge.radio_mut().commands(),
        &[RadioCommand::SetSetpoint {
            radio_id: 8220,
            temperature: 21.5
        }]
    );
}

#[tokio::test]
async fn test_big_light_commands_go_to_cloud() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    send(&mut bridge, &mut outbox, "home/biglight/5000/switch", "ON").await;
    send(&mut bridge, &mut outbox, "home/biglight/5000/brightness", "40").await;
    send(&mut bridge, &mut outbox, "home/biglight/5000/switch", "OFF").await;

    assert_eq!(
        bridge.cloud_api().writes().await,
        vec![
            CloudWrite::PowerOn(5000),
            CloudWrite::Dimmer {
                cloud_id: 5000,
                level: 40
            },
            CloudWrite::PowerOff(5000),
        ]
    );
}

#[tokio::test]
async fn test_external_temperature_triggers_a_pass() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    send(&mut bridge, &mut outbox, "home/nest/temperature", "19.5").await;

    assert_eq!(bridge.external_temperature(), Some(19.5));
    assert_eq!(last_payload(&outbox, "home/nest/call_for_heat").as_deref(), Some("off"));
}

#[tokio::test]
async fn test_unparsable_payload_is_ignored() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    send(&mut bridge, &mut outbox, "home/lounge/trv/set", "warm").await;

    assert!(outbox.is_empty());
    assert_eq!(bridge.registry().get("lounge").unwrap().local_target, None);
}

#[tokio::test]
async fn test_unknown_discriminator_is_an_error() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    let result = bridge
        .on_message(
            InboundMessage::new("home/garage/trv/set", "20"),
            &mut outbox,
        )
        .await;

    assert!(matches!(result, Err(BridgeError::Route(_))));
}

#[tokio::test]
async fn test_connect_publishes_auto_constant() {
    let mut bridge = bridge_with(&[LOUNGE], MockCloud::new());
    let mut outbox = Outbox::new();

    bridge.on_connected(&mut outbox).await.unwrap();

    let message = outbox.iter().next().unwrap();
    assert_eq!(message.topic, "constants/auto");
    assert_eq!(message.payload, "Auto");
    assert!(message.retain);
}

#[test]
fn test_device_named_like_a_builtin_route_is_rejected() {
    let config = test_bridge_config(&[("nest", 1, 1, 0.0)]);
    assert!(TrvBridge::new(&config, MockCloud::new(), MockRadio::new()).is_err());
}

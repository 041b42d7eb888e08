mod common;

use std::sync::Weak;

use common::{conn_state, setup, Command, MockRadio};
use rpc_ble::{
    address::{AddrType, BdAddr},
    gap::{
        event::{
            AppResult, ConnState, GapCallback, GAP_MSG_LE_AUTHEN_STATE_CHANGE,
            GAP_MSG_LE_BOND_JUST_WORK, GAP_MSG_LE_BOND_OOB_INPUT,
            GAP_MSG_LE_BOND_USER_CONFIRMATION, GAP_MSG_LE_CONN_MTU_INFO,
            GAP_MSG_LE_CONN_PARAM_UPDATE, GAP_MSG_LE_CONN_STATE_CHANGE,
            GAP_MSG_LE_DEV_STATE_CHANGE,
        },
        link::LinkRecord,
        security::BondRequest,
        Authentication, GapConfig, Role,
    },
    peers::PeerDevice,
    radio::{BondKind, ConnParam, Confirmation},
    Ble, BleError,
};

fn peer_addr() -> BdAddr {
    "c0:ff:ee:00:11:22".parse().unwrap()
}

#[test]
fn init_hands_padded_name_to_radio_once() {
    let _ = env_logger::try_init();

    let radio = MockRadio::new();
    let ble = Ble::new(radio.clone());
    assert!(!ble.is_initialized());

    ble.init("MyBeacon").unwrap();
    ble.init("SomethingElse").unwrap();

    assert!(ble.is_initialized());
    assert_eq!(radio.count(|c| *c == Command::Init), 1);
    assert_eq!(radio.count(|c| *c == Command::Start), 1);

    let names: Vec<Vec<u8>> = radio
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::SetDeviceName(name) => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(names.len(), 1);
    assert_eq!(&names[0][..8], b"MyBeacon");
    assert!(names[0][8..].iter().all(|b| *b == 0));

    assert_eq!(ble.config().unwrap().name, "MyBeacon");
}

#[test]
fn engines_need_an_initialized_stack() {
    let ble = Ble::new(MockRadio::new());

    for err in [
        ble.scan().err(),
        ble.advertising().err(),
        ble.create_client().err(),
        ble.create_server().err(),
    ] {
        let err = err.unwrap();
        assert_eq!(err.downcast_ref::<BleError>(), Some(&BleError::NotInitialized));
    }
}

#[test]
fn max_links_is_capped_by_table_size() {
    let radio = MockRadio::new();
    let ble = Ble::new(radio.clone());
    ble.init_with_config(GapConfig {
        max_links: 64,
        ..Default::default()
    })
    .unwrap();

    assert_eq!(ble.config().unwrap().max_links, 4);
}

#[test]
fn central_connect_fills_record_and_disconnect_zeroes_it() {
    let (ble, radio) = setup();
    radio.set_link(1, peer_addr(), AddrType::Random);
    radio.set_param(ConnParam::TxPhy, 2);
    radio.set_param(ConnParam::RxPhy, 1);

    let sink = ble.event_sink();
    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(1, 2, 0));

    let link = ble.link(1).unwrap();
    assert_eq!(link.conn_state, ConnState::Connected);
    assert_eq!(link.bd_addr, peer_addr());
    assert_eq!(link.bd_addr_type, AddrType::Random);
    assert_eq!(link.tx_phy, 2);
    assert_eq!(link.rx_phy, 1);

    // connection timeout, not a normal termination
    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(1, 0, 0x0108));
    assert_eq!(ble.link(1).unwrap(), LinkRecord::default());
}

#[test]
fn failed_link_query_leaves_record_disconnected() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(1, 1, 0));
    assert_eq!(ble.link(1).unwrap().conn_state, ConnState::Connecting);

    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(1, 2, 0));
    assert_eq!(radio.count(|c| *c == Command::ConnAddress(1)), 1);
    assert_eq!(ble.link(1).unwrap(), LinkRecord::default());

    // a later report with the details available fills the record
    radio.set_link(1, peer_addr(), AddrType::Public);
    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(1, 2, 0));
    assert_eq!(ble.link(1).unwrap().conn_state, ConnState::Connected);
    assert_eq!(ble.link(1).unwrap().bd_addr, peer_addr());
}

#[test]
fn out_of_range_conn_ids_are_ignored() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    for conn_id in [4u8, 0x10, 0xff] {
        sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(conn_id, 2, 0));
        sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(conn_id, 0, 0x0113));
        assert!(ble.link(conn_id).is_err());
    }

    assert_eq!(radio.count(|c| matches!(c, Command::ConnAddress(_))), 0);
    for conn_id in 0..4 {
        assert_eq!(ble.link(conn_id).unwrap(), LinkRecord::default());
    }
}

#[test]
fn intermediate_states_only_update_the_state() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(2, 1, 0));
    assert_eq!(ble.link(2).unwrap().conn_state, ConnState::Connecting);
    assert!(ble.link(2).unwrap().bd_addr.is_zero());
    assert!(radio.commands().is_empty());
}

#[test]
fn unknown_and_truncated_messages_are_dropped() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    sink.handle_gap_message(0x7f, &[1, 2, 3, 4]);
    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &[1, 2]);
    sink.handle_gap_message(GAP_MSG_LE_CONN_MTU_INFO, &[]);
    sink.handle_gap_message(GAP_MSG_LE_BOND_JUST_WORK, &[]);

    assert!(radio.commands().is_empty());
    assert_eq!(ble.link(1).unwrap(), LinkRecord::default());
}

#[test]
fn stack_ready_edge_reads_local_address_once() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    sink.handle_gap_message(GAP_MSG_LE_DEV_STATE_CHANGE, &[0x01, 0, 0, 0]);
    sink.handle_gap_message(GAP_MSG_LE_DEV_STATE_CHANGE, &[0x01, 0, 0, 0]);

    assert_eq!(radio.count(|c| *c == Command::LocalAddress), 1);
}

#[test]
fn repeated_param_update_status_queries_parameters_once() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    sink.handle_gap_message(GAP_MSG_LE_CONN_PARAM_UPDATE, &[0, 0, 0, 0]);
    sink.handle_gap_message(GAP_MSG_LE_CONN_PARAM_UPDATE, &[0, 0, 0, 0]);
    assert_eq!(
        radio.count(|c| *c == Command::ConnParam(0, ConnParam::Interval)),
        1
    );

    // pending then success again is a new edge
    sink.handle_gap_message(GAP_MSG_LE_CONN_PARAM_UPDATE, &[0, 2, 0, 0]);
    sink.handle_gap_message(GAP_MSG_LE_CONN_PARAM_UPDATE, &[0, 0, 0, 0]);
    assert_eq!(
        radio.count(|c| *c == Command::ConnParam(0, ConnParam::Interval)),
        2
    );
}

#[test]
fn mtu_exchange_updates_registered_peer() {
    let (ble, _radio) = setup();
    ble.add_peer_device(PeerDevice::Client(Weak::new()), 1)
        .unwrap();

    let mtu = 247u16.to_le_bytes();
    ble.event_sink()
        .handle_gap_message(GAP_MSG_LE_CONN_MTU_INFO, &[1, 0, mtu[0], mtu[1]]);

    let peers = ble.peer_devices(true).unwrap();
    assert_eq!(peers[&1].mtu, 247);
    assert!(peers[&1].connected);
}

#[test]
fn authentication_outcome_is_tracked_per_connection() {
    let (ble, _radio) = setup();
    let sink = ble.event_sink();

    assert_eq!(ble.authentication_state(0).unwrap(), None);

    sink.handle_gap_message(GAP_MSG_LE_AUTHEN_STATE_CHANGE, &[0, 1, 0, 0]);
    assert_eq!(
        ble.authentication_state(0).unwrap(),
        Some(Authentication::Started)
    );

    sink.handle_gap_message(GAP_MSG_LE_AUTHEN_STATE_CHANGE, &[0, 2, 0, 0]);
    assert_eq!(
        ble.authentication_state(0).unwrap(),
        Some(Authentication::Succeeded)
    );

    sink.handle_gap_message(GAP_MSG_LE_AUTHEN_STATE_CHANGE, &[1, 2, 0x05, 0x00]);
    assert_eq!(
        ble.authentication_state(1).unwrap(),
        Some(Authentication::Failed(5))
    );

    // disconnect forgets the outcome
    sink.handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(0, 0, 0x0113));
    assert_eq!(ble.authentication_state(0).unwrap(), None);
}

#[test]
fn default_policy_accepts_just_works_and_oob() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();

    sink.handle_gap_message(GAP_MSG_LE_BOND_JUST_WORK, &[2]);
    sink.handle_gap_message(GAP_MSG_LE_BOND_OOB_INPUT, &[3]);

    assert_eq!(
        radio.commands(),
        vec![
            Command::BondConfirm(2, BondKind::JustWorks, Confirmation::Accept),
            Command::SetBondOobData([0; 16]),
            Command::BondConfirm(3, BondKind::OobInput, Confirmation::Accept),
        ]
    );
}

#[test]
fn security_policy_sees_passkey_and_can_reject() {
    let (ble, radio) = setup();
    ble.set_security_policy(|request: &BondRequest| {
        if request.passkey == Some(123456) {
            Confirmation::Reject
        } else {
            Confirmation::Accept
        }
    })
    .unwrap();

    ble.event_sink()
        .handle_gap_message(GAP_MSG_LE_BOND_USER_CONFIRMATION, &[1]);

    assert_eq!(
        radio.commands(),
        vec![
            Command::BondDisplayKey(1),
            Command::BondConfirm(1, BondKind::UserConfirmation, Confirmation::Reject),
        ]
    );
}

#[test]
fn only_connection_update_requests_are_accepted() {
    let (ble, _radio) = setup();
    let sink = ble.event_sink();

    assert_eq!(
        sink.gap_callback(GapCallback::ConnUpdateInd {
            conn_id: 0,
            conn_interval_min: 0x18,
            conn_interval_max: 0x28,
            conn_latency: 0,
            supervision_timeout: 0x1f4,
        }),
        AppResult::Accept
    );
    assert_eq!(
        sink.gap_callback(GapCallback::PhyUpdate {
            conn_id: 0,
            cause: 0,
            tx_phy: 2,
            rx_phy: 2,
        }),
        AppResult::Success
    );
    assert_eq!(sink.gap_callback(GapCallback::Other(0x42)), AppResult::Success);
}

#[test]
fn sink_outliving_context_is_harmless() {
    let (ble, radio) = setup();
    let sink = ble.event_sink();
    drop(ble);

    sink.handle_gap_message(GAP_MSG_LE_BOND_JUST_WORK, &[0]);
    assert_eq!(
        sink.gap_callback(GapCallback::ConnUpdateInd {
            conn_id: 0,
            conn_interval_min: 0,
            conn_interval_max: 0,
            conn_latency: 0,
            supervision_timeout: 0,
        }),
        AppResult::Success
    );
    assert!(radio.commands().is_empty());
}

#[test]
fn server_creation_switches_role() {
    let (ble, _radio) = setup();
    assert_eq!(ble.role().unwrap(), Role::Central);

    ble.create_server().unwrap();
    assert_eq!(ble.role().unwrap(), Role::Peripheral);

    ble.scan().unwrap();
    assert_eq!(ble.role().unwrap(), Role::Central);
}

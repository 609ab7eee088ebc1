//! End-to-end tests driving a [`Port`] against a real TCP loopback
//! connection to [`support::mock_gateway::MockGateway`], a minimal but wire-
//! accurate fake gateway. These exercise the call sequences `drvVxi11.c`'s
//! `vxiConnectPort`/`vxiRead`/`vxiWrite`/`vxiBusStatus`/`vxiSerialPoll` issue,
//! not just the XDR encode/decode of any one message.

mod support;

use std::time::Duration;

use tokio::sync::mpsc;

use vxi11_core::{
    codes::proc_num,
    device_io::DeviceIo,
    error::{Error, VxiErrorCode},
    gpib::GpibControl,
    link::GpibAddr,
    observer::NullObserver,
    port::Port,
};

use support::mock_gateway::{self, expect, MockGateway};

/// A multi-device gateway name (`"gpib0"` doesn't match the `inst` prefix),
/// so each GPIB address opens its own device link rather than aliasing to
/// the server link.
fn make_port(gateway: &MockGateway, recover_with_ifc: bool) -> Port {
    make_port_named(gateway, "gpib0", recover_with_ifc)
}

fn make_port_named(gateway: &MockGateway, vxi_name: &str, recover_with_ifc: bool) -> Port {
    Port::new(gateway.addr, vxi_name.to_string(), 5.0, recover_with_ifc, Box::new(NullObserver))
}

#[tokio::test]
async fn connect_and_disconnect_port_happy_path() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::CREATE_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_ENABLE_SRQ, mock_gateway::empty_reply()),
        expect(proc_num::DESTROY_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DESTROY_LINK, mock_gateway::empty_reply()),
    ])
    .await;

    let mut port = make_port(&gateway, false);
    let (tx, _rx) = mpsc::unbounded_channel();

    port.connect_port(tx).await.expect("connect_port should succeed");
    assert!(port.is_connected());
    assert_eq!(port.ctrl_addr(), Some(9));

    port.disconnect_port().await.expect("disconnect_port should succeed");
    assert!(!port.is_connected());
}

#[tokio::test]
async fn connect_port_rejects_when_not_controller() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(0)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(0)),
    ])
    .await;

    let mut port = make_port(&gateway, false);
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = port.connect_port(tx).await.expect_err("should reject a non-controller host");
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(!port.is_connected());
}

#[tokio::test]
async fn write_then_read_round_trip() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::CREATE_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_ENABLE_SRQ, mock_gateway::empty_reply()),
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(2, 0, 1024)),
        expect(proc_num::DEVICE_WRITE, mock_gateway::device_write_reply(5)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::docmd_empty_reply()),
        expect(
            proc_num::DEVICE_READ,
            mock_gateway::device_read_reply(vxi11_core::codes::VXI_ENDR, b"reply"),
        ),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::docmd_empty_reply()),
    ])
    .await;

    let mut port = make_port(&gateway, false);
    let (tx, _rx) = mpsc::unbounded_channel();
    port.connect_port(tx).await.expect("connect_port");

    let addr = GpibAddr::Primary(5);
    port.connect(addr).await.expect("connect device link");

    let written = port.write(addr, b"hello").await.expect("write");
    assert_eq!(written, 5);

    let (data, eom_reason) = port.read(addr, 64).await.expect("read");
    assert_eq!(data, b"reply");
    assert_ne!(eom_reason & vxi11_core::codes::EOMEND, 0);
}

#[tokio::test]
async fn read_timeout_recovers_with_ifc() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::CREATE_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_ENABLE_SRQ, mock_gateway::empty_reply()),
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(2, 0, 1024)),
        expect(
            proc_num::DEVICE_READ,
            mock_gateway::device_read_reply_error(vxi11_core::codes::vxi_error::VXI_IOTIMEOUT, 0, &[]),
        ),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::docmd_empty_reply()), // ifc()
        expect(proc_num::DEVICE_DOCMD, mock_gateway::docmd_empty_reply()), // untalk/unlisten trailer
    ])
    .await;

    let mut port = make_port(&gateway, true);
    let (tx, _rx) = mpsc::unbounded_channel();
    port.connect_port(tx).await.expect("connect_port");

    let addr = GpibAddr::Primary(5);
    port.connect(addr).await.expect("connect device link");

    let err = port.read(addr, 64).await.expect_err("read should time out");
    assert!(matches!(err, Error::Vxi(VxiErrorCode::IoTimeout)));
}

#[tokio::test]
async fn bus_status_all_packs_selector_as_bit_index() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::CREATE_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_ENABLE_SRQ, mock_gateway::empty_reply()),
        // REN, SRQ, NDAC, SYSTEM_CONTROLLER, CONTROLLER_IN_CHARGE, TALKER, LISTENER
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(0)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(0)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(0)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
    ])
    .await;

    let mut port = make_port(&gateway, false);
    let (tx, _rx) = mpsc::unbounded_channel();
    port.connect_port(tx).await.expect("connect_port");

    let status = port.bus_status_all().await.expect("bus_status_all");
    // REN(1) + NDAC(3) + CONTROLLER_IN_CHARGE(5) + LISTENER(7)
    let expected = (1 << 1) | (1 << 3) | (1 << 5) | (1 << 7);
    assert_eq!(status, expected);
}

#[tokio::test]
async fn serial_poll_sends_unwedge_workaround_on_timeout() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::CREATE_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_ENABLE_SRQ, mock_gateway::empty_reply()),
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(3, 0, 1024)),
        expect(
            proc_num::DEVICE_READSTB,
            mock_gateway::error_reply(vxi11_core::codes::vxi_error::VXI_IOTIMEOUT),
        ),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::docmd_empty_reply()),
    ])
    .await;

    let mut port = make_port(&gateway, false);
    let (tx, _rx) = mpsc::unbounded_channel();
    port.connect_port(tx).await.expect("connect_port");

    let addr = GpibAddr::Primary(7);
    let err = port
        .serial_poll(addr, Duration::from_secs(1))
        .await
        .expect_err("serial_poll should fail, not merely time out");
    assert!(matches!(err, Error::SerialPollFailed(VxiErrorCode::IoTimeout)));
}

/// A `vxi_name` starting with `inst` makes every GPIB address alias to the
/// server link: no second `CREATE_LINK` for `Primary(5)`, and a write works
/// right away since the address is already implicitly connected through the
/// server link `connect_port` opened.
#[tokio::test]
async fn single_link_port_aliases_every_address_to_the_server_link() {
    let gateway = MockGateway::start(vec![
        expect(proc_num::CREATE_LINK, mock_gateway::create_link_reply(1, 0, 1024)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(9)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::bus_status_reply(1)),
        expect(proc_num::CREATE_INTR_CHAN, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_ENABLE_SRQ, mock_gateway::empty_reply()),
        expect(proc_num::DEVICE_WRITE, mock_gateway::device_write_reply(5)),
        expect(proc_num::DEVICE_DOCMD, mock_gateway::docmd_empty_reply()),
    ])
    .await;

    let mut port = make_port_named(&gateway, "inst0", false);
    let (tx, _rx) = mpsc::unbounded_channel();
    port.connect_port(tx).await.expect("connect_port");

    // No explicit connect(addr): the server link already serves every
    // address on a single-link port, so the aliased address is already
    // marked connected.
    let addr = GpibAddr::Primary(5);
    let written = port.write(addr, b"hello").await.expect("write should use the aliased server link");
    assert_eq!(written, 5);

    let err = port.connect(addr).await.expect_err("addr already aliases a connected link");
    assert!(matches!(err, Error::Unsupported(_)));
}

//! Tests requiring an actual serial port.
//!
//! # Running Hardware Tests
//!
//! ```bash
//! export SERIAL_LINK_TEST_PORT=/dev/ttyUSB0   # or COM3 on Windows
//! export SERIAL_LINK_TEST_BAUD=115200         # optional, default: 9600
//! export SERIAL_LINK_TEST_LOOPBACK=1          # if TX and RX are connected
//!
//! cargo test --features hardware-tests -- --ignored --test-threads=1
//! ```

use crate::hardware::utils::{read_until, skip_without_hardware};
use serial_link::port::{LinkState, PortEvent};
use std::time::{Duration, Instant};

#[test]
#[ignore]
fn test_real_port_open_close() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let mut transport = test.transport();
    let events = transport.subscribe();

    transport.open().expect("open failed");
    assert_eq!(transport.state(), LinkState::Open);
    assert_eq!(events.recv().unwrap(), PortEvent::Opened);

    transport.close().expect("close failed");
    assert_eq!(transport.state(), LinkState::Closed);
    assert_eq!(events.recv().unwrap(), PortEvent::Closed);
}

#[test]
#[ignore]
fn test_real_port_is_exclusive() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let mut first = test.transport();
    let mut second = test.transport();
    first.open().expect("open failed");

    // TIOCEXCL does not bind root on POSIX.
    assert!(second.open().is_err(), "second open of {} succeeded", test.port_name);
}

#[test]
#[ignore]
fn test_real_port_close_is_prompt() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let mut transport = test.transport();
    transport.open().expect("open failed");

    let started = Instant::now();
    transport.close().expect("close failed");
    // Bounded by one watch interval plus teardown.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
#[ignore]
fn test_real_port_reconfigure_while_open() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let mut transport = test.transport();
    transport.open().expect("open failed");

    for baud in [9600, 57600, 115200, test.baud] {
        assert_eq!(transport.set_baud(baud), baud);
        assert!(transport.is_open());
    }
}

#[test]
#[ignore]
fn test_real_port_loopback() {
    let Some(test) = skip_without_hardware() else {
        return;
    };
    if !test.loopback {
        println!("Skipping loopback test: SERIAL_LINK_TEST_LOOPBACK not set to 1");
        return;
    }

    let mut transport = test.transport();
    let events = transport.subscribe();
    transport.open().expect("open failed");

    let payload = b"LOOPBACK TEST\r\n";
    let mut rest = &payload[..];
    while !rest.is_empty() {
        let n = transport.write(rest).expect("write failed");
        rest = &rest[n..];
    }

    let echoed = read_until(&mut transport, &events, payload.len(), Duration::from_secs(2));
    assert_eq!(echoed, payload);
}

//! Transport lifecycle, transfer and notification tests against the mock backend.

mod common;

use common::{drain, expect_event, expect_quiet, mock_transport, CapturedOutput, MOCK_PORT};
use serial_link::port::{
    FlowControl, LinkState, MockBackend, Parity, PortConfig, PortError, PortEvent,
};
use std::io;

fn line(baud: u32, bits: u8, parity: Parity, flow: FlowControl) -> PortConfig {
    PortConfig::default().with(baud, bits, parity, flow)
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_open_emits_opened_and_applies_config() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        let wanted = line(115200, 8, Parity::Even, FlowControl::Hardware);
        transport.configure(wanted);

        transport.open().unwrap();

        assert_eq!(expect_event(&events), PortEvent::Opened);
        assert_eq!(transport.state(), LinkState::Open);
        assert!(transport.is_open());
        assert_eq!(mock.applied_configs(), vec![wanted]);
        assert_eq!(mock.device_config(), wanted);
        assert_eq!(mock.flush_count(), 1);
    }

    #[test]
    fn test_close_restores_prior_device_settings() {
        let prior = line(4800, 7, Parity::Odd, FlowControl::Software);
        let mock = MockBackend::with_device_config(prior);
        let mut transport = mock_transport(&mock);
        transport.configure(line(57600, 8, Parity::None, FlowControl::None));

        transport.open().unwrap();
        assert_ne!(mock.device_config(), prior);

        transport.close().unwrap();
        assert_eq!(mock.device_config(), prior);
        assert_eq!(mock.restored_configs(), vec![prior]);
        assert!(!mock.is_device_open());
        assert_eq!(transport.state(), LinkState::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();

        transport.open().unwrap();
        transport.close().unwrap();
        transport.close().unwrap();

        assert_eq!(expect_event(&events), PortEvent::Opened);
        assert_eq!(expect_event(&events), PortEvent::Closed);
        expect_quiet(&events);
        assert_eq!(mock.release_count(), 1);
    }

    #[test]
    fn test_close_on_never_opened_transport_raises_nothing() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();

        assert!(transport.close().is_ok());
        expect_quiet(&events);
        assert_eq!(mock.release_count(), 0);
    }

    #[test]
    fn test_reopen_closes_previous_session_first() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();

        transport.open().unwrap();
        transport.open().unwrap();

        assert_eq!(
            drain(&events),
            vec![PortEvent::Opened, PortEvent::Closed, PortEvent::Opened]
        );
        assert_eq!(mock.acquire_count(), 2);
        assert_eq!(mock.release_count(), 1);
        assert!(transport.is_open());
    }

    #[test]
    fn test_configuration_failure_releases_handle() {
        let mock = MockBackend::new();
        mock.fail_configure(true);
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();

        let err = transport.open().unwrap_err();

        assert!(matches!(err, PortError::ConfigurationFailed { ref port, .. } if port == MOCK_PORT));
        assert!(!transport.is_open());
        assert_eq!(transport.state(), LinkState::Closed);
        assert!(!mock.is_device_open());
        assert_eq!(mock.release_count(), 1);
        expect_quiet(&events);
    }

    #[test]
    fn test_busy_device_is_an_acquisition_failure() {
        let mock = MockBackend::new();
        let mut first = mock_transport(&mock);
        let mut second = mock_transport(&mock);

        first.open().unwrap();
        let err = second.open().unwrap_err();

        assert_eq!(err.io_kind(), Some(io::ErrorKind::ResourceBusy));
        assert!(first.is_open());
        assert!(!second.is_open());
    }

    #[test]
    fn test_missing_device_keeps_os_error_kind() {
        let mock = MockBackend::new();
        mock.fail_acquire(io::ErrorKind::NotFound);
        let mut transport = mock_transport(&mock);

        let err = transport.open().unwrap_err();
        assert!(matches!(err, PortError::AcquisitionFailed { .. }));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn test_drop_closes_port() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        assert_eq!(expect_event(&events), PortEvent::Opened);

        drop(transport);

        assert_eq!(expect_event(&events), PortEvent::Closed);
        assert!(!mock.is_device_open());
        assert_eq!(mock.release_count(), 1);
    }

    #[test]
    fn test_port_cannot_change_while_open() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        transport.open().unwrap();

        assert_eq!(transport.set_port("/dev/ttyUSB9"), MOCK_PORT);
        assert_eq!(transport.port(), MOCK_PORT);

        transport.close().unwrap();
        assert_eq!(transport.set_port("/dev/ttyUSB9"), "/dev/ttyUSB9");
    }
}

// ============================================================================
// Configuration
// ============================================================================

mod configuration_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_invalid_values_keep_previous_setting() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);

        assert_eq!(transport.set_data_bits(7), 7);
        assert_eq!(transport.set_data_bits(9), 7);
        assert_eq!(transport.set_data_bits(4), 7);
        assert_eq!(transport.set_baud(9600), 9600);
        assert_eq!(transport.set_baud(12345), 9600);
        assert_eq!(transport.set_parity_code(2), Parity::Even);
        assert_eq!(transport.set_parity_code(7), Parity::Even);
        assert_eq!(transport.set_flow_control_code(1), FlowControl::Hardware);
        assert_eq!(transport.set_flow_control_code(3), FlowControl::Hardware);
    }

    #[test]
    fn test_settings_survive_close_and_reopen() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        transport.set_baud(38400);
        transport.set_parity(Parity::Odd);

        transport.open().unwrap();
        transport.close().unwrap();
        transport.open().unwrap();

        let applied = mock.applied_configs();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0], applied[1]);
        assert_eq!(applied[1].baud(), 38400);
        assert_eq!(applied[1].parity(), Parity::Odd);
    }

    #[test]
    fn test_change_while_open_reaches_device() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        transport.open().unwrap();

        transport.set_baud(57600);
        transport.set_flow_control(FlowControl::Software);

        let device = mock.device_config();
        assert_eq!(device.baud(), 57600);
        assert_eq!(device.flow_control(), FlowControl::Software);
        assert_eq!(mock.applied_configs().len(), 3);
    }

    #[test]
    fn test_rejected_reapply_keeps_port_open() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        assert_eq!(expect_event(&events), PortEvent::Opened);

        mock.fail_configure(true);
        assert_eq!(transport.set_baud(9600), 9600);

        assert!(transport.is_open());
        assert_eq!(transport.baud(), 9600);
        expect_quiet(&events);
    }

    #[test]
    fn test_change_while_closed_touches_nothing() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);

        transport.set_baud(115200);
        transport.set_data_bits(6);

        assert!(mock.applied_configs().is_empty());
        assert_eq!(mock.acquire_count(), 0);
    }
}

// ============================================================================
// Transfers
// ============================================================================

mod transfer_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_not_open_guard() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);

        assert!(matches!(transport.write(b"AT\r"), Err(PortError::NotOpen)));
        assert!(matches!(transport.read(8), Err(PortError::NotOpen)));
        let mut buf = [0u8; 4];
        assert!(matches!(transport.read_into(&mut buf), Err(PortError::NotOpen)));
        assert!(mock.write_log().is_empty());
    }

    #[test]
    fn test_partial_write_is_returned_as_is() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        transport.open().unwrap();
        mock.limit_writes(Some(2));

        assert_eq!(transport.write(b"HELLO").unwrap(), 2);

        let mut rest: &[u8] = b"LLO";
        while !rest.is_empty() {
            let n = transport.write(rest).unwrap();
            rest = &rest[n..];
        }
        assert_eq!(
            mock.write_log(),
            vec![b"HE".to_vec(), b"LL".to_vec(), b"O".to_vec()]
        );
    }

    #[test]
    fn test_read_respects_requested_size() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        transport.open().unwrap();
        mock.enqueue_read(b"0123456789");

        assert_eq!(transport.read(4).unwrap(), b"0123");
        assert_eq!(transport.read(64).unwrap(), b"456789");
    }

    #[test]
    fn test_stale_input_is_flushed_on_open() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        mock.enqueue_read(b"garbage");

        transport.open().unwrap();

        assert_eq!(mock.available_bytes(), 0);
    }

    #[test]
    fn test_write_fault_emits_error_then_closed() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        assert_eq!(expect_event(&events), PortEvent::Opened);
        mock.fail_next_write(io::ErrorKind::BrokenPipe);

        let err = transport.write(b"AT\r").unwrap_err();

        assert!(matches!(err, PortError::IoFault(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert_eq!(drain(&events), vec![PortEvent::Error, PortEvent::Closed]);
        assert!(!transport.is_open());
        assert_eq!(transport.state(), LinkState::Closed);
        assert!(!mock.is_device_open());
        assert!(matches!(transport.write(b"AT\r"), Err(PortError::NotOpen)));
    }

    #[test]
    fn test_read_fault_emits_error_then_closed() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        assert_eq!(expect_event(&events), PortEvent::Opened);
        mock.fail_next_read(io::ErrorKind::TimedOut);

        assert!(matches!(transport.read(16), Err(PortError::IoFault(_))));
        assert_eq!(drain(&events), vec![PortEvent::Error, PortEvent::Closed]);
        assert_eq!(mock.release_count(), 1);
    }
}

// ============================================================================
// Watcher notifications
// ============================================================================

mod watcher_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_one_data_ready_per_readiness_event() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        assert_eq!(expect_event(&events), PortEvent::Opened);

        for chunk in [&b"first"[..], b"second", b"third"] {
            mock.receive(chunk);
            assert_eq!(expect_event(&events), PortEvent::DataReady);
            assert_eq!(transport.read(64).unwrap(), chunk);
        }
        expect_quiet(&events);
    }

    #[test]
    fn test_no_data_ready_after_close() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        transport.close().unwrap();
        assert_eq!(drain(&events), vec![PortEvent::Opened, PortEvent::Closed]);

        mock.inject_readiness();

        expect_quiet(&events);
        assert_eq!(mock.pending_readiness(), 1);
    }

    #[test]
    fn test_each_readiness_event_is_announced() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let events = transport.subscribe();
        transport.open().unwrap();
        assert_eq!(expect_event(&events), PortEvent::Opened);

        mock.receive(b"a");
        mock.receive(b"b");
        assert_eq!(expect_event(&events), PortEvent::DataReady);
        assert_eq!(expect_event(&events), PortEvent::DataReady);
        expect_quiet(&events);

        assert_eq!(transport.read(64).unwrap(), b"ab");
        expect_quiet(&events);
        assert_eq!(mock.pending_readiness(), 0);
    }

    #[test]
    fn test_nothing_follows_closed_while_readiness_keeps_arriving() {
        for _ in 0..20 {
            let mock = MockBackend::new();
            let mut transport = mock_transport(&mock);
            let events = transport.subscribe();
            transport.open().unwrap();

            let stop = Arc::new(AtomicBool::new(false));
            let injector = {
                let mock = mock.clone();
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        mock.inject_readiness();
                        thread::yield_now();
                    }
                })
            };

            thread::sleep(Duration::from_millis(5));
            transport.close().unwrap();
            thread::sleep(Duration::from_millis(20));
            stop.store(true, Ordering::Release);
            injector.join().unwrap();

            let seen = drain(&events);
            assert_eq!(seen.first(), Some(&PortEvent::Opened));
            assert_eq!(seen.last(), Some(&PortEvent::Closed));
            assert_eq!(seen.iter().filter(|e| **e == PortEvent::Closed).count(), 1);
            expect_quiet(&events);
        }
    }

    #[test]
    fn test_every_subscriber_sees_every_event() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let first = transport.subscribe();
        let second = transport.subscribe();

        transport.open().unwrap();
        mock.receive(b"x");
        assert_eq!(expect_event(&first), PortEvent::Opened);
        assert_eq!(expect_event(&first), PortEvent::DataReady);
        assert_eq!(expect_event(&second), PortEvent::Opened);
        assert_eq!(expect_event(&second), PortEvent::DataReady);
    }

    #[test]
    fn test_dropped_subscriber_does_not_block_others() {
        let mock = MockBackend::new();
        let mut transport = mock_transport(&mock);
        let kept = transport.subscribe();
        drop(transport.subscribe());

        transport.open().unwrap();
        transport.close().unwrap();

        assert_eq!(drain(&kept), vec![PortEvent::Opened, PortEvent::Closed]);
    }
}

// ============================================================================
// Debug echo
// ============================================================================

mod echo_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_debug_echo_formats_transfers() {
        let mock = MockBackend::new();
        let captured = CapturedOutput::new();
        let mut transport = mock_transport(&mock).with_diagnostic_sink(captured.sink());
        transport.set_debug(true);
        transport.open().unwrap();

        transport.write(b"AT\r").unwrap();
        mock.enqueue_read(&[0x4f, 0x4b, 0x0a]);
        transport.read(16).unwrap();

        assert_eq!(captured.lines(), vec!["Write: 41 54 0d", "Read: 4f 4b 0a"]);
    }

    #[test]
    fn test_echo_respects_partial_write_and_switch() {
        let mock = MockBackend::new();
        let captured = CapturedOutput::new();
        let mut transport = mock_transport(&mock).with_diagnostic_sink(captured.sink());
        transport.open().unwrap();

        transport.write(b"quiet").unwrap();
        assert!(captured.text().is_empty());

        transport.set_debug(true);
        mock.limit_writes(Some(1));
        transport.write(b"\xff\x00").unwrap();

        assert_eq!(captured.lines(), vec!["Write: ff"]);
    }

    #[test]
    fn test_empty_read_is_not_echoed() {
        let mock = MockBackend::new();
        let captured = CapturedOutput::new();
        let mut transport = mock_transport(&mock).with_diagnostic_sink(captured.sink());
        transport.set_debug(true);
        transport.open().unwrap();

        assert!(transport.read(8).unwrap().is_empty());
        assert!(captured.text().is_empty());
    }
}

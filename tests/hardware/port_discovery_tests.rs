//! Discovery checks against the ports actually present on this machine.

use crate::hardware::utils::skip_without_hardware;
use serial_link::port::enumerate;

#[test]
#[ignore] // Requires hardware
fn test_configured_port_is_enumerated() {
    let Some(test) = skip_without_hardware() else {
        return;
    };

    let ports = enumerate();
    println!("Enumerated {} port(s): {ports:?}", ports.len());

    let wanted = std::fs::canonicalize(&test.port_name)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or(test.port_name.clone());
    assert!(ports.contains(&wanted), "{wanted} missing from {ports:?}");
}

#[test]
#[ignore] // Requires hardware
fn test_enumeration_agrees_with_serialport() {
    let ports = enumerate();
    let reported = serialport::available_ports().unwrap_or_default();

    for info in reported
        .iter()
        .filter(|info| matches!(info.port_type, serialport::SerialPortType::UsbPort(_)))
    {
        let name = std::fs::canonicalize(&info.port_name)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or(info.port_name.clone());
        assert!(ports.contains(&name), "USB port {name} missing from {ports:?}");
    }
}

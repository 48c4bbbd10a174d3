use rcserial_core::error::DriverError;
use rcserial_core::protocol::{Communicator, CommunicatorSettings};
use rcserial_core::sim::SimulatedDevice;
use std::time::{Duration, Instant};

fn open(device: &SimulatedDevice, timeout_ms: u64) -> Communicator {
    let comm = Communicator::new(
        Box::new(device.connect("/dev/ttyACM0")),
        CommunicatorSettings {
            answer_timeout: Duration::from_millis(timeout_ms),
            warm_up: Duration::ZERO,
        },
    );
    comm.init_listener().unwrap();
    comm
}

#[test]
fn test_answer_timeout_is_not_early() {
    let device = SimulatedDevice::arduino_2wd();
    device.kill_verb("Voltage");
    let comm = open(&device, 300);

    let start = Instant::now();
    match comm.send_command("Voltage") {
        Err(DriverError::AnswerTimeout {
            command,
            timeout_ms,
        }) => {
            assert_eq!(command, "Voltage");
            assert_eq!(timeout_ms, 300);
        }
        other => panic!("Expected AnswerTimeout, got {:?}", other),
    }
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[test]
fn test_link_survives_a_timeout() {
    let device = SimulatedDevice::arduino_2wd();
    device.kill_verb("UpTime");
    let comm = open(&device, 100);

    assert!(comm.send_command("UpTime").is_err());
    assert_eq!(comm.send_command("TotalRAM").unwrap(), "2048");
    assert_eq!(comm.pending_lines(), 0);
}

#[test]
fn test_requests_are_serialized() {
    let device = SimulatedDevice::arduino_2wd();
    let comm = std::sync::Arc::new(open(&device, 500));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let comm = comm.clone();
            std::thread::spawn(move || (i, comm.send_command(&format!("Digital:{},{}", i, -i))))
        })
        .collect();
    for handle in handles {
        let (i, answer) = handle.join().unwrap();
        assert_eq!(answer.unwrap(), format!("OK {},{}", i, -i));
    }
    assert_eq!(device.wheel_commands().len(), 4);
}

#[test]
fn test_custom_answer() {
    let device = SimulatedDevice::arduino_2wd();
    device.set_answer("Temperature", "31");
    let comm = open(&device, 300);
    assert_eq!(comm.send_command("Temperature").unwrap(), "31");
    assert_eq!(
        comm.send_command("Bogus").unwrap(),
        "Unknown command: Bogus"
    );
}

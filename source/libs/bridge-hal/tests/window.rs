//! CONTEXT: Tests for bridge-hal seams: Bus over HeapWindow, MmuMapper recording
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - Word/byte coherence of the host-backed window
//!   - Cross-thread visibility of flag-last publication
//!   - Mapper interface compliance
//!
//! DEPENDENCIES:
//!   - bridge_hal::{Bus, HeapWindow, RecordingMapper}

use std::sync::Arc;
use std::thread;

use bridge_hal::{Bus, HeapWindow, MapAttrs, Mapping, MmuMapper, RecordingMapper};

#[test]
fn word_and_byte_views_agree() {
    let window = HeapWindow::new(32);
    window.write_bytes(8, b"bridge!!");
    assert_eq!(window.read(8), u32::from_le_bytes(*b"brid"));
    assert_eq!(window.read(12), u32::from_le_bytes(*b"ge!!"));
}

#[test]
fn flag_written_last_publishes_payload() {
    const FLAG: usize = 0;
    const DATA: usize = 4;
    let window = Arc::new(HeapWindow::new(64));
    let producer = {
        let window = Arc::clone(&window);
        thread::spawn(move || {
            for round in 1..=200u32 {
                while window.read(FLAG) != 0 {
                    std::hint::spin_loop();
                }
                window.write_bytes(DATA, &round.to_le_bytes());
                window.write(FLAG, round);
            }
        })
    };
    for round in 1..=200u32 {
        let seen = loop {
            let flag = window.read(FLAG);
            if flag != 0 {
                break flag;
            }
            std::hint::spin_loop();
        };
        let mut payload = [0u8; 4];
        window.read_bytes(DATA, &mut payload);
        assert_eq!(seen, round);
        assert_eq!(u32::from_le_bytes(payload), round);
        window.write(FLAG, 0);
    }
    producer.join().unwrap();
}

#[test]
fn mapper_accepts_aligned_entry() {
    let mapper = RecordingMapper::new();
    let entry = Mapping {
        host_physical: 0x8700_0000,
        target_virtual: 0x2000_0000,
        size: 0x10_0000,
        attrs: MapAttrs::LITTLE_ENDIAN | MapAttrs::ELEM_16 | MapAttrs::LOCKED,
    };
    mapper.map(&entry).expect("aligned entry accepted");
    assert_eq!(mapper.entries().len(), 1);
}

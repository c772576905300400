//! The shipped demo modes must load and draw with default control state.

use std::fs;
use std::path::PathBuf;

use ocellus::control::ControlState;
use ocellus::mode::ModeHost;
use ocellus::mode::script::RhaiHost;

fn shipped_modes_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("modes")
}

#[test]
fn every_shipped_mode_loads_and_draws() {
    let mut checked = 0;
    for entry in fs::read_dir(shipped_modes_dir()).unwrap() {
        let dir = entry.unwrap().path();
        let entry_point = dir.join("main.rhai");
        if !entry_point.is_file() {
            continue;
        }

        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        let source = fs::read_to_string(&entry_point).unwrap();

        let mut host = ModeHost::new(RhaiHost::new(), 320, 180);
        let state = ControlState {
            width: 320,
            height: 180,
            ..ControlState::default()
        };
        host.load(&name, &source, &state)
            .unwrap_or_else(|e| panic!("{name} failed to load: {e}"));

        // Two frames so modes with per-frame state exercise it.
        for _ in 0..2 {
            host.tick(&state)
                .unwrap_or_else(|e| panic!("{name} failed to draw: {e}"));
        }
        checked += 1;
    }
    assert!(checked >= 3, "expected the shipped demo modes to be present");
}

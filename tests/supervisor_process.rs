//! Supervisor tests against a real engine child process.

mod support;

use std::path::Path;
use std::time::{Duration, Instant};

use ocellus::supervisor::{EngineProcess, SHUTDOWN_GRACE, allocate_port};
use ocellus::transport::protocol::{ClientEvent, EngineEvent};

use support::ModesDir;

const FILL_MODE: &str = "fn draw(screen, etc) { screen.fill([0, 0, 80]); }";

fn engine_binary() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_ocellus"))
}

fn launch(modes: &ModesDir) -> EngineProcess {
    let port = allocate_port("127.0.0.1").unwrap();
    let mut engine = EngineProcess::launch_program(
        engine_binary(),
        "127.0.0.1",
        port,
        &modes.path.display().to_string(),
    )
    .unwrap();
    engine.wait_ready().unwrap();
    engine
}

#[test]
fn launched_engine_becomes_ready_and_serves() {
    let modes = ModesDir::new("supervised");
    modes.add_mode("fill", FILL_MODE);
    let engine = launch(&modes);

    assert!(engine.probe());

    let mut client = support::connect(engine.port());
    client
        .send(&ClientEvent::LoadMode {
            path: "fill".into(),
        })
        .unwrap();
    client
        .recv_matching(|e| matches!(e, EngineEvent::Frame { .. }))
        .unwrap();

    engine.shutdown().unwrap();
}

#[test]
fn set_modes_dir_repoints_the_library() {
    let first = ModesDir::new("sup-dir-a");
    let second = ModesDir::new("sup-dir-b");
    second.add_mode("elsewhere", FILL_MODE);

    let engine = launch(&first);
    engine
        .set_modes_dir(&second.path.display().to_string())
        .unwrap();

    let mut client = support::connect(engine.port());
    client.send(&ClientEvent::GetModes).unwrap();
    let listing = client
        .recv_matching(
            |e| matches!(e, EngineEvent::ModesList { modes } if !modes.is_empty()),
        )
        .unwrap();
    match listing {
        EngineEvent::ModesList { modes } => {
            assert_eq!(modes[0].name, "elsewhere")
        }
        _ => unreachable!(),
    }

    engine.shutdown().unwrap();
}

#[test]
fn shutdown_finishes_within_the_grace_period() {
    let modes = ModesDir::new("sup-shutdown");
    let engine = launch(&modes);

    let started = Instant::now();
    engine.shutdown().unwrap();
    assert!(started.elapsed() < SHUTDOWN_GRACE + Duration::from_secs(2));
}

//! Lost-update demonstration: unsynchronized vs synchronized counters.

use fraud_detector_service::counter::{hammer, MutexCounter, SharedCounter, UnsyncCounter};
use tracing::{info, warn};

const ACTORS: usize = 10;
const INCREMENTS: usize = 1000;

fn run(label: &str, counter: &dyn SharedCounter) -> bool {
    let expected = (ACTORS * INCREMENTS) as u64;
    let actual = hammer(counter, ACTORS, INCREMENTS);
    let lost = expected.saturating_sub(actual);

    if lost == 0 {
        info!(counter = label, expected, actual, "PASS");
    } else {
        warn!(counter = label, expected, actual, lost, "FAIL - race condition occurred");
    }

    lost == 0
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!(actors = ACTORS, increments = INCREMENTS, "Race condition demo");

    let unsafe_ok = run("unsynchronized", &UnsyncCounter::new());
    let safe_ok = run("synchronized", &MutexCounter::new());

    if !unsafe_ok && safe_ok {
        info!("Synchronized counter fixed the race");
    }
    if !safe_ok {
        std::process::exit(1);
    }
}

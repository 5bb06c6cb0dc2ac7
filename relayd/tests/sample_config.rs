//! The shipped sample configuration must load and match the built-in defaults.

use std::path::Path;

use relayd::config::RelayConfig;

#[test]
fn shipped_sample_equals_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/relayd.yaml");
    let loaded = RelayConfig::load_from_file(&path).unwrap();
    let defaults = RelayConfig::default();

    assert_eq!(loaded.bind, defaults.bind);
    assert_eq!(loaded.driver.kind, defaults.driver.kind);
    assert_eq!(loaded.driver.command, defaults.driver.command);
    assert_eq!(loaded.driver.call_timeout, defaults.driver.call_timeout);
    assert_eq!(loaded.time_sync.kind, defaults.time_sync.kind);
    assert_eq!(loaded.time_sync.remediation, defaults.time_sync.remediation);
    assert_eq!(loaded.channels, defaults.channels);
    assert_eq!(loaded.schedule, defaults.schedule);
    assert_eq!(loaded.timing, defaults.timing);
}

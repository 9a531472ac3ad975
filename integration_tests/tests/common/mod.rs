use std::path::PathBuf;
use std::sync::Once;

use essence_core::CONFIG_PATH_ENV;

static INIT: Once = Once::new();

/// Points the store at the checked-in test configuration before the first
/// app is built. Pins the world seed so rosters are stable across machines,
/// and moves the bind addresses off the default ports so a dev server
/// running locally never collides with the suite.
pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_store_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test store config at {}",
            config_path.display()
        );

        std::env::set_var(CONFIG_PATH_ENV, &config_path);
    });
}

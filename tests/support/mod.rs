use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use ocellus::transport::client::DisplayClient;

/// Scratch modes directory, wiped per test.
pub struct ModesDir {
    pub path: PathBuf,
}

impl ModesDir {
    pub fn new(tag: &str) -> Self {
        let path = std::env::temp_dir()
            .join(format!("ocellus-test-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn add_mode(&self, name: &str, source: &str) {
        let dir = self.path.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("main.rhai"), source).unwrap();
    }
}

impl Drop for ModesDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn connect(port: u16) -> DisplayClient {
    let client = DisplayClient::connect("127.0.0.1", port).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    client
}

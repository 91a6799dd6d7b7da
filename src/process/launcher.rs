use crate::config::schema::BrowserConfig;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Build the Chrome launch command for one session
pub fn build_command(config: &BrowserConfig, user_data_dir: &Path, cdp_port: u16) -> Command {
    let mut cmd = Command::new(&config.chrome_path);

    // Throwaway profile per session
    cmd.arg(format!("--user-data-dir={}", user_data_dir.display()));

    cmd.arg(format!("--remote-debugging-port={}", cdp_port));

    if config.headless {
        cmd.arg("--headless=new");
        cmd.arg("--disable-gpu");
    }

    cmd.arg(format!(
        "--window-size={},{}",
        config.viewport_width, config.viewport_height
    ));

    cmd.arg("--no-first-run");
    cmd.arg("--no-default-browser-check");
    cmd.arg("--disable-background-networking");
    cmd.arg("--disable-sync");
    cmd.arg("--no-sandbox");
    cmd.arg("--disable-dev-shm-usage");

    for arg in &config.extra_args {
        cmd.arg(arg);
    }

    cmd.arg("about:blank");

    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    cmd
}

//! Service-manager adapter (C1-adjacent, ambient): installs/removes/queries
//! the process's auto-start unit. A thin wrapper around `systemctl`/`launchctl`
//! plus a file template, not a service supervisor in its own right.

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;

use splitroute_core::shell_command_ext::{Logs, ShellCommandExt};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error writing unit file: {0}")]
    IO(#[from] std::io::Error),
    #[error("shell command failed: {0}")]
    Shell(#[from] splitroute_core::shell_command_ext::Error),
    #[error("no service manager integration on this platform")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Installed,
    NotInstalled,
}

#[cfg(target_os = "linux")]
const UNIT_PATH: &str = "/etc/systemd/system/splitrouted.service";
#[cfg(target_os = "linux")]
const UNIT_TEMPLATE: &str = "\
[Unit]
Description=Split-tunnel routing policy daemon
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={exe} daemon
Restart=on-failure

[Install]
WantedBy=multi-user.target
";

#[cfg(target_os = "macos")]
const UNIT_PATH: &str = "/Library/LaunchDaemons/dev.splitroute.splitrouted.plist";
#[cfg(target_os = "macos")]
const UNIT_TEMPLATE: &str = "\
<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">
<plist version=\"1.0\">
<dict>
    <key>Label</key>
    <string>dev.splitroute.splitrouted</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe}</string>
        <string>daemon</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
</dict>
</plist>
";

#[cfg(target_os = "linux")]
pub async fn install() -> Result<(), Error> {
    let exe = current_exe()?;
    let contents = UNIT_TEMPLATE.replace("{exe}", &exe);
    fs::write(UNIT_PATH, contents).await?;
    Command::new("systemctl").arg("daemon-reload").run(Logs::Print).await?;
    Command::new("systemctl").args(["enable", "--now", "splitrouted"]).run(Logs::Print).await?;
    Ok(())
}

#[cfg(target_os = "linux")]
pub async fn uninstall() -> Result<(), Error> {
    Command::new("systemctl").args(["disable", "--now", "splitrouted"]).run(Logs::Suppress).await?;
    if fs::try_exists(UNIT_PATH).await.unwrap_or(false) {
        fs::remove_file(UNIT_PATH).await?;
    }
    Command::new("systemctl").arg("daemon-reload").run(Logs::Print).await?;
    Ok(())
}

#[cfg(target_os = "macos")]
pub async fn install() -> Result<(), Error> {
    let exe = current_exe()?;
    let contents = UNIT_TEMPLATE.replace("{exe}", &exe);
    fs::write(UNIT_PATH, contents).await?;
    Command::new("launchctl").args(["load", "-w", UNIT_PATH]).run(Logs::Print).await?;
    Ok(())
}

#[cfg(target_os = "macos")]
pub async fn uninstall() -> Result<(), Error> {
    Command::new("launchctl").args(["unload", "-w", UNIT_PATH]).run(Logs::Suppress).await?;
    if fs::try_exists(UNIT_PATH).await.unwrap_or(false) {
        fs::remove_file(UNIT_PATH).await?;
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
pub async fn status() -> Result<Status, Error> {
    if fs::try_exists(UNIT_PATH).await.unwrap_or(false) {
        Ok(Status::Installed)
    } else {
        Ok(Status::NotInstalled)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub async fn install() -> Result<(), Error> {
    Err(Error::Unsupported)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub async fn uninstall() -> Result<(), Error> {
    Err(Error::Unsupported)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub async fn status() -> Result<Status, Error> {
    Err(Error::Unsupported)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn current_exe() -> Result<String, Error> {
    Ok(std::env::current_exe()?.to_string_lossy().into_owned())
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn unit_template_substitutes_exe_path() {
        let rendered = UNIT_TEMPLATE.replace("{exe}", "/usr/local/bin/splitrouted");
        assert!(rendered.contains("/usr/local/bin/splitrouted"));
        assert!(!rendered.contains("{exe}"));
    }
}

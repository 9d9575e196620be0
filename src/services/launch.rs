use crate::error::{LauncherError, LauncherResult};
use crate::tasks::guarded;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::watch;

/// Steam application id written next to the game executable.
pub const STEAM_APPID: &str = "418530";

pub const STEAM_APPID_FILENAME: &str = "steam_appid.txt";

/// How to start the external launcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exe_path: Utf8PathBuf,
    pub install_dir: Utf8PathBuf,
    pub console: bool,
}

impl LaunchSpec {
    pub fn new(
        exe_path: impl Into<Utf8PathBuf>,
        install_dir: impl Into<Utf8PathBuf>,
        console: bool,
    ) -> Self {
        Self {
            exe_path: exe_path.into(),
            install_dir: install_dir.into(),
            console,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![format!("--exe_dir={}", self.install_dir)];
        if self.console {
            args.push("--console".to_string());
        }
        args
    }

    /// The launcher runs from its own directory.
    pub fn working_dir(&self) -> &Utf8Path {
        match self.exe_path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        }
    }
}

/// Start the launcher and wait for it to exit.
///
/// Returns the exit code, or `None` if the process was killed by a signal.
/// When `deadline` elapses or `cancel` fires the child is killed and the
/// matching error is returned.
pub async fn run(
    spec: &LaunchSpec,
    deadline: Option<Duration>,
    mut cancel: watch::Receiver<bool>,
) -> LauncherResult<Option<i32>> {
    tracing::info!("Executing launcher {}", spec.exe_path);

    let start = Instant::now();
    let mut child = Command::new(spec.exe_path.as_std_path())
        .args(spec.args())
        .current_dir(spec.working_dir().as_std_path())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LauncherError::io(&spec.exe_path, e))?;

    let waited = guarded(
        async {
            child
                .wait()
                .await
                .map_err(|e| LauncherError::io(&spec.exe_path, e))
        },
        deadline,
        &mut cancel,
    )
    .await;

    let status = match waited {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Stopping launcher: {}", e);
            if let Err(kill_err) = child.kill().await {
                tracing::warn!("Failed to kill launcher process: {}", kill_err);
            }
            return Err(e);
        }
    };

    tracing::info!(
        "Launcher exited after {:.2}s with {}",
        start.elapsed().as_secs_f32(),
        status
    );
    Ok(status.code())
}

/// Write `steam_appid.txt` into the game directory.
pub fn write_steam_appid(install_dir: &Utf8Path) -> LauncherResult<()> {
    let path = install_dir.join(STEAM_APPID_FILENAME);
    fs::write(&path, STEAM_APPID).map_err(|e| LauncherError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args_without_console() {
        let spec = LaunchSpec::new("/opt/v/stable/playlunky_launcher.exe", "/games/spel2", false);
        assert_eq!(spec.args(), vec!["--exe_dir=/games/spel2".to_string()]);
        assert_eq!(spec.working_dir(), Utf8Path::new("/opt/v/stable"));
    }

    #[test]
    fn test_args_with_console() {
        let spec = LaunchSpec::new("launcher.exe", "game", true);
        assert_eq!(spec.args(), vec!["--exe_dir=game", "--console"]);
    }

    #[test]
    fn test_write_steam_appid() {
        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        write_steam_appid(root).unwrap();
        assert_eq!(
            fs::read_to_string(root.join(STEAM_APPID_FILENAME)).unwrap(),
            "418530"
        );
    }

    #[test]
    fn test_missing_executable_is_io_error() {
        let (_tx, rx) = watch::channel(false);
        let spec = LaunchSpec::new("/nonexistent/playlunky_launcher.exe", "/tmp", false);
        let result = tokio_test::block_on(run(&spec, None, rx));
        assert!(matches!(result, Err(LauncherError::Io { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let (_tx, rx) = watch::channel(false);
        let spec = LaunchSpec::new("/bin/true", "/tmp", false);
        assert_eq!(run(&spec, None, rx).await.unwrap(), Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_child() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let script = root.join("slow.sh");
        fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, rx) = watch::channel(false);
        let spec = LaunchSpec::new(script, root, false);
        let running = tokio::spawn(async move { run(&spec, None, rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);

        let result = running.await.unwrap();
        assert!(matches!(result, Err(LauncherError::Cancelled)));
    }
}

//! Owns a transcoder child process: spawn, and cooperative kill+wait.
//! Grounded on `ffmpeg/Process.cpp`. Argument synthesis from `Quality` is
//! explicitly out of scope; this only launches whatever argument list the
//! configuration already supplies.

use tokio::process::{Child, Command};

pub struct Process {
    child: Child,
}

impl Process {
    pub fn spawn(binary: &str, arguments: &[String]) -> std::io::Result<Self> {
        let child = Command::new(binary)
            .args(arguments)
            .kill_on_drop(true)
            .spawn()?;
        Ok(Process { child })
    }

    /// Sends the process a termination signal and waits for it to exit.
    pub async fn kill(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }
}

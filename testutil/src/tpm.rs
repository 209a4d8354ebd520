use std::{io::ErrorKind, process::{Child, Command, Stdio}, thread, time::Duration};
use rand::Rng;
use tempfile::TempDir;

/// A throwaway TPM 2.0 simulator, killed when dropped.
pub struct SwTpm {
    process: Child,
    #[allow(dead_code)]
    dir: TempDir,
    pub tcti: String,
}

impl Drop for SwTpm {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl SwTpm {
    /// Starts swtpm on a random port.
    /// Returns None if swtpm is not installed, so that TPM-backed tests can be skipped.
    pub fn spawn() -> Option<Self> {
        let tpm_dir = tempfile::tempdir().unwrap();
        for _ in 1..10 {
            let server_port: u16 = rand::thread_rng().gen_range(1024..65534);
            let spawned = Command::new("swtpm")
                .arg("socket")
                .arg("--tpmstate").arg(format!("dir={}", tpm_dir.path().to_str().unwrap()))
                .arg("--server").arg(format!("type=tcp,port={}", server_port))
                .arg("--ctrl").arg(format!("type=tcp,port={}", server_port+1))
                .arg("--tpm2")
                .arg("--flags").arg("not-need-init")
                .stdout(Stdio::null())
                .spawn();
            let mut child = match spawned {
                Ok(child) => child,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    eprintln!("swtpm not found in PATH; skipping TPM-backed test");
                    return None
                },
                Err(e) => panic!("couldn't run swtpm: {}", e),
            };

            // Rerun swtpm if it terminated for some reason (most likely port collision)
            thread::sleep(Duration::from_millis(50));
            if let Ok(Some(_)) = child.try_wait() {
                continue;
            } else {
                return Some(SwTpm {
                    process: child,
                    dir: tpm_dir,
                    tcti: format!("swtpm:host=127.0.0.1,port={}", server_port),
                });
            }
        }
        panic!("couldn't start swtpm");
    }
}

//! Runs jobs in local Docker containers: one container and one bind-mounted
//! volume per job, never reused.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tango_core::{InputFile, TangoConfig, TangoMachine, Vmms};
use tango_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// How long `safeDestroyVM` keeps retrying before giving up and logging.
const DESTROY_RETRY_BUDGET: Duration = Duration::from_secs(30);

pub struct LocalDocker {
    config: Arc<TangoConfig>,
    /// Bounds retries of the short-lived `docker` CLI calls (`rm`, `inspect`)
    /// against a flaky or overloaded daemon; trips open after repeated
    /// failures rather than letting every caller hang the Docker socket.
    breaker: CircuitBreaker,
}

impl LocalDocker {
    pub fn new(config: Arc<TangoConfig>) -> Self {
        Self { config, breaker: CircuitBreaker::new(CircuitBreakerConfig::default()) }
    }

    /// Run a `docker` CLI invocation through the circuit breaker, retrying a
    /// failed spawn or non-zero exit with backoff. `build` must be pure and
    /// reusable since a retry calls it again for a fresh `Command`. Never
    /// used around `runJob` itself — that invocation is not safe to retry.
    async fn run_guarded<F>(&self, build: F) -> i32
    where
        F: Fn() -> Command,
    {
        let result = self
            .breaker
            .execute(|| async {
                match self.run_with_status(build()).await {
                    -1 => Err(ResilienceError::Transient("docker command failed".into())),
                    status => Ok(status),
                }
            })
            .await;
        result.unwrap_or(-1)
    }

    /// Always construct instance names through this helper — never by hand.
    fn instance_name(&self, vm: &TangoMachine) -> String {
        format!("{}-{}-{}", self.config.prefix.trim_start_matches('/'), vm.id, vm.image)
    }

    fn volume_path(&self, instance_name: &str) -> PathBuf {
        PathBuf::from(&self.config.docker_volume_path).join(instance_name)
    }

    async fn run_with_status(&self, mut cmd: Command) -> i32 {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        match cmd.status().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                error!(error = %err, "failed to spawn docker command");
                -1
            }
        }
    }
}

#[async_trait]
impl Vmms for LocalDocker {
    async fn initialize_vm(&self, _vm: &mut TangoMachine) -> i32 {
        // Containers are created lazily by `runJob`; nothing to provision.
        0
    }

    async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 {
        0
    }

    async fn copy_in(&self, vm: &TangoMachine, files: &[InputFile], _job_id: i64) -> i32 {
        let instance_name = self.instance_name(vm);
        let volume_path = self.volume_path(&instance_name);

        if let Err(err) = tokio::fs::create_dir_all(&volume_path).await {
            error!(error = %err, "failed to create fresh job volume");
            return -1;
        }

        for file in files {
            let dest = volume_path.join(&file.dest_file);
            if let Some(parent) = dest.parent() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    error!(error = %err, "failed to create output directory");
                    return -1;
                }
            }
            // Copy to a sibling temp file and rename into place so a crash
            // or truncated read mid-copy never leaves a partial file at
            // `dest` itself.
            let file_name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("file");
            let tmp_dest = dest.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
            if let Err(err) = tokio::fs::copy(&file.local_file, &tmp_dest).await {
                error!(error = %err, local = %file.local_file, "copyIn failed");
                let _ = tokio::fs::remove_file(&tmp_dest).await;
                return -1;
            }
            if let Err(err) = tokio::fs::rename(&tmp_dest, &dest).await {
                error!(error = %err, local = %file.local_file, "copyIn rename failed");
                let _ = tokio::fs::remove_file(&tmp_dest).await;
                return -1;
            }
            debug!(local = %file.local_file, dest = %dest.display(), "copied input file");
        }
        0
    }

    async fn run_job(&self, vm: &TangoMachine, timeout: u64, max_output: u64, disable_network: bool) -> i32 {
        let instance_name = self.instance_name(vm);
        let volume_path = self.volume_path(&instance_name);

        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("--name").arg(&instance_name);
        cmd.arg("-v").arg(format!("{}:/home/mount", volume_path.display()));
        if let Some(cores) = vm.cores {
            cmd.arg(format!("--cpus={cores}"));
        }
        if let Some(memory) = vm.memory {
            cmd.arg("-m").arg(format!("{memory}m"));
        }
        if disable_network {
            cmd.arg("--network").arg("none");
        }
        cmd.arg(&vm.image);

        let autodriver_cmd = format!(
            "autodriver -u {} -f {} -t {} -o {} autolab > output/feedback 2>&1",
            self.config.vm_ulimit_user_proc, self.config.vm_ulimit_file_size, timeout, max_output
        );
        let shell_cmd = format!(
            "cp -r mount/* autolab/; su autolab -c \"{autodriver_cmd}\"; cp output/feedback mount/feedback"
        );
        cmd.arg("sh").arg("-c").arg(shell_cmd);

        debug!(instance = %instance_name, "running job container");
        let bound = Duration::from_secs(timeout.saturating_mul(2).max(1));
        match tokio::time::timeout(bound, self.run_with_status(cmd)).await {
            Ok(status) => status,
            Err(_) => {
                warn!(instance = %instance_name, "container run exceeded host-side bound; killing");
                let mut kill = Command::new("docker");
                kill.arg("kill").arg(&instance_name);
                let _ = self.run_with_status(kill).await;
                -1
            }
        }
    }

    async fn copy_out(&self, vm: &TangoMachine, dest_file: &str) -> i32 {
        let instance_name = self.instance_name(vm);
        let volume_path = self.volume_path(&instance_name);
        let feedback = volume_path.join("feedback");

        if let Some(parent) = std::path::Path::new(dest_file).parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let result = match tokio::fs::rename(&feedback, dest_file).await {
            Ok(()) => 0,
            Err(err) => {
                error!(error = %err, "copyOut failed to move feedback file");
                -1
            }
        };
        self.destroy_vm(vm).await;
        result
    }

    async fn destroy_vm(&self, vm: &TangoMachine) {
        let instance_name = self.instance_name(vm);
        let _ = self
            .run_guarded(|| {
                let mut rm = Command::new("docker");
                rm.arg("rm").arg("-f").arg(&instance_name);
                rm
            })
            .await;

        let volume_path = self.volume_path(&instance_name);
        if volume_path.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&volume_path).await {
                warn!(error = %err, "failed to remove job volume");
            }
        }
    }

    async fn safe_destroy_vm(&self, vm: &TangoMachine) {
        let deadline = tokio::time::Instant::now() + DESTROY_RETRY_BUDGET;
        while self.exists_vm(vm).await {
            if tokio::time::Instant::now() > deadline {
                error!(instance = %self.instance_name(vm), "failed to safely destroy container within budget");
                return;
            }
            self.destroy_vm(vm).await;
        }
    }

    async fn get_vms(&self) -> Vec<TangoMachine> {
        let mut entries = match tokio::fs::read_dir(&self.config.docker_volume_path).await {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let prefix = format!("{}-", self.config.prefix.trim_start_matches('/'));
        let mut machines = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) {
                continue;
            }
            let parts: Vec<&str> = name.splitn(3, '-').collect();
            if parts.len() != 3 {
                continue;
            }
            let mut vm = TangoMachine::none_placeholder();
            vm.vmms = "localDocker".into();
            vm.name = name.clone();
            vm.id = parts[1].parse().unwrap_or(0);
            vm.image = parts[2].to_string();
            machines.push(vm);
        }
        machines
    }

    async fn exists_vm(&self, vm: &TangoMachine) -> bool {
        let instance_name = self.instance_name(vm);
        self.run_guarded(|| {
            let mut cmd = Command::new("docker");
            cmd.arg("inspect").arg(&instance_name);
            cmd
        })
        .await
            == 0
    }

    async fn get_images(&self) -> Vec<String> {
        let output = Command::new("docker")
            .arg("images")
            .arg("--format")
            .arg("{{.Repository}}")
            .output()
            .await;

        let Ok(output) = output else { return Vec::new() };
        let text = String::from_utf8_lossy(&output.stdout);
        let mut images: Vec<String> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| line.rsplit('/').next().unwrap_or(line).to_string())
            .collect();
        images.sort();
        images.dedup();
        images
    }

    async fn get_partial_output(&self, vm: &TangoMachine) -> String {
        let instance_name = self.instance_name(vm);
        let output = Command::new("docker")
            .arg("exec")
            .arg(&instance_name)
            .arg("head")
            .arg("-c")
            .arg(self.config.max_output_file_size.to_string())
            .arg("autograde/output.log")
            .output()
            .await;

        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(volume_path: &std::path::Path) -> Arc<TangoConfig> {
        let mut config = TangoConfig::default();
        config.docker_volume_path = volume_path.to_string_lossy().into_owned();
        Arc::new(config)
    }

    fn vm() -> TangoMachine {
        let mut vm = TangoMachine::none_placeholder();
        vm.id = 7;
        vm.image = "autograder".into();
        vm.vmms = "localDocker".into();
        vm
    }

    #[tokio::test]
    async fn copy_in_leaves_no_temp_file_behind() {
        let volume = tempfile::tempdir().unwrap();
        let input = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(input.path(), b"handin contents").await.unwrap();

        let docker = LocalDocker::new(config(volume.path()));
        let vm = vm();
        let files = vec![InputFile {
            local_file: input.path().to_string_lossy().into_owned(),
            dest_file: "handin.tgz".into(),
        }];

        let status = docker.copy_in(&vm, &files, 1).await;
        assert_eq!(status, 0);

        let instance_name = docker.instance_name(&vm);
        let dest_dir = docker.volume_path(&instance_name);
        let dest = dest_dir.join("handin.tgz");
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"handin contents");

        let mut entries = tokio::fs::read_dir(&dest_dir).await.unwrap();
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["handin.tgz".to_string()]);
    }
}

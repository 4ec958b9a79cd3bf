//! Mercurial backend via the `hg` command line client.
//!
//! Every `hg` process runs as a task tracked by [`VcsTasks`] and is killed
//! when the operation that started it is abandoned.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{CommitInfo, MergeOutcome, RemoteSpec, VcsBackend, VcsKind, VcsTasks};
use crate::credentials::Credentials;
use crate::errors::VcsError;
use crate::models::{Author, Revision};

/// Output of a finished `hg` invocation.
struct HgOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

/// Mercurial working copy bound to one remote branch.
pub struct MercurialBackend {
    path: PathBuf,
    remote: RemoteSpec,
    credentials: Credentials,
    tasks: VcsTasks,
}

impl MercurialBackend {
    pub fn new(path: impl Into<PathBuf>, remote: RemoteSpec, credentials: Credentials) -> Self {
        Self {
            path: path.into(),
            remote,
            credentials,
            tasks: VcsTasks::new(),
        }
    }

    /// Track `hg` processes through `tasks` instead of a private tracker.
    pub fn with_tasks(mut self, tasks: VcsTasks) -> Self {
        self.tasks = tasks;
        self
    }

    /// Run a prepared `hg` command to completion as a tracked task.
    async fn output(&self, mut cmd: Command) -> Result<std::process::Output, VcsError> {
        cmd.kill_on_drop(true);
        self.tasks
            .run(move || async move {
                let mut cmd = cmd;
                cmd.output().await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        VcsError::BinaryNotFound("hg".into())
                    } else {
                        VcsError::State(format!("failed to run hg: {e}"))
                    }
                })
            })
            .await
    }

    /// Whether the `hg` binary can be executed.
    pub async fn is_available() -> bool {
        Command::new("hg")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// `--config` arguments injecting credentials for the remote.
    fn auth_args(&self) -> Vec<String> {
        let Some(secret) = &self.credentials.secret else {
            return Vec::new();
        };
        vec![
            "--config".into(),
            "auth.lingosync.prefix=*".into(),
            "--config".into(),
            format!("auth.lingosync.username={}", self.credentials.username_or("lingosync")),
            "--config".into(),
            format!("auth.lingosync.password={secret}"),
        ]
    }

    /// Run `hg` and return its output whatever the exit code.
    async fn run_hg_raw(&self, dir: Option<&Path>, args: &[&str], network: bool) -> Result<HgOutput, VcsError> {
        let mut cmd = Command::new("hg");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .args(["--noninteractive", "--config", "ui.merge=internal:merge"])
            .env("HGPLAIN", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if network {
            cmd.args(self.auth_args());
        }

        debug!(cmd = ?format!("hg {}", args.join(" ")), "running hg command");
        let output = self.output(cmd).await?;

        Ok(HgOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run a local `hg` command in the working copy; non-zero exit is a
    /// state error.
    async fn run_hg(&self, args: &[&str]) -> Result<String, VcsError> {
        let out = self.run_hg_raw(Some(&self.path), args, false).await?;
        if out.code != 0 {
            warn!(exit_code = out.code, stderr = %out.stderr, "hg command failed");
            return Err(VcsError::State(out.stderr.trim().to_string()));
        }
        Ok(out.stdout)
    }

    async fn resolve_rev(&self, revset: &str) -> Result<Option<Revision>, VcsError> {
        let out = self
            .run_hg(&["log", "-r", revset, "-T", "{node}\\n"])
            .await?;
        Ok(out.lines().next().map(|l| Revision::new(l.trim())))
    }
}

#[async_trait]
impl VcsBackend for MercurialBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Mercurial
    }

    fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip_all, fields(url = %self.remote.url, path = %self.path.display()))]
    async fn clone_repo(&self) -> Result<(), VcsError> {
        info!("cloning mercurial repository");
        let dest = self.path.to_string_lossy().to_string();
        let out = self
            .run_hg_raw(
                None,
                &["clone", "-u", &self.remote.branch, &self.remote.url, &dest],
                true,
            )
            .await?;
        if out.code != 0 {
            return Err(classify_network(&out.stderr));
        }
        info!("clone completed");
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %self.remote.branch))]
    async fn fetch(&self) -> Result<Revision, VcsError> {
        let out = self
            .run_hg_raw(
                Some(&self.path),
                &["pull", "-b", &self.remote.branch, &self.remote.url],
                true,
            )
            .await?;
        if out.code != 0 {
            return Err(classify_network(&out.stderr));
        }
        // Pulled changesets are public; local unpushed commits stay draft.
        let revset = format!("max(public() and branch('{}'))", self.remote.branch);
        let rev = self.resolve_rev(&revset).await?.ok_or_else(|| {
            VcsError::State(format!("branch '{}' has no public head", self.remote.branch))
        })?;
        debug!(revision = %rev.short(), "fetch completed");
        Ok(rev)
    }

    async fn checkout(&self, rev: &Revision) -> Result<(), VcsError> {
        self.run_hg(&["update", "--clean", "-r", rev.as_str()]).await?;
        self.run_hg(&["purge", "--config", "extensions.purge=", "--all"])
            .await?;
        // Abandoned local commits must not turn into extra heads.
        let drafts = format!("draft() and not ancestors({})", rev.as_str());
        if self.resolve_rev(&drafts).await?.is_some() {
            self.run_hg(&[
                "--config",
                "extensions.strip=",
                "strip",
                "--no-backup",
                "-r",
                &drafts,
            ])
            .await?;
        }
        Ok(())
    }

    async fn current_revision(&self) -> Result<Revision, VcsError> {
        self.resolve_rev(".")
            .await?
            .ok_or_else(|| VcsError::State("working copy has no parent revision".into()))
    }

    async fn list_changed_paths(
        &self,
        from: &Revision,
        to: &Revision,
    ) -> Result<Vec<String>, VcsError> {
        let out = self
            .run_hg(&["status", "--rev", from.as_str(), "--rev", to.as_str(), "-n"])
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.replace('\\', "/"))
            .collect())
    }

    async fn read_file(&self, rev: &Revision, path: &str) -> Result<Option<Vec<u8>>, VcsError> {
        let mut cmd = Command::new("hg");
        cmd.current_dir(&self.path)
            .args(["cat", "-r", rev.as_str(), path])
            .env("HGPLAIN", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = self.output(cmd).await?;
        match output.status.code() {
            Some(0) => Ok(Some(output.stdout)),
            // `hg cat` exits 1 when the file does not exist at `rev`.
            Some(1) => Ok(None),
            _ => Err(VcsError::State(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }

    #[instrument(skip_all, fields(files = paths.len()))]
    async fn commit(
        &self,
        message: &str,
        author: &Author,
        paths: &[String],
    ) -> Result<Option<Revision>, VcsError> {
        let user = author.to_string();
        let mut args = vec!["commit", "--addremove", "-u", user.as_str(), "-m", message];
        args.extend(paths.iter().map(String::as_str));
        let out = self.run_hg_raw(Some(&self.path), &args, false).await?;
        match out.code {
            0 => {}
            // Exit 1: nothing changed.
            1 => {
                debug!("tree unchanged, no commit created");
                return Ok(None);
            }
            code => {
                warn!(exit_code = code, stderr = %out.stderr, "hg commit failed");
                return Err(VcsError::State(out.stderr.trim().to_string()));
            }
        }
        let rev = self.current_revision().await?;
        info!(revision = %rev.short(), "created commit");
        Ok(Some(rev))
    }

    #[instrument(skip_all, fields(branch = %self.remote.branch))]
    async fn push(&self) -> Result<(), VcsError> {
        info!("pushing");
        let out = self
            .run_hg_raw(
                Some(&self.path),
                &["push", "-b", &self.remote.branch, "-r", ".", self.remote.push_url()],
                true,
            )
            .await?;
        match out.code {
            // Exit 1 means there was nothing to push.
            0 | 1 => {
                info!("push completed");
                Ok(())
            }
            _ => {
                let text = format!("{}{}", out.stdout, out.stderr);
                if text.contains("push creates new remote head") {
                    Err(VcsError::PushRejected {
                        branch: self.remote.branch.clone(),
                        detail: out.stderr.trim().to_string(),
                    })
                } else {
                    Err(classify_network(&out.stderr))
                }
            }
        }
    }

    async fn merge(
        &self,
        rev: &Revision,
        message: &str,
        author: &Author,
    ) -> Result<MergeOutcome, VcsError> {
        if self.is_ancestor(rev, &self.current_revision().await?).await? {
            return Ok(MergeOutcome::Merged(self.current_revision().await?));
        }
        let out = self
            .run_hg_raw(
                Some(&self.path),
                &["merge", "--tool", "internal:merge", "-r", rev.as_str()],
                false,
            )
            .await?;
        if out.code != 0 {
            let unresolved = self.run_hg(&["resolve", "-l"]).await?;
            let paths: Vec<String> = unresolved
                .lines()
                .filter_map(|l| l.strip_prefix("U "))
                .map(str::to_string)
                .collect();
            if paths.is_empty() {
                return Err(VcsError::State(out.stderr.trim().to_string()));
            }
            self.run_hg(&["update", "--clean", "-r", "."]).await?;
            return Ok(MergeOutcome::Conflicted(paths));
        }
        let user = author.to_string();
        let commit = self
            .run_hg_raw(Some(&self.path), &["commit", "-u", &user, "-m", message], false)
            .await?;
        if commit.code != 0 {
            // A fast-forward update leaves nothing to commit.
            debug!("merge produced no merge commit");
        }
        Ok(MergeOutcome::Merged(self.current_revision().await?))
    }

    async fn is_ancestor(
        &self,
        ancestor: &Revision,
        descendant: &Revision,
    ) -> Result<bool, VcsError> {
        if ancestor == descendant {
            return Ok(true);
        }
        if self.resolve_rev(&format!("id('{}')", ancestor.as_str())).await?.is_none() {
            return Ok(false);
        }
        let revset = format!(
            "{} and ancestors({})",
            ancestor.as_str(),
            descendant.as_str()
        );
        Ok(self.resolve_rev(&revset).await?.is_some())
    }

    async fn log(&self, from: &Revision, to: &Revision) -> Result<Vec<CommitInfo>, VcsError> {
        let revset = format!("reverse(only({}, {}))", to.as_str(), from.as_str());
        let out = self
            .run_hg(&["log", "-r", &revset, "-T", "{node}\\t{author|person}\\t{desc|firstline}\\n"])
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                Some(CommitInfo {
                    revision: Revision::new(parts.next()?),
                    author: parts.next()?.to_string(),
                    summary: parts.next().unwrap_or("").to_string(),
                })
            })
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        if !self.path.join(".hg").is_dir() {
            return false;
        }
        self.current_revision().await.is_ok()
    }
}

/// Classify a failed network command from its error output.
fn classify_network(stderr: &str) -> VcsError {
    let lower = stderr.to_lowercase();
    if lower.contains("authorization failed")
        || lower.contains("authentication")
        || lower.contains("401")
        || lower.contains("403")
    {
        VcsError::Auth(stderr.trim().to_string())
    } else {
        VcsError::Unavailable(stderr.trim().to_string())
    }
}

//! Process setup around the server: pidfile, privilege drop, daemonizing.
//!
//! Everything here runs before the tokio runtime exists; `daemonize` in
//! particular forks and must only be called while the process has one thread.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, Pid, User, chdir, dup2, fork, geteuid, setgid, setsid, setuid};

/// An exclusively created (or reclaimed) pidfile, not yet written.
#[derive(Debug)]
pub struct Pidfile {
    file: File,
    path: PathBuf,
}

impl Pidfile {
    /// Creates `path`, or reclaims it if the recorded process is gone.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(path);
        match created {
            Ok(file) => Ok(Pidfile {
                file,
                path: path.to_path_buf(),
            }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Self::reclaim(path),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create pid file {}", path.display()))
            }
        }
    }

    fn reclaim(path: &Path) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to read pid file {}", path.display()))?;
        let mut content = String::new();
        (&mut file)
            .take(32)
            .read_to_string(&mut content)
            .with_context(|| format!("failed to read pid file {}", path.display()))?;

        let pid = content
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| anyhow!("pidfile exists with bogus content"))?;

        match kill(Pid::from_raw(pid), None) {
            Err(Errno::ESRCH) => {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                Ok(Pidfile {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(errno) => bail!("pidfile exists and process {pid} cannot be signalled: {errno}"),
            Ok(()) => bail!("pidfile exists and process {pid} is alive"),
        }
    }

    /// Records `pid` and closes the file.
    pub fn write_pid(mut self, pid: u32) -> anyhow::Result<()> {
        write!(self.file, "{pid}")
            .and_then(|()| self.file.flush())
            .with_context(|| format!("failed to write pid file {}", self.path.display()))
    }
}

/// Resolves the account to run as and checks we are allowed to become it.
pub fn lookup_user(name: &str) -> anyhow::Result<User> {
    let user = User::from_name(name)
        .with_context(|| format!("lookup failed for user {name}"))?
        .ok_or_else(|| anyhow!("lookup failed for user {name}: user not found"))?;

    let euid = geteuid();
    if !euid.is_root() && euid != user.uid {
        bail!(
            "cannot run as user {name} (uid {}) unless started (or setuid) as root or {name}",
            user.uid
        );
    }
    Ok(user)
}

/// Moves to `/` and switches to the given account's gid and uid.
pub fn drop_privileges(user: &User) -> anyhow::Result<()> {
    chdir("/").context("cannot chdir to root")?;
    setgid(user.gid).with_context(|| format!("setgid({}) failed", user.gid))?;
    setuid(user.uid).with_context(|| format!("setuid({}) failed", user.uid))?;
    Ok(())
}

/// Detaches from the terminal: the parent exits, the child leads a new
/// session with its standard streams on `/dev/null`.
pub fn daemonize() -> anyhow::Result<()> {
    // SAFETY: only called from `main` before any other thread is spawned.
    match unsafe { fork() }.context("failed to fork into background")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    umask(Mode::empty());
    setsid().context("failed to get a new session")?;

    let null_in = File::open("/dev/null").context("failed to replace stdin")?;
    dup2(null_in.as_raw_fd(), 0).context("failed to replace stdin")?;
    let null_out = OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .context("failed to replace stdout")?;
    dup2(null_out.as_raw_fd(), 1).context("failed to replace stdout")?;
    dup2(null_out.as_raw_fd(), 2).context("failed to replace stderr")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_fresh_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotad.pid");
        Pidfile::create(&path).unwrap().write_pid(4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
    }

    #[test]
    fn refuses_pidfile_of_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotad.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        let err = Pidfile::create(&path).unwrap_err();
        assert!(err.to_string().contains("is alive"));
    }

    #[test]
    fn refuses_bogus_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotad.pid");
        std::fs::write(&path, "not a pid").unwrap();
        let err = Pidfile::create(&path).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn reclaims_stale_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotad.pid");
        // Reap a short-lived child so its pid is known to be free.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let stale = child.id();
        child.wait().unwrap();
        std::fs::write(&path, format!("{stale}\n")).unwrap();

        Pidfile::create(&path).unwrap().write_pid(7).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "7");
    }

    #[test]
    fn unknown_user_is_rejected() {
        assert!(lookup_user("no-such-user-quotad").is_err());
    }
}

//! Creation of the listening Unix socket.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::Path;

use nix::sys::stat::{Mode, umask};
use socket2::{Domain, SockAddr, Socket, Type};

/// Pending-connection backlog passed to `listen`.
pub const BACKLOG: i32 = 10;

/// Binds a non-blocking stream socket at `path` with the given file mode.
///
/// The socket file never exists with a laxer mode than requested: it is
/// created under a `0777` umask and then opened up with `chmod`. A stale
/// socket file left at `path` is replaced.
pub fn bind(path: &Path, mode: u32) -> io::Result<UnixListener> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let addr = SockAddr::unix(path)?;

    let previous = umask(Mode::from_bits_truncate(0o777));
    let bound = bind_replacing(&socket, &addr, path);
    umask(previous);
    bound?;

    fs::set_permissions(path, Permissions::from_mode(mode))?;
    socket.listen(BACKLOG)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn bind_replacing(socket: &Socket, addr: &SockAddr, path: &Path) -> io::Result<()> {
    match socket.bind(addr) {
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            fs::remove_file(path)?;
            socket.bind(addr)
        }
        other => other,
    }
}

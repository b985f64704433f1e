use std::io::{self, BufRead, IsTerminal, Write};

/// Reads one password line from stdin. On a terminal the prompt goes to
/// stderr and echo is switched off until the line is read; piped input is
/// read as-is.
pub fn read_password(prompt: &str) -> io::Result<String> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return read_password_line(stdin.lock());
    }

    let mut stderr = io::stderr();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let line = {
        let _echo = EchoOff::engage();
        read_password_line(stdin.lock())
    };
    writeln!(stderr)?;
    line
}

pub fn read_password_line(mut input: impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "no password on stdin",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Terminal echo stays off while this is alive.
#[cfg(unix)]
struct EchoOff {
    saved: nix::sys::termios::Termios,
}

#[cfg(unix)]
impl EchoOff {
    fn engage() -> Option<Self> {
        use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};
        use std::os::fd::AsFd;

        let stdin = io::stdin();
        let saved = tcgetattr(stdin.as_fd()).ok()?;
        let mut quiet = saved.clone();
        quiet.local_flags.remove(LocalFlags::ECHO);
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &quiet).ok()?;
        Some(Self { saved })
    }
}

#[cfg(unix)]
impl Drop for EchoOff {
    fn drop(&mut self) {
        use nix::sys::termios::{tcsetattr, SetArg};
        use std::os::fd::AsFd;

        let _ = tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, &self.saved);
    }
}

#[cfg(not(unix))]
struct EchoOff;

#[cfg(not(unix))]
impl EchoOff {
    fn engage() -> Option<Self> {
        None
    }
}

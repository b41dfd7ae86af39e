use std::path::Path;

// ---------------------------------------------------------------------------
// ShellProfile — per-platform shell capabilities
// ---------------------------------------------------------------------------

/// Command syntax family of a shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    /// Bourne-compatible (`sh`, `bash`, `zsh`).
    Posix,
    /// Windows `cmd.exe`.
    Cmd,
}

/// How to launch and talk to the interpreter on one platform.
///
/// Every platform difference the session cares about lives here, so the
/// rest of the crate never branches on the host OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellProfile {
    /// `std::env::consts::OS` value this profile serves.
    pub platform: &'static str,
    pub program: &'static str,
    pub args: &'static [&'static str],
    pub family: ShellFamily,
    pub exit_command: &'static str,
    pub pwd_command: &'static str,
    /// Source of empty stdin for dispatched commands.
    pub null_device: &'static str,
    /// Whether the interpreter echoes each input line back on stdout.
    pub echoes_input: bool,
    /// Sent once after spawn to route the interpreter's own stderr into
    /// stdout.
    pub merge_stderr_command: Option<&'static str>,
    /// Program and leading args that parse a command without running it.
    pub syntax_check: Option<(&'static str, &'static [&'static str])>,
}

const POSIX: ShellProfile = ShellProfile {
    platform: "unix",
    program: "/bin/sh",
    args: &[],
    family: ShellFamily::Posix,
    exit_command: "exit",
    pwd_command: "pwd",
    null_device: "/dev/null",
    echoes_input: false,
    merge_stderr_command: Some("exec 2>&1"),
    syntax_check: Some(("/bin/sh", &["-n", "-c"])),
};

const PROFILES: &[ShellProfile] = &[
    ShellProfile {
        platform: "windows",
        program: "cmd.exe",
        args: &["/Q"],
        family: ShellFamily::Cmd,
        exit_command: "exit",
        pwd_command: "cd",
        null_device: "NUL",
        echoes_input: true,
        merge_stderr_command: None,
        syntax_check: None,
    },
    ShellProfile {
        platform: "linux",
        ..POSIX
    },
    ShellProfile {
        platform: "macos",
        ..POSIX
    },
    ShellProfile {
        platform: "freebsd",
        ..POSIX
    },
];

impl ShellProfile {
    /// Look up the profile for a platform identifier. Unknown platforms get
    /// the POSIX profile.
    pub fn for_platform(platform: &str) -> ShellProfile {
        PROFILES
            .iter()
            .find(|p| p.platform == platform)
            .copied()
            .unwrap_or(POSIX)
    }

    /// Profile for the host this binary runs on.
    pub fn native() -> ShellProfile {
        Self::for_platform(std::env::consts::OS)
    }

    /// Change directory, including drive changes on Windows.
    pub fn cd_command(&self, dir: &Path) -> String {
        match self.family {
            ShellFamily::Posix => format!("cd {}", self.quote(&dir.to_string_lossy())),
            ShellFamily::Cmd => format!("cd /d {}", self.quote(&dir.to_string_lossy())),
        }
    }

    /// Wrap `command` so it reads from the null device and writes stdout and
    /// stderr to `artifact`. The group runs in the current shell, so `cd`
    /// and variable assignments persist.
    pub fn redirect(&self, command: &str, artifact: &Path) -> String {
        let target = self.quote(&artifact.to_string_lossy());
        match self.family {
            ShellFamily::Posix => format!(
                "{{ {command}\n}} < {} > {target} 2>&1",
                self.null_device
            ),
            ShellFamily::Cmd => format!("({command}) < {} > {target} 2>&1", self.null_device),
        }
    }

    /// Wrap `command` so it cannot consume the session's own stdin and
    /// its stderr shares stdout with the sentinel.
    pub fn detach_stdin(&self, command: &str) -> String {
        match self.family {
            ShellFamily::Posix => format!("{{ {command}\n}} < {} 2>&1", self.null_device),
            ShellFamily::Cmd => format!("({command}) < {} 2>&1", self.null_device),
        }
    }

    /// Echo `<sentinel> <seq> <status of previous command>`.
    pub fn sentinel_command(&self, sentinel: &str, seq: u64) -> String {
        match self.family {
            ShellFamily::Posix => format!("echo \"{sentinel} {seq} $?\""),
            ShellFamily::Cmd => format!("echo {sentinel} {seq} %ERRORLEVEL%"),
        }
    }

    /// Whether `line` is the interpreter echoing `command` back (cmd.exe
    /// prints `C:\dir>command` for each input line).
    pub fn is_input_echo(&self, line: &str, command: &str) -> bool {
        if !self.echoes_input {
            return false;
        }
        let line = line.trim_end();
        line.ends_with(&format!(">{command}"))
    }

    /// Decode raw interpreter output. Invalid sequences become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    fn quote(&self, raw: &str) -> String {
        match self.family {
            ShellFamily::Posix => format!("'{}'", raw.replace('\'', r"'\''")),
            ShellFamily::Cmd => format!("\"{}\"", raw.replace('"', "")),
        }
    }
}

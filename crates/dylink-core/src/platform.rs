//! Host platform details the build needs: which shell to run, how that
//! shell records exit statuses, and the shared-library extension.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Command syntax family of a worker shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellFlavor {
    /// `sh`, `bash`, `zsh` and friends.
    Posix,
    /// `cmd.exe`.
    Windows,
}

impl ShellFlavor {
    /// Flavor matching the host this binary was built for.
    pub const fn host() -> Self {
        if cfg!(windows) {
            ShellFlavor::Windows
        } else {
            ShellFlavor::Posix
        }
    }

    /// Quote `arg` so the shell reads it as one literal word.
    ///
    /// POSIX shells get single quotes, with embedded `'` written as `'\''`.
    /// `cmd.exe` gets double quotes.
    pub fn quote(&self, arg: &str) -> String {
        match self {
            ShellFlavor::Posix => format!("'{}'", arg.replace('\'', r"'\''")),
            ShellFlavor::Windows => format!("\"{arg}\""),
        }
    }

    /// Like [`quote`](Self::quote), but plain words such as `src/main.c`
    /// are returned unchanged.
    pub fn quote_if_needed<'a>(&self, arg: &'a str) -> Cow<'a, str> {
        let plain = !arg.is_empty()
            && arg.chars().all(|c| {
                c.is_ascii_alphanumeric()
                    || "_-./+:,@=".contains(c)
                    || (c == '\\' && *self == ShellFlavor::Windows)
            });
        if plain {
            Cow::Borrowed(arg)
        } else {
            Cow::Owned(self.quote(arg))
        }
    }

    /// Command that creates (or truncates) `file`.
    pub fn create_file_command(&self, file: &Path) -> String {
        let file = self.quote(&file.display().to_string());
        match self {
            ShellFlavor::Posix => format!("> {file}"),
            ShellFlavor::Windows => format!("type NUL > {file}"),
        }
    }

    /// Command that appends the previous command's exit status to `file`.
    pub fn record_status_command(&self, file: &Path) -> String {
        let file = self.quote(&file.display().to_string());
        match self {
            ShellFlavor::Posix => format!("echo $? >> {file}"),
            ShellFlavor::Windows => format!("echo %errorlevel% >> {file}"),
        }
    }
}

/// A shell program plus the arguments it is started with.
///
/// Deserializes from a command line string such as `"/bin/bash"` or
/// `"bash --norc"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Shell {
    /// Program to execute
    pub program: PathBuf,

    /// Arguments passed before the session's input is streamed in
    pub args: Vec<String>,
}

impl Shell {
    /// Create a shell with no extra arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Split a whitespace-separated command line into program and arguments.
    ///
    /// Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
        })
    }
}

impl Default for Shell {
    fn default() -> Self {
        default_shell()
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Shell {
    type Error = String;

    fn try_from(line: String) -> Result<Self, Self::Error> {
        Shell::from_command_line(&line).ok_or_else(|| "shell must not be empty".to_string())
    }
}

impl From<Shell> for String {
    fn from(shell: Shell) -> Self {
        shell.to_string()
    }
}

/// Shell used when a recipe does not name one.
///
/// `cmd.exe` on Windows. Elsewhere `$SHELL`, then `sh` from PATH, then
/// `/bin/sh`.
pub fn default_shell() -> Shell {
    if cfg!(windows) {
        return Shell::new("cmd.exe");
    }

    if let Some(shell) = std::env::var("SHELL")
        .ok()
        .and_then(|line| Shell::from_command_line(&line))
    {
        return shell;
    }

    match which::which("sh") {
        Ok(path) => Shell::new(path),
        Err(_) => Shell::new("/bin/sh"),
    }
}

/// Platform-specific shared library extension, including the dot.
pub fn library_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ".dll"
    }
    #[cfg(target_os = "macos")]
    {
        ".dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        ".so"
    }
}

/// Number of cores available to this process, at least 1.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_commands() {
        let file = Path::new("/tmp/build/retcode_cpu0.txt");
        assert_eq!(
            ShellFlavor::Posix.create_file_command(file),
            "> '/tmp/build/retcode_cpu0.txt'"
        );
        assert_eq!(
            ShellFlavor::Posix.record_status_command(file),
            "echo $? >> '/tmp/build/retcode_cpu0.txt'"
        );
    }

    #[test]
    fn test_posix_quoting_is_literal() {
        let posix = ShellFlavor::Posix;
        assert_eq!(posix.quote("build$HOME"), "'build$HOME'");
        assert_eq!(posix.quote("it's"), r"'it'\''s'");
        assert_eq!(
            posix.record_status_command(Path::new("/tmp/a `b`/retcode_cpu0.txt")),
            "echo $? >> '/tmp/a `b`/retcode_cpu0.txt'"
        );
    }

    #[test]
    fn test_quote_if_needed() {
        let posix = ShellFlavor::Posix;
        assert_eq!(posix.quote_if_needed("src/main.c"), "src/main.c");
        assert_eq!(posix.quote_if_needed("my file.c"), "'my file.c'");
        assert_eq!(posix.quote_if_needed(""), "''");

        let windows = ShellFlavor::Windows;
        assert_eq!(windows.quote_if_needed(r"C:\src\main.c"), r"C:\src\main.c");
        assert_eq!(windows.quote_if_needed("my file.c"), "\"my file.c\"");
    }

    #[test]
    fn test_windows_commands() {
        let file = Path::new("retcode_cpu1.txt");
        assert_eq!(
            ShellFlavor::Windows.create_file_command(file),
            "type NUL > \"retcode_cpu1.txt\""
        );
        assert_eq!(
            ShellFlavor::Windows.record_status_command(file),
            "echo %errorlevel% >> \"retcode_cpu1.txt\""
        );
    }

    #[test]
    fn test_host_flavor() {
        #[cfg(windows)]
        assert_eq!(ShellFlavor::host(), ShellFlavor::Windows);
        #[cfg(not(windows))]
        assert_eq!(ShellFlavor::host(), ShellFlavor::Posix);
    }

    #[test]
    fn test_shell_from_command_line() {
        let shell = Shell::from_command_line("  /bin/bash --norc  ").unwrap();
        assert_eq!(shell.program, PathBuf::from("/bin/bash"));
        assert_eq!(shell.args, vec!["--norc".to_string()]);
        assert_eq!(shell.to_string(), "/bin/bash --norc");

        assert!(Shell::from_command_line("   ").is_none());
    }

    #[test]
    fn test_shell_serde() {
        let shell: Shell = serde_json::from_str("\"sh -e\"").unwrap();
        assert_eq!(shell.program, PathBuf::from("sh"));
        assert_eq!(serde_json::to_string(&shell).unwrap(), "\"sh -e\"");

        assert!(serde_json::from_str::<Shell>("\"\"").is_err());
    }

    #[test]
    fn test_library_extension() {
        let ext = library_extension();
        #[cfg(target_os = "linux")]
        assert_eq!(ext, ".so");
        #[cfg(target_os = "macos")]
        assert_eq!(ext, ".dylib");
        #[cfg(target_os = "windows")]
        assert_eq!(ext, ".dll");
    }

    #[test]
    fn test_available_cores() {
        assert!(available_cores() >= 1);
    }
}

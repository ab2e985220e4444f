//! Built-in commands, parsed with [`argh`] and executed in-process.

use crate::env::Environment;
use crate::executor::{errno_message, ExitCode};
use crate::history::History;
use crate::resolver::PathResolver;
use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The builtin names this shell recognises.
pub const NAMES: &[&str] = &["cd", "echo", "exit", "history", "pwd", "type"];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Shell state a builtin may read or mutate.
pub struct BuiltinContext<'a> {
    pub env: &'a mut Environment,
    pub history: &'a mut History,
    pub resolver: &'a PathResolver,
}

/// A builtin command: an [`FromArgs`] struct with a canonical name.
///
/// Return value follows shell conventions: 0 for success, non-zero for
/// error.
pub(crate) trait Builtin: FromArgs {
    fn name() -> &'static str;

    fn execute(
        self,
        ctx: &mut BuiltinContext<'_>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode>;
}

/// Dispatch an argument vector against the builtin set.
///
/// Returns `None` iff `argv[0]` is not a builtin name; otherwise the
/// builtin's exit code. Argument errors print argh's usage output and yield
/// exit 1.
pub fn run(
    ctx: &mut BuiltinContext<'_>,
    argv: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Option<ExitCode> {
    let name = argv.first()?;
    let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
    let code = match name.as_str() {
        "cd" => invoke::<Cd>(ctx, &args, stdout, stderr),
        "echo" => invoke::<Echo>(ctx, &args, stdout, stderr),
        "exit" => invoke::<Exit>(ctx, &args, stdout, stderr),
        "history" => invoke::<HistoryCmd>(ctx, &args, stdout, stderr),
        "pwd" => invoke::<Pwd>(ctx, &args, stdout, stderr),
        "type" => invoke::<Type>(ctx, &args, stdout, stderr),
        _ => return None,
    };
    Some(code)
}

fn invoke<T: Builtin>(
    ctx: &mut BuiltinContext<'_>,
    args: &[&str],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> ExitCode {
    match T::from_args(&[T::name()], args) {
        Ok(cmd) => match cmd.execute(ctx, stdout, stderr) {
            Ok(code) => code,
            Err(e) => {
                let _ = writeln!(stderr, "{}: {e}", T::name());
                1
            }
        },
        Err(EarlyExit { output, status }) => {
            if status.is_ok() {
                let _ = writeln!(stdout, "{output}");
                0
            } else {
                let _ = writeln!(stderr, "{output}");
                1
            }
        }
    }
}

#[derive(FromArgs)]
/// Report the working directory of the shell process.
pub struct Pwd {}

impl Builtin for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _ctx: &mut BuiltinContext<'_>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        // The working directory can vanish under the shell (deleted while
        // we sit in it); report that like any other filesystem error.
        match std::env::current_dir() {
            Ok(cwd) => {
                writeln!(stdout, "{}", cwd.display())?;
                Ok(0)
            }
            Err(e) => {
                writeln!(stderr, "pwd: {}", errno_message(&e))?;
                Ok(1)
            }
        }
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
pub struct Cd {
    /// directory to switch to; defaults to $HOME, and a leading ~ expands to
    /// $HOME
    #[argh(positional)]
    target: Option<String>,
}

impl Builtin for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        ctx: &mut BuiltinContext<'_>,
        _stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let target = match self.target.as_deref() {
            None | Some("") | Some("~") => match ctx.env.home() {
                Some(home) => PathBuf::from(home),
                None => {
                    writeln!(stderr, "cd: HOME not set")?;
                    return Ok(1);
                }
            },
            Some(t) => match t.strip_prefix("~/") {
                Some(rest) => match ctx.env.home() {
                    Some(home) => Path::new(&home).join(rest),
                    None => {
                        writeln!(stderr, "cd: HOME not set")?;
                        return Ok(1);
                    }
                },
                None => PathBuf::from(t),
            },
        };
        match std::env::set_current_dir(&target) {
            Ok(()) => Ok(0),
            Err(e) => {
                writeln!(stderr, "cd: {}: {}", target.display(), errno_message(&e))?;
                Ok(1)
            }
        }
    }
}

#[derive(FromArgs)]
/// Print each word to standard output with single spaces between them.
pub struct Echo {
    /// suppress the newline that normally ends the output
    #[argh(switch, short = 'n')]
    no_trailing_newline: bool,

    /// words to print; quoting has already been decoded by the tokenizer
    #[argh(positional, greedy)]
    words: Vec<String>,
}

impl Builtin for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        _ctx: &mut BuiltinContext<'_>,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        // Words are written as raw bytes; the tokenizer passes non-UTF-8
        // input through and echo must not mangle it further.
        for (i, word) in self.words.iter().enumerate() {
            if i > 0 {
                stdout.write_all(b" ")?;
            }
            stdout.write_all(word.as_bytes())?;
        }
        if !self.no_trailing_newline {
            stdout.write_all(b"\n")?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Terminate the shell.
pub struct Exit {
    /// exit status; defaults to the last command's status
    #[argh(positional)]
    code: Option<i32>,
}

impl Builtin for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        ctx: &mut BuiltinContext<'_>,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let code = self.code.unwrap_or(ctx.env.last_status);
        ctx.env.pending_exit = Some(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Describe how each command name would be interpreted.
pub struct Type {
    /// command names to look up
    #[argh(positional, greedy)]
    names: Vec<String>,
}

impl Builtin for Type {
    fn name() -> &'static str {
        "type"
    }

    fn execute(
        self,
        ctx: &mut BuiltinContext<'_>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let mut code = 0;
        for name in &self.names {
            if is_builtin(name) {
                writeln!(stdout, "{name} is a shell builtin")?;
            } else if let Some(path) = ctx.resolver.resolve(name) {
                writeln!(stdout, "{name} is {}", path.display())?;
            } else {
                writeln!(stderr, "{name}: not found")?;
                code = 1;
            }
        }
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Display or manipulate the history list.
pub struct HistoryCmd {
    /// append entries accumulated since the last append to the named file
    #[argh(option, short = 'a', arg_name = "file")]
    append: Option<String>,

    /// read the named file and add its entries to the history
    #[argh(option, short = 'r', arg_name = "file")]
    read: Option<String>,

    /// rewrite the named file with the full history
    #[argh(option, short = 'w', arg_name = "file")]
    write: Option<String>,

    /// show only the last N entries
    #[argh(positional)]
    count: Option<usize>,
}

impl Builtin for HistoryCmd {
    fn name() -> &'static str {
        "history"
    }

    fn execute(
        self,
        ctx: &mut BuiltinContext<'_>,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let file_op: Option<(&str, fn(&mut History, &Path) -> std::io::Result<()>)> =
            if let Some(path) = &self.append {
                Some((path.as_str(), History::append))
            } else if let Some(path) = &self.read {
                Some((path.as_str(), History::load))
            } else if let Some(path) = &self.write {
                Some((path.as_str(), History::write))
            } else {
                None
            };
        if let Some((path, op)) = file_op {
            return match op(ctx.history, Path::new(path)) {
                Ok(()) => Ok(0),
                Err(e) => {
                    writeln!(stderr, "history: {path}: {}", errno_message(&e))?;
                    Ok(1)
                }
            };
        }

        // Numbering is absolute within the session even when a count limits
        // the output.
        let start = match self.count {
            Some(n) => ctx.history.len().saturating_sub(n),
            None => 0,
        };
        for (i, entry) in ctx.history.iter().enumerate().skip(start) {
            writeln!(stdout, "{:5}  {}", i + 1, entry)?;
        }
        Ok(0)
    }
}

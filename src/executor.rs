//! Pipeline construction from tokens and pipeline execution.
//!
//! Non-final stages always run in forked children wired together with
//! pipes. A single builtin with no pipe neighbours runs in the shell
//! process so `cd`, `exit` and `history` can reach shell state.

use crate::builtin::{self, BuiltinContext};
use crate::env::Environment;
use crate::history::History;
use crate::lexer::Token;
use crate::resolver::PathResolver;
use crate::terminal::Terminal;
use anyhow::Result;
use nix::unistd::{close, dup2, execv, fork, pipe, ForkResult, Pid};
use std::ffi::CString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{IntoRawFd, RawFd};

/// Conventional process exit code: 0 for success, non-zero for failure.
pub type ExitCode = i32;

/// One pipeline stage: an argument vector plus optional stdout/stderr
/// redirection targets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub stdout_file: Option<String>,
    pub stdout_append: bool,
    pub stderr_file: Option<String>,
    pub stderr_append: bool,
}

/// An ordered sequence of at least one command connected by pipes.
#[derive(Debug, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

/// Errors raised while turning tokens into a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A redirection operator was not followed by a word.
    MissingRedirectTarget,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingRedirectTarget => write!(f, "missing redirect target"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Shell state the executor threads through builtin invocations.
pub struct ExecContext<'a> {
    pub term: &'a mut Terminal,
    pub resolver: &'a PathResolver,
    pub env: &'a mut Environment,
    pub history: &'a mut History,
}

/// Scan tokens left to right into a pipeline.
///
/// Words accumulate onto the current command, a redirection operator binds
/// the following word to the current command, and `|` starts the next
/// command. A stage with an empty `argv` is legal and executes as a no-op.
pub fn parse(tokens: &[Token]) -> Result<Pipeline, ParseError> {
    let mut commands = Vec::new();
    let mut cur = Command::default();
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(word) => cur.argv.push(word.clone()),
            Token::Pipe => commands.push(std::mem::take(&mut cur)),
            redirect => {
                let target = match iter.next() {
                    Some(Token::Word(word)) => word.clone(),
                    _ => return Err(ParseError::MissingRedirectTarget),
                };
                match redirect {
                    Token::RedirectOut => {
                        cur.stdout_file = Some(target);
                        cur.stdout_append = false;
                    }
                    Token::RedirectAppend => {
                        cur.stdout_file = Some(target);
                        cur.stdout_append = true;
                    }
                    Token::RedirectErr => {
                        cur.stderr_file = Some(target);
                        cur.stderr_append = false;
                    }
                    Token::RedirectErrAppend => {
                        cur.stderr_file = Some(target);
                        cur.stderr_append = true;
                    }
                    _ => unreachable!(),
                }
            }
        }
    }
    commands.push(cur);
    Ok(Pipeline { commands })
}

/// Execute a pipeline and return its exit status (the final stage's).
pub fn execute(pipeline: &Pipeline, ctx: &mut ExecContext<'_>) -> Result<ExitCode> {
    let n = pipeline.commands.len();
    tracing::debug!(stages = n, "executing pipeline");

    if n == 1 && is_builtin_stage(&pipeline.commands[0]) {
        return run_builtin_in_parent(&pipeline.commands[0], ctx);
    }

    let has_external = pipeline
        .commands
        .iter()
        .any(|c| c.argv.first().is_some_and(|name| !builtin::is_builtin(name)));
    // External children expect an ordinary terminal.
    if has_external {
        ctx.term.restore_cooked()?;
    }

    let mut children: Vec<Pid> = Vec::new();
    let mut stdin_fd: Option<RawFd> = None;
    let mut fork_failed = false;
    for (i, cmd) in pipeline.commands.iter().enumerate() {
        let is_last = i + 1 == n;
        let pipe_fds: Option<(RawFd, RawFd)> = if is_last {
            None
        } else {
            let (r, w) = pipe()?;
            Some((r.into_raw_fd(), w.into_raw_fd()))
        };

        match unsafe { fork() } {
            Ok(ForkResult::Child) => run_stage_in_child(cmd, stdin_fd, pipe_fds, ctx),
            Ok(ForkResult::Parent { child }) => {
                children.push(child);
                // The stage consumed its stdin fd; drop the parent's copy
                // right away so pipes see EOF when writers finish.
                if let Some(fd) = stdin_fd.take() {
                    let _ = close(fd);
                }
                if let Some((r, w)) = pipe_fds {
                    let _ = close(w);
                    stdin_fd = Some(r);
                }
            }
            Err(e) => {
                let name = cmd.argv.first().map(String::as_str).unwrap_or("");
                eprintln!("{name}: fork failed: {e}");
                if let Some((r, w)) = pipe_fds {
                    let _ = close(r);
                    let _ = close(w);
                }
                fork_failed = true;
                break;
            }
        }
    }
    if let Some(fd) = stdin_fd.take() {
        let _ = close(fd);
    }

    let mut last_code = 0;
    for pid in &children {
        last_code = wait_for(*pid);
    }
    tracing::debug!(reaped = children.len(), status = last_code, "pipeline finished");

    if has_external {
        ctx.term.enter_raw()?;
    }
    if fork_failed {
        return Ok(1);
    }
    Ok(last_code)
}

fn is_builtin_stage(cmd: &Command) -> bool {
    cmd.argv.first().is_some_and(|name| builtin::is_builtin(name))
}

/// A lone builtin runs in the shell process. Redirect targets are opened
/// here and handed to the builtin as writers, flushed on return.
fn run_builtin_in_parent(cmd: &Command, ctx: &mut ExecContext<'_>) -> Result<ExitCode> {
    let mut stdout: Box<dyn Write> = match &cmd.stdout_file {
        Some(path) => match open_redirect(path, cmd.stdout_append) {
            Ok(file) => Box::new(file),
            Err(e) => {
                eprintln!("{path}: {}", errno_message(&e));
                return Ok(1);
            }
        },
        None => Box::new(io::stdout()),
    };
    let mut stderr: Box<dyn Write> = match &cmd.stderr_file {
        Some(path) => match open_redirect(path, cmd.stderr_append) {
            Ok(file) => Box::new(file),
            Err(e) => {
                eprintln!("{path}: {}", errno_message(&e));
                return Ok(1);
            }
        },
        None => Box::new(io::stderr()),
    };

    let mut bctx = BuiltinContext {
        env: &mut *ctx.env,
        history: &mut *ctx.history,
        resolver: ctx.resolver,
    };
    let code = builtin::run(&mut bctx, &cmd.argv, &mut stdout, &mut stderr).unwrap_or(127);
    stdout.flush()?;
    stderr.flush()?;
    Ok(code)
}

/// Forked stage body. Never returns: the child exits with the stage's code.
fn run_stage_in_child(
    cmd: &Command,
    stdin_fd: Option<RawFd>,
    pipe_fds: Option<(RawFd, RawFd)>,
    ctx: &mut ExecContext<'_>,
) -> ! {
    if let Some(fd) = stdin_fd {
        let _ = dup2(fd, 0);
        let _ = close(fd);
    }
    if let Some((r, w)) = pipe_fds {
        let _ = close(r);
        // An explicit stdout file wins over the pipe; the next stage then
        // reads an empty stream.
        if cmd.stdout_file.is_none() {
            let _ = dup2(w, 1);
        }
        let _ = close(w);
    }
    if apply_redirects(cmd).is_err() {
        std::process::exit(1);
    }
    if cmd.argv.is_empty() {
        std::process::exit(0);
    }
    if builtin::is_builtin(&cmd.argv[0]) {
        let mut bctx = BuiltinContext {
            env: &mut *ctx.env,
            history: &mut *ctx.history,
            resolver: ctx.resolver,
        };
        let mut stdout = io::stdout();
        let mut stderr = io::stderr();
        let code = builtin::run(&mut bctx, &cmd.argv, &mut stdout, &mut stderr).unwrap_or(127);
        let _ = stdout.flush();
        let _ = stderr.flush();
        std::process::exit(code);
    }
    exec_external(cmd, ctx.resolver)
}

/// Open redirect targets and install them on fds 1 and 2. An open failure
/// reports `"<file>: <reason>"` on whatever stderr currently is.
fn apply_redirects(cmd: &Command) -> std::result::Result<(), ()> {
    if let Some(path) = &cmd.stdout_file {
        match open_redirect(path, cmd.stdout_append) {
            Ok(file) => {
                let fd = file.into_raw_fd();
                let _ = dup2(fd, 1);
                let _ = close(fd);
            }
            Err(e) => {
                eprintln!("{path}: {}", errno_message(&e));
                return Err(());
            }
        }
    }
    if let Some(path) = &cmd.stderr_file {
        match open_redirect(path, cmd.stderr_append) {
            Ok(file) => {
                let fd = file.into_raw_fd();
                let _ = dup2(fd, 2);
                let _ = close(fd);
            }
            Err(e) => {
                eprintln!("{path}: {}", errno_message(&e));
                return Err(());
            }
        }
    }
    Ok(())
}

fn open_redirect(path: &str, append: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).mode(0o644);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    opts.open(path)
}

/// Resolve and exec an external command. The resolved path is executed but
/// `argv[0]` keeps the name the user typed.
fn exec_external(cmd: &Command, resolver: &PathResolver) -> ! {
    let name = &cmd.argv[0];
    let path = match resolver.resolve(name) {
        Some(path) => path,
        None => {
            let msg = format!("{name}: command not found\n");
            unsafe {
                libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
            }
            std::process::exit(127);
        }
    };
    let prog = match CString::new(path.as_os_str().as_bytes()) {
        Ok(prog) => prog,
        Err(_) => std::process::exit(126),
    };
    let argv: std::result::Result<Vec<CString>, _> =
        cmd.argv.iter().map(|arg| CString::new(arg.as_bytes())).collect();
    let argv = match argv {
        Ok(argv) => argv,
        Err(_) => std::process::exit(126),
    };
    let _ = execv(&prog, &argv);
    std::process::exit(126);
}

/// Reap one child and map its wait status to a shell exit code: the plain
/// status for a normal exit, `128 + signal` for a signal death.
fn wait_for(pid: Pid) -> ExitCode {
    let mut status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
        if rc >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return 1;
        }
    }
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// Human-readable errno text for filesystem error reporting.
pub(crate) fn errno_message(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => nix::errno::Errno::from_raw(code).desc().to_string(),
        None => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::MemWriter;
    use crate::lexer::tokenize;
    use std::fs;
    use std::path::PathBuf;

    fn parse_line(line: &str) -> Pipeline {
        parse(&tokenize(line).unwrap()).unwrap()
    }

    fn cmd(argv: &[&str]) -> Command {
        Command {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            ..Command::default()
        }
    }

    #[test]
    fn parses_a_simple_command() {
        let pipeline = parse_line("echo hello world");
        assert_eq!(pipeline.commands, vec![cmd(&["echo", "hello", "world"])]);
    }

    #[test]
    fn parses_pipes_into_stages() {
        let pipeline = parse_line("ls | grep x | wc");
        assert_eq!(
            pipeline.commands,
            vec![cmd(&["ls"]), cmd(&["grep", "x"]), cmd(&["wc"])]
        );
    }

    #[test]
    fn parses_redirections() {
        let pipeline = parse_line("echo hi > out.txt 2>> err.txt");
        assert_eq!(
            pipeline.commands,
            vec![Command {
                argv: vec!["echo".into(), "hi".into()],
                stdout_file: Some("out.txt".into()),
                stdout_append: false,
                stderr_file: Some("err.txt".into()),
                stderr_append: true,
            }]
        );
    }

    #[test]
    fn later_redirects_win() {
        let pipeline = parse_line("echo > a > b");
        assert_eq!(pipeline.commands[0].stdout_file.as_deref(), Some("b"));
    }

    #[test]
    fn redirect_without_target_is_an_error() {
        assert_eq!(
            parse(&tokenize("echo hi >").unwrap()),
            Err(ParseError::MissingRedirectTarget)
        );
        assert_eq!(
            parse(&tokenize("echo 2> | wc").unwrap()),
            Err(ParseError::MissingRedirectTarget)
        );
    }

    #[test]
    fn empty_stages_are_allowed() {
        let pipeline = parse_line("a | | b");
        assert_eq!(pipeline.commands.len(), 3);
        assert!(pipeline.commands[1].argv.is_empty());
    }

    // --- execution ---

    struct ExecFixture {
        term: Terminal,
        resolver: PathResolver,
        env: Environment,
        history: History,
    }

    impl ExecFixture {
        fn new() -> Self {
            ExecFixture {
                term: Terminal::with_writer(Box::new(MemWriter::new()), false),
                resolver: PathResolver::from_env(),
                env: Environment::new(),
                history: History::new(),
            }
        }

        fn run(&mut self, line: &str) -> ExitCode {
            let pipeline = parse_line(line);
            let mut ctx = ExecContext {
                term: &mut self.term,
                resolver: &self.resolver,
                env: &mut self.env,
                history: &mut self.history,
            };
            execute(&pipeline, &mut ctx).unwrap()
        }
    }

    fn scratch_path(tag: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("executor_tests_{}_{tag}", std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn builtin_redirect_writes_the_file() {
        let path = scratch_path("builtin_redirect");
        let mut fixture = ExecFixture::new();
        let status = fixture.run(&format!("echo test>{}", path.display()));
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "test\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_redirect_accumulates() {
        let path = scratch_path("append");
        let mut fixture = ExecFixture::new();
        fixture.run(&format!("echo one > {}", path.display()));
        fixture.run(&format!("echo two >> {}", path.display()));
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn external_exit_status_propagates() {
        let mut fixture = ExecFixture::new();
        assert_eq!(fixture.run("sh -c 'exit 3'"), 3);
        assert_eq!(fixture.run("sh -c 'exit 0'"), 0);
    }

    #[test]
    fn command_not_found_is_127() {
        let path = scratch_path("not_found");
        let mut fixture = ExecFixture::new();
        let status = fixture.run(&format!("definitely-no-such-cmd 2> {}", path.display()));
        assert_eq!(status, 127);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "definitely-no-such-cmd: command not found\n"
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        let mut fixture = ExecFixture::new();
        assert_eq!(fixture.run("sh -c 'kill -9 $$'"), 137);
    }

    #[test]
    fn pipeline_carries_bytes_between_stages() {
        let path = scratch_path("pipeline_bytes");
        let mut fixture = ExecFixture::new();
        let status = fixture.run(&format!("echo hello | sh -c cat > {}", path.display()));
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn external_stages_exchange_bytes_unchanged() {
        let path = scratch_path("external_bytes");
        let mut fixture = ExecFixture::new();
        let status = fixture.run(&format!(
            "sh -c 'printf one\\\\ntwo\\\\n' | sh -c cat > {}",
            path.display()
        ));
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn pipeline_status_is_the_last_stages() {
        let mut fixture = ExecFixture::new();
        assert_eq!(fixture.run("sh -c 'exit 3' | sh -c 'exit 5'"), 5);
        assert_eq!(fixture.run("sh -c 'exit 5' | sh -c 'exit 0'"), 0);
    }

    #[test]
    fn stdout_file_beats_the_pipe() {
        let captured = scratch_path("beats_pipe_file");
        let downstream = scratch_path("beats_pipe_rest");
        let mut fixture = ExecFixture::new();
        let status = fixture.run(&format!(
            "echo hi > {} | sh -c cat > {}",
            captured.display(),
            downstream.display()
        ));
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&captured).unwrap(), "hi\n");
        // The successor saw an empty stream.
        assert_eq!(fs::read_to_string(&downstream).unwrap(), "");
        let _ = fs::remove_file(&captured);
        let _ = fs::remove_file(&downstream);
    }

    #[test]
    fn bare_redirect_creates_the_file() {
        let path = scratch_path("bare_redirect");
        let mut fixture = ExecFixture::new();
        let status = fixture.run(&format!("> {}", path.display()));
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn unopenable_redirect_target_fails_with_1() {
        let mut fixture = ExecFixture::new();
        assert_eq!(fixture.run("echo hi > /no/such/dir/file"), 1);
    }

    #[test]
    fn exit_in_a_pipeline_does_not_stop_the_shell() {
        let mut fixture = ExecFixture::new();
        let status = fixture.run("exit 9 | sh -c 'exit 0'");
        assert_eq!(status, 0);
        assert_eq!(fixture.env.pending_exit, None);
    }
}

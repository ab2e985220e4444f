use anyhow::Result;
use rshell::{executor, lexer};
use rshell::{Environment, ExecContext, LineEditor, PathResolver, Terminal};
use tracing_subscriber::EnvFilter;

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("rshell: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    // Diagnostics go to stderr and stay silent unless RUST_LOG asks for
    // them, keeping the terminal UI clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut term = Terminal::new()?;
    let resolver = PathResolver::from_env();
    let mut env = Environment::new();
    let mut editor = LineEditor::new();

    if let Some(path) = env.histfile() {
        if let Err(e) = editor.history_mut().load(&path) {
            eprintln!("rshell: {}: {e}", path.display());
        }
    }

    let exit_code = loop {
        let line = match editor.read_line(&mut term, &resolver)? {
            Some(line) => line,
            None => break env.last_status,
        };
        editor.record(&line);

        let tokens = match lexer::tokenize(&line) {
            Ok(tokens) => tokens,
            Err(e) => {
                eprintln!("rshell: {e}");
                env.last_status = 1;
                continue;
            }
        };
        if tokens.is_empty() {
            continue;
        }
        let pipeline = match executor::parse(&tokens) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                eprintln!("rshell: {e}");
                env.last_status = 1;
                continue;
            }
        };

        let mut ctx = ExecContext {
            term: &mut term,
            resolver: &resolver,
            env: &mut env,
            history: editor.history_mut(),
        };
        let status = executor::execute(&pipeline, &mut ctx)?;
        env.last_status = status;
        if let Some(code) = env.pending_exit {
            break code;
        }
    };

    term.restore_cooked()?;
    if let Some(path) = env.histfile() {
        if let Err(e) = editor.history_mut().write(&path) {
            eprintln!("rshell: {}: {e}", path.display());
        }
    }
    Ok(exit_code)
}

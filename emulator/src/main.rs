mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::Session;

const DEFAULT_CONFIG_PATH: &str = "heatpump-config.json";

struct Options {
    config: PathBuf,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: heatpump-emulator [--config <path>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options.config, options.transcript.as_deref())?;
    let mut line = String::new();

    writeln!(
        writer,
        "Heatpump Monitor Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for startup in session.startup_lines() {
        writeln!(writer, "{startup}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        let value = match inline {
            Some(value) => value,
            None => args
                .next()
                .ok_or_else(|| format!("Expected value after {flag}"))?,
        };
        match flag.as_str() {
            "--config" => options.config = PathBuf::from(value),
            "--transcript" => options.transcript = Some(PathBuf::from(value)),
            other => return Err(format!("Unknown option `{other}`")),
        }
    }
    Ok(options)
}

use std::env;
use std::io;
use std::process::ExitCode;
use std::str::FromStr;

use roomport_cli::{run, CommandKind, CommonOptions, JoinTarget, DEFAULT_WATCH_MS};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print_usage();
        return Ok(());
    }

    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--host" => {
                options.host = option_value(&args, index, "--host")?.to_string();
                index += 2;
            }
            "--port" => {
                options.port = parse_option(&args, index, "--port", "u16")?;
                index += 2;
            }
            "--timeout-ms" => {
                options.timeout_ms = parse_option(&args, index, "--timeout-ms", "u64")?;
                index += 2;
            }
            "--retry-ms" => {
                options.retry_ms = parse_option(&args, index, "--retry-ms", "u64")?;
                index += 2;
            }
            "--join" => {
                let value = option_value(&args, index, "--join")?;
                options.join = Some(JoinTarget::parse(value).ok_or_else(|| {
                    format!("invalid --join value '{value}' (expected <room>:<player>)")
                })?);
                index += 2;
            }
            "--include-telemetry" => {
                options.include_telemetry = true;
                index += 1;
            }
            _ => break,
        }
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let kind = match command {
        "wait-ready" => {
            if !command_args.is_empty() {
                return Err("wait-ready takes no arguments".to_string());
            }
            CommandKind::WaitReady
        }
        "send" => {
            if command_args.is_empty() {
                return Err("send requires a JSON request".to_string());
            }
            CommandKind::Send {
                request: command_args.join(" "),
            }
        }
        "script" => {
            if command_args.is_empty() {
                return Err("script requires a file path".to_string());
            }
            let path = command_args[0].clone();
            let mut barrier = false;
            for arg in &command_args[1..] {
                if arg == "--barrier" {
                    barrier = true;
                } else {
                    return Err(format!(
                        "unknown script argument '{arg}' (expected --barrier)"
                    ));
                }
            }
            CommandKind::Script { path, barrier }
        }
        "barrier" => {
            if !command_args.is_empty() {
                return Err("barrier takes no arguments".to_string());
            }
            CommandKind::Barrier
        }
        "watch" => {
            let duration_ms = match command_args {
                [] => DEFAULT_WATCH_MS,
                [flag, value] if flag == "--duration-ms" => value.parse::<u64>().map_err(|_| {
                    format!("invalid --duration-ms value '{value}' (expected u64)")
                })?,
                _ => return Err("watch takes only [--duration-ms <u64>]".to_string()),
            };
            CommandKind::Watch { duration_ms }
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    run(kind, &options, &mut io::stdout()).map_err(|error| error.to_string())
}

fn option_value<'a>(args: &'a [String], index: usize, flag: &str) -> Result<&'a str, String> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn parse_option<T: FromStr>(
    args: &[String],
    index: usize,
    flag: &str,
    expected: &str,
) -> Result<T, String> {
    let value = option_value(args, index, flag)?;
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{value}' (expected {expected})"))
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "roomport_cli - scriptable arena server client",
        "",
        "Usage:",
        "  roomport_cli [options] wait-ready",
        "  roomport_cli [options] send <json-request...>",
        "  roomport_cli [options] script <file> [--barrier]",
        "  roomport_cli [options] barrier",
        "  roomport_cli [options] watch [--duration-ms <u64>]",
        "",
        "Options:",
        "  --host <addr>          default 127.0.0.1",
        "  --port <u16>           default 46101",
        "  --timeout-ms <u64>     default 5000",
        "  --retry-ms <u64>       default 100",
        "  --join <room>:<player> join before running the subcommand",
        "  --include-telemetry    also print enemies-updated batches",
    ]
    .join("\n")
}

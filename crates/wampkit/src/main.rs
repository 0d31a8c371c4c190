mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "wampkit", version, about = "WAMP client CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "wampkit",
            "call",
            "com.example.add",
            "--arg",
            "1",
            "--arg",
            "2",
            "--url",
            "ws://127.0.0.1:8080/ws",
            "--realm",
            "realm1",
        ])
        .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.procedure, "com.example.add");
                assert_eq!(args.payload.args, ["1", "2"]);
                assert_eq!(args.connect.realm.as_deref(), Some("realm1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_subscribe_with_count() {
        let cli = Cli::try_parse_from([
            "wampkit",
            "subscribe",
            "news",
            "--count",
            "3",
            "--config",
            "/tmp/router.json",
        ])
        .expect("subscribe args should parse");
        assert!(matches!(
            cli.command,
            Command::Subscribe(ref args) if args.count == Some(3)
        ));
    }

    #[test]
    fn call_requires_procedure() {
        let err = Cli::try_parse_from(["wampkit", "call"]).expect_err("procedure is required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }
}

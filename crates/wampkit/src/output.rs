use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use wampkit_peer::Payload;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// What produced a printed payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadKind {
    Result,
    Event,
}

impl PayloadKind {
    fn as_str(self) -> &'static str {
        match self {
            PayloadKind::Result => "result",
            PayloadKind::Event => "event",
        }
    }
}

#[derive(Serialize)]
struct PayloadOutput<'a> {
    kind: &'static str,
    uri: &'a str,
    args: &'a [Value],
    kwargs: &'a serde_json::Map<String, Value>,
    timestamp: String,
}

pub fn print_payload(kind: PayloadKind, uri: &str, payload: &Payload, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PayloadOutput {
                kind: kind.as_str(),
                uri,
                args: &payload.args,
                kwargs: &payload.kwargs,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "URI", "ARGS", "KWARGS"])
                .add_row(vec![
                    kind.as_str().to_string(),
                    uri.to_string(),
                    Value::Array(payload.args.clone()).to_string(),
                    Value::Object(payload.kwargs.clone()).to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} uri={} args={} kwargs={}",
                kind.as_str(),
                uri,
                Value::Array(payload.args.clone()),
                Value::Object(payload.kwargs.clone())
            );
        }
        OutputFormat::Raw => println!("{}", raw_value(payload)),
    }
}

/// The bare value a shell pipeline wants: the single positional argument
/// when there is exactly one, else the whole payload.
pub fn raw_value(payload: &Payload) -> Value {
    match (payload.args.as_slice(), payload.kwargs.is_empty()) {
        ([single], true) => single.clone(),
        ([], false) => Value::Object(payload.kwargs.clone()),
        _ => payload.to_value(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

use serde::Serialize;
use tracing::debug;
use wampkit_peer::Client;

use crate::cmd::{start_client, PublishArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct PublishOutput<'a> {
    kind: &'static str,
    uri: &'a str,
    request_id: u64,
}

pub fn run(args: PublishArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = args.payload.to_payload()?;
    let client = start_client(&args.connect, Client::builder())?;

    let outcome = client.publish(&args.topic, payload);
    if let Err(err) = client.stop() {
        debug!(error = %err, "session close failed");
    }
    let request_id = outcome.map_err(|err| peer_error("publish failed", err))?;

    match format {
        OutputFormat::Json => {
            let out = PublishOutput {
                kind: "published",
                uri: &args.topic,
                request_id,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("published uri={} request_id={request_id}", args.topic);
        }
        OutputFormat::Raw => println!("{request_id}"),
    }
    Ok(SUCCESS)
}

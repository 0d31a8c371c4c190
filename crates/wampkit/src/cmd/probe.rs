use std::time::{Duration, Instant};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use wampkit_peer::Client;
use wampkit_transport::TcpTransport;

use crate::cmd::{parse_duration, resolve_target, start_client, ProbeArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct ProbeOutput {
    endpoint: String,
    realm: String,
    session_id: u64,
    ready_ms: f64,
    handshake_ms: f64,
    closed_cleanly: bool,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let target = resolve_target(&args.connect)?;
    let timeout = parse_duration(&args.connect.timeout)?;

    let started = Instant::now();
    TcpTransport::probe(&target.endpoint, timeout)
        .map_err(|err| transport_error("router not ready", err))?;
    let ready = started.elapsed();

    let started = Instant::now();
    let client = start_client(&args.connect, Client::builder())?;
    let handshake = started.elapsed();
    let session_id = client.session_id().unwrap_or_default();
    let closed_cleanly = client.stop().is_ok();

    let out = ProbeOutput {
        endpoint: target.endpoint.to_string(),
        realm: client.realm().to_string(),
        session_id,
        ready_ms: millis(ready),
        handshake_ms: millis(handshake),
        closed_cleanly,
    };
    print_probe(&out, format);
    Ok(SUCCESS)
}

fn millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn print_probe(out: &ProbeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "REALM", "SESSION", "READY", "HANDSHAKE"])
                .add_row(vec![
                    out.endpoint.clone(),
                    out.realm.clone(),
                    out.session_id.to_string(),
                    format!("{:.2}ms", out.ready_ms),
                    format!("{:.2}ms", out.handshake_ms),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Router Probe:");
            println!("  Endpoint:   {}", out.endpoint);
            println!("  Realm:      {}", out.realm);
            println!("  Session:    {}", out.session_id);
            println!("  Ready:      {:.2}ms", out.ready_ms);
            println!("  Handshake:  {:.2}ms", out.handshake_ms);
            println!("  Closed:     {}", out.closed_cleanly);
        }
        OutputFormat::Raw => println!("{}", out.session_id),
    }
}

use tracing::debug;
use wampkit_peer::Client;

use crate::cmd::{start_client, CallArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_payload, OutputFormat, PayloadKind};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let payload = args.payload.to_payload()?;
    let client = start_client(&args.connect, Client::builder())?;

    let outcome = client.call(&args.procedure, payload);
    if let Err(err) = client.stop() {
        debug!(error = %err, "session close failed");
    }

    let result = outcome.map_err(|err| peer_error("call failed", err))?;
    print_payload(PayloadKind::Result, &args.procedure, &result, format);
    Ok(SUCCESS)
}

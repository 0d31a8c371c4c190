use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError};
use tracing::{debug, info};
use wampkit_peer::{Client, Payload, SessionState};

use crate::cmd::{start_client, SubscribeArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{print_payload, OutputFormat, PayloadKind};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: SubscribeArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (events_tx, events_rx) = unbounded::<Payload>();
    let builder = Client::builder().subscription(args.topic.clone(), move |payload: &Payload| {
        let _ = events_tx.send(payload.clone());
    });
    let client = start_client(&args.connect, builder)?;
    info!(topic = %args.topic, "waiting for events");

    let mut printed = 0usize;
    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(SUCCESS);
        }
        if args.count.is_some_and(|count| printed >= count) {
            break Ok(SUCCESS);
        }

        match events_rx.recv_timeout(POLL_INTERVAL) {
            Ok(payload) => {
                print_payload(PayloadKind::Event, &args.topic, &payload, format);
                printed = printed.saturating_add(1);
            }
            Err(RecvTimeoutError::Timeout) => {
                if client.state() == SessionState::Closed {
                    break Err(CliError::new(TRANSPORT_ERROR, "session closed by router"));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                break Err(CliError::new(TRANSPORT_ERROR, "event stream ended"));
            }
        }
    };

    if let Err(err) = client.stop() {
        debug!(error = %err, "session close failed");
    }
    outcome
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

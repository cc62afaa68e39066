//! Application orchestration: worker pool bring-up, the main event
//! loop and the drain sequence.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::privacy::protect::Protector;
use crate::shutdown::ShutdownCoordinator;
use crate::signal;
use crate::sources::tcp::Server;

/// Per-worker envelope buffer; full channels are the dispatcher's
/// backpressure knob.
const INPUT_CAPACITY: usize = 16;

const DEATH_DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Runs the daemon until a signal or a fatal worker error, then
/// drains. Returns the process exit code.
pub async fn run(config: Config) -> i32 {
    let config = Arc::new(config);
    let coordinator = ShutdownCoordinator::new();
    let (death_tx, mut death_rx) = mpsc::unbounded_channel();

    let mut inputs = Vec::with_capacity(config.workers);
    let mut workers = Vec::with_capacity(config.workers);
    for num in 0..config.workers {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        inputs.push(input_tx);
        let protector = Protector::new(
            num,
            input_rx,
            coordinator.begin_shutdown(),
            death_tx.clone(),
            Arc::clone(&config),
        );
        workers.push(tokio::spawn(protector.run()));
    }
    drop(death_tx);
    info!(message = "Started privacy workers.", workers = config.workers);

    let dispatcher = Dispatcher::new(inputs);

    let mut exit = exitcode::OK;
    let server = match Server::bind(
        &config.listen_address,
        dispatcher.clone(),
        coordinator.begin_shutdown(),
    )
    .await
    {
        Ok(server) => Some(server),
        Err(error) => {
            error!(message = "Failed to start TCP server.", %error);
            exit = exitcode::UNAVAILABLE;
            None
        }
    };

    if let Some(mut server) = server {
        let signal = signal::shutdown();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!(message = "Received shutdown signal.");
                    break;
                }
                maybe = server.recv_error() => {
                    if let Some(error) = maybe {
                        error!(message = "TCP server error.", %error);
                    }
                }
                maybe = death_rx.recv() => {
                    if let Some(death) = maybe {
                        error!(message = "Worker failed.", worker = death.worker, error = %death.error);
                        exit = exitcode::SOFTWARE;
                    }
                    break;
                }
            }
        }

        // stop the ingress first so no new envelopes arrive, then let
        // the workers drain
        coordinator.shutdown();
        server.stop().await;
    } else {
        coordinator.shutdown();
    }

    // dropping the last input senders closes every worker's input
    drop(dispatcher);

    for worker in workers {
        let _ = worker.await;
    }

    // fetch final error messages
    while let Ok(Some(death)) = timeout(DEATH_DRAIN_TIMEOUT, death_rx.recv()).await {
        error!(message = "Worker failed.", worker = death.worker, error = %death.error);
        exit = exitcode::SOFTWARE;
    }

    info!(message = "Shutdown complete.");
    exit
}

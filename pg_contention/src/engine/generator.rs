use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use super::{GeneratorState, Scenario, ScenarioContext};
use crate::error::ScenarioError;
use crate::metrics::ScenarioEvent;

/// Drive one scenario until its context is cancelled.
///
/// Each turn of the loop is one cycle: `Idle`, then whatever
/// `Acquire`/`Work` steps the scenario takes, then `Cooldown`. A failed
/// cycle is logged and followed by the scenario's error backoff instead of
/// its regular cooldown; nothing a cycle returns ends the loop except
/// cancellation.
pub async fn run_generator(scenario: Arc<dyn Scenario>, ctx: ScenarioContext) {
    let name = scenario.name();
    let span = tracing::info_span!("scenario", name);

    async move {
        tracing::info!("generator started");
        // A restarted generator may inherit the state its predecessor panicked in
        ctx.reset_state();

        while !ctx.is_cancelled() {
            ctx.set_state(GeneratorState::Idle);
            ctx.metrics().cycle_started(name);
            let started = Instant::now();

            // Acquire and Work are published by the context as the
            // scenario checks out connections.
            let pause = match scenario.run_cycle(&ctx).await {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    ctx.metrics().cycle_completed(name, elapsed);
                    tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "cycle complete");
                    scenario.cooldown()
                }
                Err(ScenarioError::Cancelled) => break,
                Err(e) => {
                    if matches!(e, ScenarioError::Timeout { .. }) {
                        ctx.record(ScenarioEvent::Timeout);
                    }
                    ctx.metrics().cycle_failed(name, e.kind(), started.elapsed());
                    tracing::error!(kind = e.kind(), error = %e, "cycle failed");
                    scenario.error_backoff()
                }
            };

            ctx.set_state(GeneratorState::Cooldown);
            if ctx.sleep(pause).await.is_err() {
                break;
            }
        }

        ctx.reset_state();
        tracing::info!("generator stopped");
    }
    .instrument(span)
    .await
}

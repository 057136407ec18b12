//! Fan-out of step-state events to every matching live waiter.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::matcher;
use crate::model::{IncomingEvent, WaiterId};
use crate::registry::WaiterRegistry;
use crate::waiter::Transition;

/// What one waiter did with a routed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub waiter_id: WaiterId,
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct NotificationRouter {
    registry: Arc<WaiterRegistry>,
}

impl NotificationRouter {
    pub fn new(registry: Arc<WaiterRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers `event` to every matching waiter. Waiters are independent, so
    /// each delivery runs as its own task. Resolved waiters leave the registry.
    pub async fn route(&self, event: &IncomingEvent) -> Vec<Delivery> {
        let matching: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|waiter| matcher::matches(event, waiter.scope()))
            .collect();

        if matching.is_empty() {
            debug!(
                program_id = %event.program_id,
                pipeline_id = %event.pipeline_id,
                execution_id = %event.execution_id,
                "no waiter matches event"
            );
            return Vec::new();
        }

        let mut tasks = JoinSet::new();
        for waiter in matching {
            let event = event.clone();
            tasks.spawn(async move {
                let transition = waiter.on_event(&event).await;
                Delivery {
                    waiter_id: waiter.id().clone(),
                    transition,
                }
            });
        }

        let mut deliveries = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(delivery) => {
                    if matches!(delivery.transition, Transition::Resolved(_)) {
                        self.registry.remove(&delivery.waiter_id);
                    }
                    deliveries.push(delivery);
                }
                Err(err) => error!(error = %err, "event delivery task failed"),
            }
        }
        deliveries
    }
}

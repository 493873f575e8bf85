//! Background tasks: consumer workers and the retention sweeper.

use std::sync::Arc;
use std::time::Duration;

use empuje_core::bus::{BusError, MessageBus, SubscriptionSpec};
use empuje_core::registry::OrganizationId;
use empuje_messaging::application::dispatcher::DeliveryDispatcher;
use empuje_messaging::application::guard::IdempotencyGuard;
use empuje_messaging::domain::topics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, info_span, warn};

/// This process's share of the consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroup {
    /// Group id shared by every node process of the organization.
    pub group_id: String,
    /// Workers started by this process.
    pub workers: u32,
    /// Member index of the first worker.
    pub member_offset: u32,
    /// Members in the whole group.
    pub members: u32,
}

impl ConsumerGroup {
    /// One subscription per worker, each owning a disjoint set of partitions.
    #[must_use]
    pub fn member_specs(&self, own: &OrganizationId) -> Vec<SubscriptionSpec> {
        (0..self.workers)
            .map(|index| SubscriptionSpec {
                group_id: self.group_id.clone(),
                patterns: topics::subscription_patterns(own),
                member: self.member_offset + index,
                members: self.members,
            })
            .collect()
    }
}

/// Subscribes every worker of `group` and runs each on its own task.
///
/// # Errors
///
/// Returns `BusError` if a subscription is refused; workers already started
/// keep running until `shutdown` fires.
pub async fn spawn_consumers(
    bus: &Arc<dyn MessageBus>,
    dispatcher: &DeliveryDispatcher,
    own: &OrganizationId,
    group: &ConsumerGroup,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let mut handles = Vec::new();
    for spec in group.member_specs(own) {
        let member = spec.member;
        let subscription = bus.subscribe(spec).await?;
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        let span = info_span!("consumer", group_id = %group.group_id, member);
        handles.push(tokio::spawn(
            async move {
                info!("consumer worker started");
                if let Err(err) = dispatcher.run(subscription, shutdown).await {
                    error!(error = %err, "consumer worker failed");
                }
            }
            .instrument(span),
        ));
    }
    info!(
        group_id = %group.group_id,
        workers = group.workers,
        members = group.members,
        "consumer workers started"
    );
    Ok(handles)
}

/// Every `period` until `shutdown` fires, purges expired processed marks and
/// prunes bus records older than `bus_retention`.
#[must_use]
pub fn spawn_retention_sweeper(
    guard: IdempotencyGuard,
    bus: Arc<dyn MessageBus>,
    bus_retention: Duration,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = guard.purge_expired().await {
                            warn!(error = %err, "failed to purge processed marks");
                        }
                        match bus.prune(bus_retention).await {
                            Ok(0) => {}
                            Ok(pruned) => info!(pruned, "pruned expired bus records"),
                            Err(err) => warn!(error = %err, "failed to prune bus records"),
                        }
                    }
                }
            }
            info!("retention sweeper stopped");
        }
        .instrument(info_span!("retention_sweeper")),
    )
}

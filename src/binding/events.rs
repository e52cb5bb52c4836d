//! Event source binding
//!
//! Queue consumers get an event source plus consume rights, storage triggers
//! get a prefix-filtered object-created notification, and every function gets
//! a log subscription when log forwarding is configured.

use std::collections::BTreeSet;

use log::debug;

use crate::config::Config;
use crate::core::error::SynthResult;
use crate::core::traits::{ComputeHandle, EventRegistrar, PolicySink, QueueRef};

#[derive(Clone, Debug)]
struct QueueConsumer {
    handlers: BTreeSet<String>,
    queue: String,
}

#[derive(Clone, Debug)]
struct StorageTrigger {
    handlers: BTreeSet<String>,
    bucket: String,
    prefix: String,
}

/// What was attached to one function
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventBindings {
    pub queue_sources: usize,
    pub notifications: usize,
    pub log_subscription: bool,
}

impl EventBindings {
    pub fn is_empty(&self) -> bool {
        self.queue_sources == 0 && self.notifications == 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventBinder {
    queue_consumers: Vec<QueueConsumer>,
    storage_triggers: Vec<StorageTrigger>,
    log_destination: Option<String>,
}

impl EventBinder {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_consumers: config
                .events
                .queue_consumers
                .iter()
                .map(|rule| QueueConsumer {
                    handlers: rule.handlers.clone(),
                    queue: rule.queue.clone(),
                })
                .collect(),
            storage_triggers: config
                .events
                .storage_triggers
                .iter()
                .map(|rule| StorageTrigger {
                    handlers: rule.handlers.clone(),
                    bucket: rule.bucket.clone(),
                    prefix: rule.prefix.clone(),
                })
                .collect(),
            log_destination: config
                .log_forwarding
                .as_ref()
                .map(|f| f.destination.clone()),
        }
    }

    pub fn bind<S>(
        &self,
        substrate: &mut S,
        compute: &ComputeHandle,
        handler: &str,
    ) -> SynthResult<EventBindings>
    where
        S: EventRegistrar + PolicySink + ?Sized,
    {
        let mut bindings = EventBindings::default();

        for consumer in self
            .queue_consumers
            .iter()
            .filter(|c| c.handlers.contains(handler))
        {
            substrate.add_queue_source(compute, &consumer.queue)?;
            QueueRef::new(&consumer.queue).grant_consume(substrate, &compute.identity)?;
            debug!("{} consumes queue {}", compute.function_name, consumer.queue);
            bindings.queue_sources += 1;
        }

        for trigger in self
            .storage_triggers
            .iter()
            .filter(|t| t.handlers.contains(handler))
        {
            substrate.add_object_created_notification(&trigger.bucket, compute, &trigger.prefix)?;
            debug!(
                "{} triggered by objects created in {}/{}",
                compute.function_name, trigger.bucket, trigger.prefix
            );
            bindings.notifications += 1;
        }

        if let Some(destination) = &self.log_destination {
            substrate.add_log_subscription(compute, destination)?;
            bindings.log_subscription = true;
        }

        Ok(bindings)
    }
}

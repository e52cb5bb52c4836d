//! Permission grants
//!
//! Two rule tables decide what a function may touch. Environment rules fire
//! when the function's merged environment contains their key. Handler rules
//! fire when the handler symbol is in their allow-set. Grants are additive.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::config::{Config, GrantConfig};
use crate::core::error::SynthResult;
use crate::core::traits::{Action, ComputeHandle, PolicySink, ResourceRef};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub resource: ResourceRef,
    pub actions: Vec<Action>,
}

impl From<&GrantConfig> for Grant {
    fn from(config: &GrantConfig) -> Self {
        Self {
            resource: ResourceRef::new(config.kind, &config.name),
            actions: config.actions.clone(),
        }
    }
}

#[derive(Clone, Debug)]
struct EnvRule {
    key: String,
    grants: Vec<Grant>,
}

#[derive(Clone, Debug)]
struct HandlerRule {
    handlers: BTreeSet<String>,
    grants: Vec<Grant>,
}

#[derive(Clone, Debug, Default)]
pub struct PermissionBinder {
    env_rules: Vec<EnvRule>,
    handler_rules: Vec<HandlerRule>,
}

impl PermissionBinder {
    pub fn from_config(config: &Config) -> Self {
        let mut binder = Self::default();
        for rule in &config.permissions.env {
            binder.add_env_rule(&rule.key, rule.grants.iter().map(Grant::from).collect());
        }
        for rule in &config.permissions.handlers {
            binder.add_handler_rule(
                rule.handlers.iter().cloned(),
                rule.grants.iter().map(Grant::from).collect(),
            );
        }
        binder
    }

    pub fn add_env_rule(&mut self, key: &str, grants: Vec<Grant>) {
        self.env_rules.push(EnvRule {
            key: key.to_string(),
            grants,
        });
    }

    pub fn add_handler_rule<I>(&mut self, handlers: I, grants: Vec<Grant>)
    where
        I: IntoIterator<Item = String>,
    {
        self.handler_rules.push(HandlerRule {
            handlers: handlers.into_iter().collect(),
            grants,
        });
    }

    /// Applies every matching rule to one freshly created function and
    /// returns the number of grants issued.
    pub fn bind<P>(
        &self,
        sink: &mut P,
        compute: &ComputeHandle,
        handler: &str,
        environment: &BTreeMap<String, String>,
    ) -> SynthResult<usize>
    where
        P: PolicySink + ?Sized,
    {
        let mut issued = 0;

        for rule in &self.env_rules {
            if environment.contains_key(&rule.key) {
                debug!(
                    "{}: env '{}' present, applying {} grants",
                    compute.function_name,
                    rule.key,
                    rule.grants.len()
                );
                issued += apply(sink, compute, &rule.grants)?;
            }
        }

        for rule in &self.handler_rules {
            if rule.handlers.contains(handler) {
                debug!(
                    "{}: handler '{}' allow-listed, applying {} grants",
                    compute.function_name,
                    handler,
                    rule.grants.len()
                );
                issued += apply(sink, compute, &rule.grants)?;
            }
        }

        Ok(issued)
    }
}

fn apply<P>(sink: &mut P, compute: &ComputeHandle, grants: &[Grant]) -> SynthResult<usize>
where
    P: PolicySink + ?Sized,
{
    let mut issued = 0;
    for grant in grants {
        for action in &grant.actions {
            grant.resource.grant(sink, &compute.identity, *action)?;
            issued += 1;
        }
    }
    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{HandleOrigin, Identity, ResourceKind};

    #[derive(Default)]
    struct SetSink {
        grants: BTreeSet<(Identity, ResourceRef, Action)>,
        calls: usize,
    }

    impl PolicySink for SetSink {
        fn grant(
            &mut self,
            identity: &Identity,
            resource: &ResourceRef,
            action: Action,
        ) -> SynthResult<()> {
            self.calls += 1;
            self.grants
                .insert((identity.clone(), resource.clone(), action));
            Ok(())
        }
    }

    fn compute(name: &str) -> ComputeHandle {
        ComputeHandle {
            function_name: name.to_string(),
            unit: None,
            identity: Identity::for_function(name),
            origin: HandleOrigin::Created,
        }
    }

    fn binder() -> PermissionBinder {
        let conf = Config::from_yaml(
            r#"
---
shared_resources:
  secrets: [db-user]
  queues: [create-report]
  buckets: [uploads]
  tables: [user-data]
permissions:
  env:
    - key: UNPUBLISHED
      grants:
        - kind: secret
          name: db-user
          actions: [read]
    - key: CREATE_REPORT_QUEUE_URL
      grants:
        - kind: queue
          name: create-report
          actions: [purge, send]
  handlers:
    - handlers: [get_starred_trials, post_search_results]
      grants:
        - kind: bucket
          name: uploads
          actions: [read_write]
        - kind: table
          name: user-data
          actions: [read_write_data]
"#,
        )
        .unwrap();
        PermissionBinder::from_config(&conf)
    }

    #[test]
    fn test_env_presence_triggers_grant() {
        let mut sink = SetSink::default();
        let env = BTreeMap::from([
            ("UNPUBLISHED".to_string(), "db-user".to_string()),
            ("CREATE_REPORT_QUEUE_URL".to_string(), String::new()),
        ]);

        let issued = binder()
            .bind(&mut sink, &compute("f"), "lambda_handler", &env)
            .unwrap();
        assert_eq!(issued, 3);
        assert!(sink.grants.contains(&(
            Identity::for_function("f"),
            ResourceRef::new(ResourceKind::Queue, "create-report"),
            Action::Purge
        )));
    }

    #[test]
    fn test_handler_allow_set() {
        let mut sink = SetSink::default();
        let issued = binder()
            .bind(&mut sink, &compute("f"), "get_starred_trials", &BTreeMap::new())
            .unwrap();
        assert_eq!(issued, 2);

        let mut sink = SetSink::default();
        let issued = binder()
            .bind(&mut sink, &compute("g"), "get_other", &BTreeMap::new())
            .unwrap();
        assert_eq!(issued, 0);
        assert!(sink.grants.is_empty());
    }

    #[test]
    fn test_repeated_grants_are_idempotent() {
        let mut sink = SetSink::default();
        let env = BTreeMap::from([("UNPUBLISHED".to_string(), "x".to_string())]);
        let binder = binder();

        binder.bind(&mut sink, &compute("f"), "h", &env).unwrap();
        binder.bind(&mut sink, &compute("f"), "h", &env).unwrap();
        assert_eq!(sink.calls, 2);
        assert_eq!(sink.grants.len(), 1);
    }
}

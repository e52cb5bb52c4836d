//! Collaborator interfaces for fnstack
//!
//! The provisioning substrate is reached only through these traits. Binders
//! and the orchestrator are written against them, and `synth::Manifest` is the
//! in-process implementation used by the CLI.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SynthResult;
use crate::config::{Architecture, HttpMethod};

/// Kind of shared infrastructure a function can be granted access to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Secret,
    Queue,
    Bucket,
    Table,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ResourceKind::Secret => "secret",
            ResourceKind::Queue => "queue",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Table => "table",
        };
        write!(f, "{kind}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    ReadWrite,
    Delete,
    Send,
    Consume,
    Purge,
    ReadWriteData,
}

impl Action {
    /// Whether the action exists on the given resource kind.
    pub fn applies_to(self, kind: ResourceKind) -> bool {
        matches!(
            (kind, self),
            (ResourceKind::Secret, Action::Read)
                | (
                    ResourceKind::Queue,
                    Action::Send | Action::Consume | Action::Purge
                )
                | (
                    ResourceKind::Bucket,
                    Action::Read | Action::ReadWrite | Action::Delete
                )
                | (ResourceKind::Table, Action::ReadWriteData)
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            Action::Read => "read",
            Action::ReadWrite => "read_write",
            Action::Delete => "delete",
            Action::Send => "send",
            Action::Consume => "consume",
            Action::Purge => "purge",
            Action::ReadWriteData => "read_write_data",
        };
        write!(f, "{action}")
    }
}

/// Untyped reference to a shared resource, as it appears in grant rules
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }

    /// Dispatches an action through the typed reference for this kind.
    /// Actions that do not exist on the kind are rejected during config
    /// validation, so reaching the fallback arm is a configuration error.
    pub fn grant<P>(&self, sink: &mut P, identity: &Identity, action: Action) -> SynthResult<()>
    where
        P: PolicySink + ?Sized,
    {
        match (self.kind, action) {
            (ResourceKind::Secret, Action::Read) => {
                SecretRef::new(&self.name).grant_read(sink, identity)
            }
            (ResourceKind::Queue, Action::Send) => {
                QueueRef::new(&self.name).grant_send(sink, identity)
            }
            (ResourceKind::Queue, Action::Consume) => {
                QueueRef::new(&self.name).grant_consume(sink, identity)
            }
            (ResourceKind::Queue, Action::Purge) => {
                QueueRef::new(&self.name).grant_purge(sink, identity)
            }
            (ResourceKind::Bucket, Action::Read) => {
                BucketRef::new(&self.name).grant_read(sink, identity)
            }
            (ResourceKind::Bucket, Action::ReadWrite) => {
                BucketRef::new(&self.name).grant_read_write(sink, identity)
            }
            (ResourceKind::Bucket, Action::Delete) => {
                BucketRef::new(&self.name).grant_delete(sink, identity)
            }
            (ResourceKind::Table, Action::ReadWriteData) => {
                TableRef::new(&self.name).grant_read_write_data(sink, identity)
            }
            (kind, action) => Err(crate::config_error!(
                "Action '{}' is not supported on {} '{}'",
                action,
                kind,
                self.name
            )),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

macro_rules! typed_ref {
    ($name:ident, $kind:expr) => {
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name(ResourceRef);

        impl $name {
            pub fn new(name: &str) -> Self {
                Self(ResourceRef::new($kind, name))
            }

            pub fn resource(&self) -> &ResourceRef {
                &self.0
            }

            fn grant<P>(&self, sink: &mut P, identity: &Identity, action: Action) -> SynthResult<()>
            where
                P: PolicySink + ?Sized,
            {
                sink.grant(identity, &self.0, action)
            }
        }
    };
}

typed_ref!(SecretRef, ResourceKind::Secret);
typed_ref!(QueueRef, ResourceKind::Queue);
typed_ref!(BucketRef, ResourceKind::Bucket);
typed_ref!(TableRef, ResourceKind::Table);

impl SecretRef {
    pub fn grant_read<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::Read)
    }
}

impl QueueRef {
    pub fn grant_send<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::Send)
    }

    pub fn grant_consume<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::Consume)
    }

    pub fn grant_purge<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::Purge)
    }
}

impl BucketRef {
    pub fn grant_read<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::Read)
    }

    pub fn grant_read_write<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::ReadWrite)
    }

    pub fn grant_delete<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::Delete)
    }
}

impl TableRef {
    pub fn grant_read_write_data<P: PolicySink + ?Sized>(
        &self,
        sink: &mut P,
        identity: &Identity,
    ) -> SynthResult<()> {
        self.grant(sink, identity, Action::ReadWriteData)
    }
}

/// Principal that grants are attached to. Functions without an explicit role
/// get their own execution identity, named after the function.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub role_arn: Option<String>,
}

impl Identity {
    pub fn for_function(function_name: &str) -> Self {
        Self {
            name: function_name.to_string(),
            role_arn: None,
        }
    }

    pub fn for_role(name: &str, arn: &str) -> Self {
        Self {
            name: name.to_string(),
            role_arn: Some(arn.to_string()),
        }
    }
}

/// Everything the substrate needs to create one compute unit
#[derive(Clone, Debug)]
pub struct ComputeSpec {
    /// Deployment unit the function is created in
    pub unit: String,
    pub function_name: String,
    pub simple_name: String,
    pub description: String,
    pub handler: String,
    pub code_entry_root: String,
    pub code_entry_index: String,
    pub environment: BTreeMap<String, String>,
    pub memory_mb: u32,
    pub ephemeral_storage_mb: u32,
    pub timeout: Duration,
    pub architecture: Architecture,
    /// Resolved layer versions
    pub layers: Vec<String>,
    pub identity: Identity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleOrigin {
    Created,
    Imported,
}

/// Reference to a compute unit, either created in this run or imported
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeHandle {
    pub function_name: String,
    pub unit: Option<String>,
    pub identity: Identity,
    pub origin: HandleOrigin,
}

/// A gateway resource path node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathHandle {
    pub id: usize,
    pub path: String,
}

pub trait ComputeFactory {
    fn create(&mut self, spec: &ComputeSpec) -> SynthResult<ComputeHandle>;

    /// Resolve a function that exists outside this run by its final name.
    fn import(&mut self, function_name: &str) -> SynthResult<ComputeHandle>;
}

pub trait PolicySink {
    fn grant(
        &mut self,
        identity: &Identity,
        resource: &ResourceRef,
        action: Action,
    ) -> SynthResult<()>;
}

pub trait RouteRegistrar {
    /// The versioned root, created on first use.
    fn gateway_root(&mut self, segments: &[String]) -> SynthResult<PathHandle>;

    fn add_path_segment(&mut self, parent: &PathHandle, name: &str) -> SynthResult<PathHandle>;

    fn add_method(
        &mut self,
        path: &PathHandle,
        method: HttpMethod,
        compute: &ComputeHandle,
        authorizer: Option<&str>,
    ) -> SynthResult<()>;
}

pub trait EventRegistrar {
    fn add_queue_source(&mut self, compute: &ComputeHandle, queue: &str) -> SynthResult<()>;

    fn add_object_created_notification(
        &mut self,
        bucket: &str,
        compute: &ComputeHandle,
        prefix: &str,
    ) -> SynthResult<()>;

    fn add_log_subscription(&mut self, compute: &ComputeHandle, destination: &str)
        -> SynthResult<()>;
}

/// The full provisioning substrate
pub trait Substrate: ComputeFactory + PolicySink + RouteRegistrar + EventRegistrar {}

impl<T> Substrate for T where T: ComputeFactory + PolicySink + RouteRegistrar + EventRegistrar {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        grants: Vec<(String, ResourceRef, Action)>,
    }

    impl PolicySink for RecordingSink {
        fn grant(
            &mut self,
            identity: &Identity,
            resource: &ResourceRef,
            action: Action,
        ) -> SynthResult<()> {
            self.grants
                .push((identity.name.clone(), resource.clone(), action));
            Ok(())
        }
    }

    #[test]
    fn test_action_applies_to_kind() {
        assert!(Action::Read.applies_to(ResourceKind::Secret));
        assert!(Action::Purge.applies_to(ResourceKind::Queue));
        assert!(Action::ReadWrite.applies_to(ResourceKind::Bucket));
        assert!(Action::ReadWriteData.applies_to(ResourceKind::Table));
        assert!(!Action::Send.applies_to(ResourceKind::Table));
        assert!(!Action::ReadWrite.applies_to(ResourceKind::Secret));
    }

    #[test]
    fn test_typed_refs_reach_sink() {
        let mut sink = RecordingSink::default();
        let identity = Identity::for_function("AWSTkt-backend-dev-thing");

        QueueRef::new("create-report")
            .grant_purge(&mut sink, &identity)
            .unwrap();
        TableRef::new("user-data")
            .grant_read_write_data(&mut sink, &identity)
            .unwrap();

        assert_eq!(sink.grants.len(), 2);
        assert_eq!(sink.grants[0].1, ResourceRef::new(ResourceKind::Queue, "create-report"));
        assert_eq!(sink.grants[0].2, Action::Purge);
        assert_eq!(sink.grants[1].2, Action::ReadWriteData);
    }

    #[test]
    fn test_untyped_grant_dispatch() {
        let mut sink = RecordingSink::default();
        let identity = Identity::for_function("f");

        ResourceRef::new(ResourceKind::Bucket, "uploads")
            .grant(&mut sink, &identity, Action::Delete)
            .unwrap();
        assert_eq!(sink.grants[0].2, Action::Delete);

        let err = ResourceRef::new(ResourceKind::Secret, "db")
            .grant(&mut sink, &identity, Action::Send)
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }
}

//! Typed infrastructure resources and the closed set of watchable kinds.
//!
//! Every tracked resource carries an [`ObjectMeta`]: a name that is unique
//! within its kind, a stable [`Uuid`] identity, its labels, and a creation
//! timestamp. The cache layer keys entries by name, so two events carrying
//! the same name refer to the same resource identity even when the payloads
//! differ.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::labels::LabelSet;

/// The closed set of resource kinds a registry can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A machine in the cluster.
    Node,
    /// A scheduled unit of work.
    Pod,
    /// A declarative replica-managed workload.
    Deployment,
}

impl ResourceKind {
    /// Lowercase kind name, as used in diagnostics and worker thread names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Pod => "pod",
            Self::Deployment => "deployment",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity and labelling shared by all watchable resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Name, unique within the resource's kind.
    pub name: String,
    /// Stable identity that survives label and status changes.
    pub uid: Uuid,
    /// Labels the resource currently carries.
    pub labels: LabelSet,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
}

impl ObjectMeta {
    /// Creates metadata with a fresh [`Uuid`] and the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            name: name.into(),
            uid: Uuid::new_v4(),
            labels,
            created_at: Utc::now(),
        }
    }
}

/// A resource type the watch machinery can track.
///
/// Implementations are plain data: cloning one must be cheap enough to hand
/// copies to cache snapshots and event callbacks.
pub trait WatchedResource: Clone + Send + Sync + 'static {
    /// The kind tag for this type.
    const KIND: ResourceKind;

    /// Shared metadata.
    fn meta(&self) -> &ObjectMeta;

    /// Cache key: the resource name.
    fn name(&self) -> &str {
        &self.meta().name
    }

    /// Labels used for selector matching.
    fn labels(&self) -> &LabelSet {
        &self.meta().labels
    }
}

/// Lifecycle phase reported for a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    /// Accepted but not yet running.
    Pending,
    /// At least one container is running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
    /// Phase could not be determined.
    Unknown,
}

/// A machine in the cluster.
///
/// # Examples
///
/// ```
/// use scopewatch::labels::LabelSet;
/// use scopewatch::resource::Node;
///
/// let labels = LabelSet::try_from_pairs([("zone", "eu-1a")]).unwrap();
/// let node = Node::new("worker-0", labels);
/// assert_eq!(node.meta.name, "worker-0");
/// assert!(!node.unschedulable);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identity and labels.
    pub meta: ObjectMeta,
    /// Cloud provider identifier, when known.
    #[serde(default)]
    pub provider_id: Option<String>,
    /// True when the scheduler must not place new pods here.
    #[serde(default)]
    pub unschedulable: bool,
}

impl Node {
    /// Creates a schedulable node with no provider identifier.
    #[must_use]
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            meta: ObjectMeta::new(name, labels),
            provider_id: None,
            unschedulable: false,
        }
    }

    /// Sets the provider identifier.
    #[must_use]
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Marks the node unschedulable.
    pub fn cordon(&mut self) {
        self.unschedulable = true;
    }
}

impl WatchedResource for Node {
    const KIND: ResourceKind = ResourceKind::Node;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// A scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    /// Identity and labels.
    pub meta: ObjectMeta,
    /// Current lifecycle phase.
    pub phase: PodPhase,
    /// Node the pod is assigned to, once scheduled.
    #[serde(default)]
    pub node_name: Option<String>,
}

impl Pod {
    /// Creates a pending, unassigned pod.
    #[must_use]
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        Self {
            meta: ObjectMeta::new(name, labels),
            phase: PodPhase::Pending,
            node_name: None,
        }
    }

    /// Sets the lifecycle phase.
    #[must_use]
    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Assigns the pod to a node.
    #[must_use]
    pub fn assigned_to(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }
}

impl WatchedResource for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

/// A declarative replica-managed workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Identity and labels.
    pub meta: ObjectMeta,
    /// Desired replica count.
    pub replicas: u32,
    /// Replicas currently passing readiness.
    #[serde(default)]
    pub ready_replicas: u32,
    /// Opaque pod template, kept as raw JSON.
    #[serde(default)]
    pub template: Value,
}

impl Deployment {
    /// Creates a deployment with no ready replicas and an empty template.
    #[must_use]
    pub fn new(name: impl Into<String>, labels: LabelSet, replicas: u32) -> Self {
        Self {
            meta: ObjectMeta::new(name, labels),
            replicas,
            ready_replicas: 0,
            template: Value::Null,
        }
    }

    /// Attaches a pod template.
    #[must_use]
    pub fn with_template(mut self, template: Value) -> Self {
        self.template = template;
        self
    }
}

impl WatchedResource for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
}

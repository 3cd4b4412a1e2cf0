// Copyright 2025 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event recording.

use std::fmt;

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::PostParams;
use kube::{Api, Client};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records events about API objects.
///
/// Recording never fails from the caller's point of view.
pub trait EventRecorder: Send + Sync + 'static {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str);
}

/// Returns a reference to the node object named `name`.
pub fn node_reference(name: &str) -> ObjectReference {
    ObjectReference {
        kind: Some("Node".to_string()),
        name: Some(name.to_string()),
        uid: Some(name.to_string()),
        ..Default::default()
    }
}

/// Recorder that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRecorder;

impl EventRecorder for LoggingRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        let kind = object.kind.as_deref().unwrap_or_default();
        let name = object.name.as_deref().unwrap_or_default();
        match event_type {
            EventType::Normal => tracing::info!(kind, name, reason, message, "event"),
            EventType::Warning => tracing::warn!(kind, name, reason, message, "event"),
        }
    }
}

/// Recorder that posts core/v1 Events to the API server.
///
/// Each event is written from a background task. Must be used from within a
/// tokio runtime.
#[derive(Clone)]
pub struct KubeEventRecorder {
    client: Client,
    component: String,
    host: String,
}

impl KubeEventRecorder {
    pub fn new(client: Client, component: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            client,
            component: component.into(),
            host: host.into(),
        }
    }

    fn build_event(
        &self,
        object: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Event {
        let now = Time(chrono::Utc::now());
        let object_name = object.name.clone().unwrap_or_default();
        Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}.", object_name)),
                namespace: Some(event_namespace(object).to_string()),
                ..Default::default()
            },
            involved_object: object.clone(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(event_type.as_str().to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            source: Some(EventSource {
                component: Some(self.component.clone()),
                host: Some(self.host.clone()),
            }),
            reporting_component: Some(self.component.clone()),
            reporting_instance: Some(self.host.clone()),
            ..Default::default()
        }
    }
}

fn event_namespace(object: &ObjectReference) -> &str {
    match object.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns,
        _ => "default",
    }
}

impl EventRecorder for KubeEventRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        LoggingRecorder.event(object, event_type, reason, message);

        let event = self.build_event(object, event_type, reason, message);
        let api: Api<Event> = Api::namespaced(self.client.clone(), event_namespace(object));
        let reason = reason.to_string();
        tokio::spawn(async move {
            if let Err(e) = api.create(&PostParams::default(), &event).await {
                tracing::warn!(error = %e, reason = %reason, "failed to record event");
            }
        });
    }
}

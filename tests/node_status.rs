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

//! Node status update tests against the fake API server.

mod common;

use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus, NodeSystemInfo};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use rand::seq::SliceRandom;
use rand::Rng;

use kubelet_rust::container_runtime::Image;
use kubelet_rust::network;
use kubelet_rust::node_status::{
    node_images, MAX_IMAGES_IN_NODE_STATUS, MAX_NAMES_PER_IMAGE_IN_NODE_STATUS,
    NODE_STATUS_UPDATE_RETRY, RESOURCE_NVIDIA_GPU,
};
use kubelet_rust::runtime_state::RUNTIME_DOWN_MESSAGE;
use kubelet_rust::{Clock, KubeletError};

use common::{bare_node, new_test_kubelet, start_time, test_settings, TestKubelet, TEST_NODE};

fn condition(type_: &str, status: &str, reason: &str, at: Time) -> NodeCondition {
    NodeCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(String::new()),
        last_heartbeat_time: Some(at.clone()),
        last_transition_time: Some(at),
    }
}

fn node_with_conditions(conditions: Vec<NodeCondition>) -> Node {
    let mut node = bare_node(TEST_NODE);
    node.status = Some(NodeStatus {
        conditions: Some(conditions),
        ..Default::default()
    });
    node
}

/// Runs one status update and returns the node that was written.
async fn update(tk: &TestKubelet) -> Node {
    tk.client.clear_actions();
    tk.manager.update_node_status().await.unwrap();
    let actions = tk.client.actions();
    assert_eq!(actions.len(), 2, "unexpected actions: {:?}", actions);
    assert_eq!(actions[0].verb, "get");
    assert!(actions[1].is_status_update());
    actions[1].object.clone().unwrap()
}

fn status(node: &Node) -> &NodeStatus {
    node.status.as_ref().unwrap()
}

fn conditions(node: &Node) -> &[NodeCondition] {
    status(node).conditions.as_deref().unwrap()
}

fn condition_status<'a>(node: &'a Node, type_: &str) -> &'a NodeCondition {
    conditions(node).iter().find(|c| c.type_ == type_).unwrap()
}

fn test_images() -> Vec<Image> {
    vec![
        Image {
            id: "abc".to_string(),
            repo_tags: vec![
                "gcr.io/google_containers:v1".to_string(),
                "gcr.io/google_containers:v2".to_string(),
            ],
            repo_digests: vec![],
            size: 123,
        },
        Image {
            id: "efg".to_string(),
            repo_tags: vec![
                "gcr.io/google_containers:v3".to_string(),
                "gcr.io/google_containers:v4".to_string(),
            ],
            repo_digests: vec![],
            size: 456,
        },
    ]
}

#[tokio::test]
async fn test_update_new_node_status() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    tk.runtime.set_images(test_images());

    let node = update(&tk).await;
    let now = Time(start_time());

    let types: Vec<&str> = conditions(&node).iter().map(|c| c.type_.as_str()).collect();
    assert_eq!(types, ["OutOfDisk", "MemoryPressure", "DiskPressure", "Ready"]);

    let expected = [
        ("OutOfDisk", "False", "KubeletHasSufficientDisk", "kubelet has sufficient disk space available"),
        ("MemoryPressure", "False", "KubeletHasSufficientMemory", "kubelet has sufficient memory available"),
        ("DiskPressure", "False", "KubeletHasNoDiskPressure", "kubelet has no disk pressure"),
        ("Ready", "True", "KubeletReady", "kubelet is posting ready status"),
    ];
    for (type_, want_status, reason, message) in expected {
        let c = condition_status(&node, type_);
        assert_eq!(c.status, want_status, "{}", type_);
        assert_eq!(c.reason.as_deref(), Some(reason));
        assert_eq!(c.message.as_deref(), Some(message));
        assert_eq!(c.last_heartbeat_time.as_ref(), Some(&now));
        assert_eq!(c.last_transition_time.as_ref(), Some(&now));
    }

    let info = status(&node).node_info.as_ref().unwrap();
    assert_eq!(info.machine_id, "123");
    assert_eq!(info.system_uuid, "abc");
    assert_eq!(info.boot_id, "1b3");
    assert_eq!(info.kernel_version, "3.16.0-0.bpo.4-amd64");
    assert_eq!(info.os_image, "Debian GNU/Linux 7 (wheezy)");
    assert_eq!(info.operating_system, std::env::consts::OS);
    assert_eq!(info.container_runtime_version, "test://1.5.0");
    assert_eq!(info.kubelet_version, format!("v{}", kubelet_rust::VERSION));
    assert_eq!(info.kube_proxy_version, info.kubelet_version);

    let capacity = status(&node).capacity.as_ref().unwrap();
    assert_eq!(capacity["cpu"], Quantity("2".to_string()));
    assert_eq!(capacity["memory"], Quantity("10000000000".to_string()));
    assert_eq!(capacity["pods"], Quantity("110".to_string()));
    assert_eq!(capacity[RESOURCE_NVIDIA_GPU], Quantity("0".to_string()));

    let allocatable = status(&node).allocatable.as_ref().unwrap();
    assert_eq!(allocatable["cpu"], Quantity("1800m".to_string()));
    assert_eq!(allocatable["memory"], Quantity("9900000000".to_string()));
    assert_eq!(allocatable["pods"], Quantity("110".to_string()));

    let addresses: Vec<(&str, &str)> = status(&node)
        .addresses
        .as_ref()
        .unwrap()
        .iter()
        .map(|a| (a.type_.as_str(), a.address.as_str()))
        .collect();
    assert_eq!(addresses, [("InternalIP", "127.0.0.1"), ("Hostname", TEST_NODE)]);

    let images = status(&node).images.as_ref().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].size_bytes, Some(456));
    assert_eq!(
        images[0].names.as_deref(),
        Some(&["gcr.io/google_containers:v3".to_string(), "gcr.io/google_containers:v4".to_string()][..])
    );
    assert_eq!(images[1].size_bytes, Some(123));

    assert_eq!(
        tk.recorder.reasons(),
        ["NodeHasSufficientDisk", "NodeHasSufficientMemory", "NodeHasNoDiskPressure", "NodeReady"]
    );
    let events = tk.recorder.events();
    assert_eq!(events[3].message, "Node testnode status is now: NodeReady");
    assert_eq!(events[3].object.kind.as_deref(), Some("Node"));

    let stored = tk.client.node(TEST_NODE).unwrap();
    assert_eq!(stored.status, node.status);
}

#[tokio::test]
async fn test_update_existing_node_status() {
    let tk = new_test_kubelet(test_settings());
    let earlier = Time(start_time() - chrono::Duration::hours(1));
    tk.client.add_node(node_with_conditions(vec![
        condition("OutOfDisk", "True", "KubeletOutOfDisk", earlier.clone()),
        condition("MemoryPressure", "False", "KubeletHasSufficientMemory", earlier.clone()),
        condition("DiskPressure", "False", "KubeletHasNoDiskPressure", earlier.clone()),
        condition("Ready", "True", "KubeletReady", earlier.clone()),
    ]));

    let node = update(&tk).await;
    let now = Time(start_time());

    let ood = condition_status(&node, "OutOfDisk");
    assert_eq!(ood.status, "False");
    assert_eq!(ood.reason.as_deref(), Some("KubeletHasSufficientDisk"));
    assert_eq!(ood.last_transition_time.as_ref(), Some(&now));
    assert_eq!(ood.last_heartbeat_time.as_ref(), Some(&now));

    for type_ in ["MemoryPressure", "DiskPressure", "Ready"] {
        let c = condition_status(&node, type_);
        assert_eq!(c.last_transition_time.as_ref(), Some(&earlier), "{}", type_);
        assert_eq!(c.last_heartbeat_time.as_ref(), Some(&now), "{}", type_);
    }
    assert_eq!(
        condition_status(&node, "Ready").message.as_deref(),
        Some("kubelet is posting ready status")
    );

    assert_eq!(conditions(&node).last().unwrap().type_, "Ready");
    assert_eq!(tk.recorder.reasons(), ["NodeHasSufficientDisk"]);
}

#[tokio::test]
async fn test_out_of_disk_transition_is_damped() {
    let mut settings = test_settings();
    settings.out_of_disk_transition_frequency = Duration::from_secs(5);
    let tk = new_test_kubelet(settings);
    tk.client.add_node(node_with_conditions(vec![condition(
        "OutOfDisk",
        "True",
        "KubeletOutOfDisk",
        Time(start_time()),
    )]));

    for pass in 1..=4 {
        tk.clock.step(Duration::from_secs(1));
        if pass % 2 == 0 {
            tk.cadvisor.set_disk_space_mb(500, 500, 100, 100);
        } else {
            tk.cadvisor.set_disk_space_mb(500, 500, 400, 400);
        }
        let node = update(&tk).await;
        let ood = condition_status(&node, "OutOfDisk");
        assert_eq!(ood.status, "True", "pass {}", pass);
        assert_eq!(ood.last_transition_time.as_ref(), Some(&Time(start_time())));
    }

    tk.clock.step(Duration::from_secs(1));
    tk.cadvisor.set_disk_space_mb(500, 500, 400, 400);
    let node = update(&tk).await;
    let ood = condition_status(&node, "OutOfDisk");
    assert_eq!(ood.status, "False");
    assert_eq!(ood.last_transition_time.as_ref(), Some(&Time(tk.clock.now())));
    assert!(tk.recorder.reasons().contains(&"NodeHasSufficientDisk".to_string()));
}

#[tokio::test]
async fn test_out_of_disk_entered_immediately() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    update(&tk).await;

    tk.cadvisor.set_disk_space_mb(500, 500, 100, 400);
    tk.clock.step(Duration::from_secs(1));
    let node = update(&tk).await;
    let ood = condition_status(&node, "OutOfDisk");
    assert_eq!(ood.status, "True");
    assert_eq!(ood.reason.as_deref(), Some("KubeletOutOfDisk"));
    assert_eq!(ood.message.as_deref(), Some("out of disk space"));
}

#[tokio::test]
async fn test_runtime_errors_flip_ready() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));

    let node = update(&tk).await;
    assert_eq!(condition_status(&node, "Ready").status, "True");

    tk.clock.step(Duration::from_secs(31));
    let node = update(&tk).await;
    let ready = condition_status(&node, "Ready");
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("KubeletNotReady"));
    assert_eq!(ready.message.as_deref(), Some(RUNTIME_DOWN_MESSAGE));
    assert_eq!(ready.last_transition_time.as_ref(), Some(&Time(tk.clock.now())));
    assert_eq!(tk.recorder.reasons().last().map(String::as_str), Some("NodeNotReady"));

    tk.runtime_state.set_runtime_sync(tk.clock.now());
    let node = update(&tk).await;
    assert_eq!(condition_status(&node, "Ready").status, "True");
    assert_eq!(tk.recorder.reasons().last().map(String::as_str), Some("NodeReady"));

    tk.plugin.set_status_error(Some("network plugin is not ready: cni config uninitialized"));
    network::sync_network_status(&tk.runtime_state, tk.plugin.as_ref());
    tk.clock.step(Duration::from_secs(31));
    let node = update(&tk).await;
    assert_eq!(
        condition_status(&node, "Ready").message.as_deref(),
        Some("network plugin is not ready: cni config uninitialized,container runtime is down")
    );
}

#[tokio::test]
async fn test_pressure_conditions() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    update(&tk).await;
    tk.recorder.clear();

    tk.pressure.set_memory_pressure(true);
    tk.pressure.set_disk_pressure(true);
    let node = update(&tk).await;
    assert_eq!(condition_status(&node, "MemoryPressure").status, "True");
    assert_eq!(condition_status(&node, "DiskPressure").status, "True");
    assert_eq!(tk.recorder.reasons(), ["NodeHasInsufficientMemory", "NodeHasDiskPressure"]);
}

#[tokio::test]
async fn test_update_node_status_error() {
    let tk = new_test_kubelet(test_settings());

    let err = tk.manager.update_node_status().await.unwrap_err();
    assert!(matches!(err, KubeletError::UpdateRetryExceeded(NODE_STATUS_UPDATE_RETRY)));

    let actions = tk.client.actions();
    assert_eq!(actions.len(), NODE_STATUS_UPDATE_RETRY);
    assert!(actions.iter().all(|a| a.verb == "get"));
}

#[tokio::test]
async fn test_try_update_reports_failures() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    tk.client.set_update_error(Some(kubelet_rust::ApiError::Conflict(
        "the object has been modified".to_string(),
    )));

    let err = tk.manager.try_update_node_status().await.unwrap_err();
    assert!(matches!(err, KubeletError::UpdateNodeStatus { .. }));
}

#[tokio::test]
async fn test_pod_cidr_follows_node_spec() {
    let tk = new_test_kubelet(test_settings());
    let mut node = bare_node(TEST_NODE);
    node.spec.as_mut().unwrap().pod_cidr = Some("10.244.1.0/24".to_string());
    tk.client.add_node(node);

    update(&tk).await;
    update(&tk).await;

    assert_eq!(tk.runtime.pod_cidrs(), ["10.244.1.0/24"]);
    assert_eq!(tk.plugin.pod_cidrs(), ["10.244.1.0/24"]);
    assert_eq!(tk.runtime_state.pod_cidr(), "10.244.1.0/24");
}

#[tokio::test]
async fn test_empty_pod_cidr_is_ignored() {
    let tk = new_test_kubelet(test_settings());
    let mut node = bare_node(TEST_NODE);
    node.spec.as_mut().unwrap().pod_cidr = Some(String::new());
    tk.client.add_node(node);

    update(&tk).await;
    assert!(tk.runtime.pod_cidrs().is_empty());
    assert_eq!(tk.runtime_state.pod_cidr(), "");
}

#[tokio::test]
async fn test_schedulable_events() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    update(&tk).await;
    tk.recorder.clear();

    let mut node = tk.client.node(TEST_NODE).unwrap();
    node.spec.as_mut().unwrap().unschedulable = Some(true);
    tk.client.add_node(node);
    update(&tk).await;
    update(&tk).await;
    assert_eq!(tk.recorder.reasons(), ["NodeNotSchedulable"]);

    let mut node = tk.client.node(TEST_NODE).unwrap();
    node.spec.as_mut().unwrap().unschedulable = Some(false);
    tk.client.add_node(node);
    update(&tk).await;
    assert_eq!(tk.recorder.reasons(), ["NodeNotSchedulable", "NodeSchedulable"]);
}

#[tokio::test]
async fn test_machine_info_failure_zeroes_capacity() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    tk.cadvisor.set_machine_info_error(Some("cadvisor unavailable"));
    tk.cadvisor.set_version_info_error(Some("cadvisor unavailable"));

    let node = update(&tk).await;
    let capacity = status(&node).capacity.as_ref().unwrap();
    assert_eq!(capacity["cpu"], Quantity("0".to_string()));
    assert_eq!(capacity["memory"], Quantity("0".to_string()));
    assert_eq!(capacity["pods"], Quantity("110".to_string()));

    let allocatable = status(&node).allocatable.as_ref().unwrap();
    assert_eq!(allocatable["cpu"], Quantity("0".to_string()));
    assert_eq!(allocatable["memory"], Quantity("0".to_string()));

    let info = status(&node).node_info.as_ref().unwrap();
    assert_eq!(info.container_runtime_version, "test://1.5.0");
    assert!(info.kernel_version.is_empty());
}

#[tokio::test]
async fn test_reboot_is_reported() {
    let tk = new_test_kubelet(test_settings());
    let mut node = bare_node(TEST_NODE);
    node.status = Some(NodeStatus {
        node_info: Some(NodeSystemInfo {
            boot_id: "previous-boot".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    });
    tk.client.add_node(node);

    update(&tk).await;
    let rebooted: Vec<_> = tk
        .recorder
        .events()
        .into_iter()
        .filter(|e| e.reason == "Rebooted")
        .collect();
    assert_eq!(rebooted.len(), 1);
    assert_eq!(rebooted[0].message, "Node testnode has been rebooted, boot id: 1b3");

    tk.recorder.clear();
    update(&tk).await;
    assert!(!tk.recorder.reasons().contains(&"Rebooted".to_string()));
}

#[tokio::test]
async fn test_image_list_failure_keeps_previous_images() {
    let tk = new_test_kubelet(test_settings());
    tk.client.add_node(bare_node(TEST_NODE));
    tk.runtime.set_images(test_images());
    update(&tk).await;

    tk.runtime.set_list_images_error(Some("runtime busy"));
    let node = update(&tk).await;
    assert_eq!(status(&node).images.as_ref().map(Vec::len), Some(2));
}

fn random_image_list(max_images: usize) -> Vec<Image> {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(1..=max_images);
    let mut sizes: Vec<u64> = (1..=count as u64).map(|i| i * 1000).collect();
    sizes.shuffle(&mut rng);

    sizes
        .into_iter()
        .enumerate()
        .map(|(i, size)| {
            let tags = rng.gen_range(1..=10);
            Image {
                id: format!("image-{}", i),
                repo_tags: (0..tags).map(|t| format!("registry/image-{}:tag{}", i, t)).collect(),
                repo_digests: vec![],
                size,
            }
        })
        .collect()
}

#[tokio::test]
async fn test_update_new_node_status_too_large_reservation() {
    let mut settings = test_settings();
    settings.system_reserved.cpu_millis = 4000;
    let tk = new_test_kubelet(settings);
    tk.client.add_node(bare_node(TEST_NODE));

    let node = update(&tk).await;
    let allocatable = status(&node).allocatable.as_ref().unwrap();
    assert_eq!(allocatable["cpu"], Quantity("0".to_string()));
    assert_eq!(allocatable["memory"], Quantity("9900000000".to_string()));
}

#[tokio::test]
async fn test_random_image_lists_are_capped() {
    for _ in 0..10 {
        let images = random_image_list(MAX_IMAGES_IN_NODE_STATUS * 2);

        let mut expected: Vec<Image> = images.clone();
        expected.sort_by(|a, b| b.size.cmp(&a.size));
        expected.truncate(MAX_IMAGES_IN_NODE_STATUS);

        let tk = new_test_kubelet(test_settings());
        tk.client.add_node(bare_node(TEST_NODE));
        tk.runtime.set_images(images.clone());
        let node = update(&tk).await;

        let got = status(&node).images.clone().unwrap();
        assert_eq!(got, node_images(images));
        assert_eq!(got.len(), expected.len());
        for (image, want) in got.iter().zip(&expected) {
            assert_eq!(image.size_bytes, Some(want.size as i64));
            let names = image.names.as_ref().unwrap();
            assert!(names.len() <= MAX_NAMES_PER_IMAGE_IN_NODE_STATUS);
            assert_eq!(&names[..], &want.repo_tags[..names.len()]);
        }
    }
}

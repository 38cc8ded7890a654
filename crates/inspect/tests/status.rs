#![forbid(unsafe_code)]

use serde_json::{json, Value};
use vantage_core::{ResourceStatus, ResourceStatusList};
use vantage_inspect::resource_status;
use vantage_inspect::status::{
    mismatched_tls_host, no_backends_defined, no_matching_backend, no_matching_port,
    no_matching_tls_secret, no_tls_secret_defined,
};
use vantage_store::{MemoryCache, ObjectCache};

fn service(name: &str, uid: &str, port_name: &str, port: i32) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": "default", "uid": uid },
        "spec": {
            "selector": { "app": name },
            "ports": [{ "name": port_name, "port": port }],
        },
    })
}

fn secret(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name, "namespace": "default", "uid": format!("uid-{name}") },
        "type": "kubernetes.io/tls",
    })
}

fn ingress(spec: Value) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": { "name": "gateway", "namespace": "default", "uid": "i1" },
        "spec": spec,
    })
}

fn rule(host: Option<&str>, service: &str, port: i32) -> Value {
    let mut rule = json!({
        "http": { "paths": [{
            "path": "/",
            "pathType": "Prefix",
            "backend": { "service": { "name": service, "port": { "number": port } } },
        }]},
    });
    if let Some(host) = host {
        rule["host"] = json!(host);
    }
    rule
}

async fn statuses(objects: &[Value], ingress: &Value) -> ResourceStatusList {
    let cache = MemoryCache::new();
    for object in objects {
        cache.store(object).await.unwrap();
    }
    cache.store(ingress).await.unwrap();
    resource_status(&cache, ingress).await.unwrap()
}

#[tokio::test]
async fn default_backend_with_matching_port_is_clean() {
    let ing = ingress(json!({
        "defaultBackend": { "service": { "name": "web", "port": { "number": 80 } } },
    }));
    let got = statuses(&[service("web", "s1", "http", 80)], &ing).await;
    assert_eq!(got, ResourceStatusList::default());
    assert_eq!(got.collapse(), ResourceStatus::Ok);
}

#[tokio::test]
async fn backend_naming_missing_service_is_an_error() {
    let ing = ingress(json!({ "rules": [rule(None, "ghost", 80)] }));
    let got = statuses(&[], &ing).await;
    assert_eq!(got, ResourceStatusList(vec![no_matching_backend("ghost")]));
    assert_eq!(got.collapse(), ResourceStatus::Error);
}

#[tokio::test]
async fn no_backends_anywhere_is_a_warning() {
    let ing = ingress(json!({ "rules": [{ "host": "web.example.com" }] }));
    let got = statuses(&[], &ing).await;
    assert_eq!(got, ResourceStatusList(vec![no_backends_defined()]));
    assert_eq!(got.collapse(), ResourceStatus::Warning);
}

#[tokio::test]
async fn wrong_port_is_an_error_annotated_with_the_service() {
    let ing = ingress(json!({ "rules": [rule(None, "web", 80)] }));
    let got = statuses(&[service("web", "s1", "http", 8888)], &ing).await;
    assert_eq!(
        got,
        ResourceStatusList(vec![no_matching_port("web", Some("s1"))])
    );
}

#[tokio::test]
async fn rule_host_outside_tls_hosts_is_a_warning() {
    let ing = ingress(json!({
        "rules": [rule(Some("not-the-tls-host.com"), "web", 80)],
        "tls": [{ "hosts": ["sslexample.foo.com"], "secretName": "testsecret-tls" }],
    }));
    let got = statuses(
        &[service("web", "s1", "http", 80), secret("testsecret-tls")],
        &ing,
    )
    .await;
    assert_eq!(
        got,
        ResourceStatusList(vec![mismatched_tls_host("not-the-tls-host.com")])
    );
}

#[tokio::test]
async fn missing_tls_secret_is_an_error() {
    let ing = ingress(json!({
        "rules": [rule(Some("sslexample.foo.com"), "web", 80)],
        "tls": [{ "hosts": ["sslexample.foo.com"], "secretName": "ghost-secret" }],
    }));
    let got = statuses(&[service("web", "s1", "http", 80)], &ing).await;
    assert_eq!(
        got,
        ResourceStatusList(vec![no_matching_tls_secret("ghost-secret")])
    );
}

#[tokio::test]
async fn empty_tls_secret_name_is_an_error() {
    let ing = ingress(json!({
        "rules": [rule(Some("sslexample.foo.com"), "web", 80)],
        "tls": [{ "hosts": ["sslexample.foo.com"] }],
    }));
    let got = statuses(&[service("web", "s1", "http", 80)], &ing).await;
    assert_eq!(got, ResourceStatusList(vec![no_tls_secret_defined()]));
}

#[tokio::test]
async fn findings_accumulate_and_collapse_to_the_worst() {
    let ing = ingress(json!({
        "rules": [rule(Some("not-the-tls-host.com"), "ghost", 80)],
        "tls": [{ "hosts": ["sslexample.foo.com"], "secretName": "testsecret-tls" }],
    }));
    let got = statuses(&[secret("testsecret-tls")], &ing).await;
    assert_eq!(
        got,
        ResourceStatusList(vec![
            no_matching_backend("ghost"),
            mismatched_tls_host("not-the-tls-host.com"),
        ])
    );
    assert_eq!(got.collapse(), ResourceStatus::Error);
}

#[tokio::test]
async fn workload_kinds_are_fixed_ok() {
    let cache = MemoryCache::new();
    let pod = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "web-1", "namespace": "default", "uid": "p1" },
    });
    let got = resource_status(&cache, &pod).await.unwrap();
    assert!(got.is_empty());
    assert_eq!(got.collapse(), ResourceStatus::Ok);
}

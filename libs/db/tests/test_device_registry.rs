//! Integration tests for the Device Registry Workflow: reconciliation,
//! free-text search, grouping, and the imprint → patch → remove lifecycle.

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use foreman_db::{DeviceQuery, DeviceRegistry, DiscoveredDevice, StoreRegistry};

fn setup() -> (TempDir, DeviceRegistry) {
    foreman_core::telemetry::init_test_subscriber();
    let dir = TempDir::new().unwrap();
    let stores = Arc::new(StoreRegistry::new(dir.path()));
    let devices = DeviceRegistry::new(stores, "fleet");
    (dir, devices)
}

fn candidate(mac: &str, address: &str, model: &str) -> DiscoveredDevice {
    DiscoveredDevice {
        mac: mac.to_string(),
        address: address.to_string(),
        model: model.to_string(),
        name: None,
        payload: json!({ "hashrate": 95.0 }),
    }
}

fn query(q: &str) -> DeviceQuery {
    DeviceQuery {
        q: Some(q.to_string()),
    }
}

#[test]
fn reconcile_imprints_new_identities() {
    let (_dir, devices) = setup();

    let imprinted = devices
        .reconcile(&[
            candidate("aa", "10.0.0.1", "Antminer S19"),
            candidate("bb", "10.0.0.2", "Whatsminer M30"),
        ])
        .unwrap();
    assert_eq!(imprinted.len(), 2);

    let all = devices.list_all(None).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn reconcile_is_idempotent_per_identity() {
    let (_dir, devices) = setup();
    let sighting = candidate("aa", "10.0.0.1", "Antminer S19");

    let first = devices.reconcile(std::slice::from_ref(&sighting)).unwrap();
    sleep(Duration::from_millis(15));
    let second = devices.reconcile(std::slice::from_ref(&sighting)).unwrap();

    // Still exactly one record for the identity.
    let all = devices.list_all(None).unwrap();
    assert_eq!(all.len(), 1);

    // created_at survives the re-observation; updated_at is refreshed.
    assert_eq!(second[0].created_at, first[0].created_at);
    assert!(second[0].updated_at > first[0].updated_at);
}

#[test]
fn reconcile_merges_fresh_payload_for_known_identity() {
    let (_dir, devices) = setup();

    devices
        .reconcile(&[candidate("aa", "10.0.0.1", "Antminer S19")])
        .unwrap();

    let mut moved = candidate("aa", "10.0.0.9", "Antminer S19");
    moved.payload = json!({ "hashrate": 101.5 });
    let merged = devices.reconcile(&[moved]).unwrap();

    assert_eq!(merged[0].address, "10.0.0.9");
    assert_eq!(merged[0].payload["hashrate"], 101.5);
}

#[test]
fn search_matches_address_with_and_without_port() {
    let (_dir, devices) = setup();

    devices
        .reconcile(&[
            candidate("aa", "10.0.0.1", "Antminer S19"),
            candidate("bb", "10.0.0.1:4028", "Antminer S19"),
            candidate("cc", "10.0.0.10", "Antminer S19"),
        ])
        .unwrap();

    // The bare address matches itself and the address:port form, but a
    // longer address that merely starts with it must not match.
    let hits = devices.list_all(Some(&query("10.0.0.1"))).unwrap();
    let mut macs: Vec<&str> = hits.iter().map(|d| d.mac.as_str()).collect();
    macs.sort_unstable();
    assert_eq!(macs, vec!["aa", "bb"]);

    // Octet prefixes match at the boundary.
    let hits = devices.list_all(Some(&query("10.0"))).unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn search_matches_model_and_name_substrings_case_insensitively() {
    let (_dir, devices) = setup();

    let mut named = candidate("aa", "10.0.0.1", "Antminer S19");
    named.name = Some("rack-3-unit-7".to_string());
    devices
        .reconcile(&[named, candidate("bb", "10.0.0.2", "Whatsminer M30")])
        .unwrap();

    let hits = devices.list_all(Some(&query("ANTMINER"))).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].mac, "aa");

    let hits = devices.list_all(Some(&query("rack-3"))).unwrap();
    assert_eq!(hits.len(), 1);

    let hits = devices.list_all(Some(&query("miner"))).unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn blank_query_matches_everything() {
    let (_dir, devices) = setup();

    devices
        .reconcile(&[
            candidate("aa", "10.0.0.1", "Antminer S19"),
            candidate("bb", "10.0.0.2", "Whatsminer M30"),
        ])
        .unwrap();

    assert_eq!(devices.list_all(None).unwrap().len(), 2);
    assert_eq!(
        devices.list_all(Some(&DeviceQuery::default())).unwrap().len(),
        2
    );
    assert_eq!(devices.list_all(Some(&query("   "))).unwrap().len(), 2);
}

#[test]
fn group_id_lookup_matches_exactly() {
    let (_dir, devices) = setup();

    devices
        .reconcile(&[
            candidate("aa", "10.0.0.1", "Antminer S19"),
            candidate("bb", "10.0.0.2", "Whatsminer M30"),
        ])
        .unwrap();

    devices.patch("aa", json!({ "group_id": "pool-7" })).unwrap();

    let grouped = devices.get_by_group_id("pool-7").unwrap();
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].mac, "aa");

    // Devices without a grouping id never match, nor do near-miss ids.
    assert!(devices.get_by_group_id("pool").unwrap().is_empty());
    assert!(devices.get_by_group_id("pool-70").unwrap().is_empty());
}

#[test]
fn imprint_patch_remove_lifecycle() {
    let (_dir, devices) = setup();

    devices
        .reconcile(&[candidate("aa", "10.0.0.1", "Antminer S19")])
        .unwrap();

    let hits = devices.list_all(Some(&query("10.0"))).unwrap();
    assert_eq!(hits.len(), 1);
    let created_at = hits[0].created_at.clone();

    let patched = devices.patch("aa", json!({ "address": "10.0.0.2" })).unwrap();
    assert_eq!(patched.address, "10.0.0.2");

    let fetched = devices.get("aa").unwrap().unwrap();
    assert_eq!(fetched.address, "10.0.0.2");
    assert_eq!(fetched.created_at, created_at);

    let removed = devices.remove("aa").unwrap().unwrap();
    assert_eq!(removed.mac, "aa");

    assert!(devices.get("aa").unwrap().is_none());
    assert!(devices.list_all(None).unwrap().is_empty());

    // Removing an already-removed identity is a benign no-op.
    assert!(devices.remove("aa").unwrap().is_none());
}

#[test]
fn get_of_unknown_identity_is_none() {
    let (_dir, devices) = setup();
    assert!(devices.get("unknown").unwrap().is_none());
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the REST client and webhook forwarder using wiremock.

#![cfg(feature = "http")]

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{Harness, lamp};
use feedlink::error::{Error, TransportError};
use feedlink::event::{EventBus, SyncEvent, WebhookForwarder};
use feedlink::protocol::FeedRestClient;
use feedlink::types::{DeviceId, FeedKey, Origin, PowerState};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// FeedRestClient Tests
// ============================================================================

mod rest_client {
    use super::*;

    #[tokio::test]
    async fn fetches_latest_value_with_key_header() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/alice/feeds/lamp/data"))
            .and(query_param("limit", "1"))
            .and(header("X-AIO-Key", "aio_secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "0F1", "value": "1", "created_at": "2024-03-01T07:00:00Z" }
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = FeedRestClient::new(mock_server.uri(), "alice", "aio_secret").unwrap();
        let value = client.latest_value(&FeedKey::new("lamp").unwrap()).await.unwrap();

        assert_eq!(value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn numeric_value_is_stringified() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/alice/feeds/fan/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "value": 0 }])))
            .mount(&mock_server)
            .await;

        let client = FeedRestClient::new(mock_server.uri(), "alice", "k").unwrap();
        let value = client.latest_value(&FeedKey::new("fan").unwrap()).await.unwrap();

        assert_eq!(value.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn empty_feed_returns_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&mock_server)
            .await;

        let client = FeedRestClient::new(mock_server.uri(), "alice", "k").unwrap();
        let value = client.latest_value(&FeedKey::new("lamp").unwrap()).await.unwrap();

        assert!(value.is_none());
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client = FeedRestClient::new(mock_server.uri(), "alice", "bad").unwrap();
        let err = client.latest_value(&FeedKey::new("lamp").unwrap()).await.unwrap_err();

        assert!(matches!(err, Error::Transport(TransportError::UnexpectedStatus(401))));
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = FeedRestClient::new(mock_server.uri(), "alice", "k").unwrap();
        let err = client.latest_value(&FeedKey::new("lamp").unwrap()).await.unwrap_err();

        assert!(matches!(err, Error::Parse(_)));
    }
}

// ============================================================================
// Resync Tests
// ============================================================================

mod resync {
    use super::*;

    #[tokio::test]
    async fn applies_differing_values_only() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/alice/feeds/lamp/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "value": "ON" }])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/alice/feeds/kitchen/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "value": "0" }])))
            .mount(&mock_server)
            .await;

        let lamp = lamp();
        let kitchen = feedlink::state::Device::new(FeedKey::new("kitchen").unwrap(), "Kitchen");
        let harness = Harness::new(&[lamp.clone(), kitchen]).await;
        let client = FeedRestClient::new(mock_server.uri(), "alice", "k").unwrap();

        let applied = harness.bridge().resync(&client).await.unwrap();
        assert_eq!(applied, 1);

        let device = harness.store().device(lamp.id()).await.unwrap();
        assert!(device.is_on());

        let history = harness.store().history(None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].origin, Origin::Feed);
    }

    #[tokio::test]
    async fn unreachable_feed_is_skipped() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let harness = Harness::new(&[lamp()]).await;
        let client = FeedRestClient::new(mock_server.uri(), "alice", "k").unwrap();

        assert_eq!(harness.bridge().resync(&client).await.unwrap(), 0);
    }
}

// ============================================================================
// WebhookForwarder Tests
// ============================================================================

mod webhook {
    use super::*;

    #[tokio::test]
    async fn forwards_event_as_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/device_update"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let forwarder = WebhookForwarder::new(format!("{}/device_update", mock_server.uri())).unwrap();
        let device_id = DeviceId::new();
        let event = SyncEvent::new(device_id, PowerState::On, Origin::Scheduled, Utc::now());

        forwarder.forward(&event).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["deviceId"], serde_json::json!(device_id.to_string()));
        assert_eq!(body["state"], "ON");
        assert_eq!(body["origin"], "scheduled");
    }

    #[tokio::test]
    async fn rejected_post_is_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let forwarder = WebhookForwarder::new(mock_server.uri()).unwrap();
        let event = SyncEvent::new(DeviceId::new(), PowerState::Off, Origin::Manual, Utc::now());

        assert!(matches!(
            forwarder.forward(&event).await,
            Err(TransportError::UnexpectedStatus(503))
        ));
    }

    #[tokio::test]
    async fn spawned_forwarder_follows_bus() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&mock_server)
            .await;

        let bus = EventBus::new();
        let handle = WebhookForwarder::new(mock_server.uri()).unwrap().spawn(&bus);

        bus.publish(SyncEvent::new(DeviceId::new(), PowerState::On, Origin::Manual, Utc::now()));
        bus.publish(SyncEvent::new(DeviceId::new(), PowerState::Off, Origin::Feed, Utc::now()));

        for _ in 0..50 {
            if mock_server.received_requests().await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);

        drop(bus);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

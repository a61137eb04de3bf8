use canary_guardian::anomaly_detection::{Evidence, Finding, Severity};
use canary_guardian::blockchain::NotificationChannel;
use canary_guardian::core::config::NotificationConfig;
use canary_guardian::core::domain::Contract;
use canary_guardian::core::errors::GuardianError;
use canary_guardian::notification::{AlertNotice, WebhookNotifier};
use httpmock::{Method, MockServer};

fn notice(webhook_override: Option<String>) -> AlertNotice {
    let finding = Finding {
        rule_id: 7,
        rule_name: "Price Manipulation Alert".to_string(),
        title: "Abnormal Price Change Detected".to_string(),
        description: "Price increased by 45.0% in short timeframe - possible manipulation".to_string(),
        severity: Severity::Warning,
        data: Evidence::TransactionVolume { transaction_count: 0, window_secs: 0, threshold: 0 },
    };
    AlertNotice::new(&Contract::new(2, "ryjl3-tyaaa-aaaaa-aaaba-cai", "DEX Pool"), finding, webhook_override)
}

fn notifier(url: Option<String>) -> WebhookNotifier {
    WebhookNotifier::new(&NotificationConfig { webhook_url: url, ..Default::default() }).unwrap()
}

#[tokio::test]
async fn posts_embed_to_default_url() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(Method::POST)
                .path("/hooks/default")
                .body_contains("\"username\":\"Canary Guardian\"")
                .body_contains("Abnormal Price Change Detected")
                .body_contains("\"color\":16096779");
            then.status(204);
        })
        .await;

    notifier(Some(server.url("/hooks/default"))).notify(&notice(None)).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn override_url_wins() {
    let server = MockServer::start_async().await;
    let default = server
        .mock_async(|when, then| {
            when.path("/hooks/default");
            then.status(204);
        })
        .await;
    let dedicated = server
        .mock_async(|when, then| {
            when.path("/hooks/dex");
            then.status(200);
        })
        .await;

    notifier(Some(server.url("/hooks/default")))
        .notify(&notice(Some(server.url("/hooks/dex"))))
        .await
        .unwrap();

    dedicated.assert_async().await;
    assert_eq!(default.hits_async().await, 0);
}

#[tokio::test]
async fn non_success_is_a_notification_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(Method::POST);
            then.status(429);
        })
        .await;

    let err = notifier(Some(server.url("/hook"))).notify(&notice(None)).await.unwrap_err();
    assert!(matches!(err, GuardianError::Notification(_)));
}

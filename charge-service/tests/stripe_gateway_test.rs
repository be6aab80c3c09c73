//! Wire-level tests for the Stripe client against a local mock server.

use charge_service::config::StripeConfig;
use charge_service::services::gateway::{
    GatewayChargeStatus, GatewayError, InstrumentCharge, PaymentGateway, PaymentLinkRequest,
    ReferenceKind, RefundReason,
};
use charge_service::services::StripeGateway;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> StripeGateway {
    StripeGateway::new(StripeConfig {
        secret_key: Secret::new("sk_test_123".into()),
        webhook_secret: Secret::new("whsec_test".into()),
        api_base_url: server.uri(),
    })
}

fn sample_charge() -> InstrumentCharge {
    InstrumentCharge {
        amount_minor: 2599,
        currency: "eur".into(),
        billing_profile_id: "cus_abc".into(),
        instrument_ref: "pm_visa".into(),
        description: "Room service".into(),
    }
}

#[tokio::test]
async fn card_charge_confirms_off_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .and(body_string_contains("off_session=true"))
        .and(body_string_contains("confirm=true"))
        .and(body_string_contains("amount=2599"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "status": "succeeded",
            "amount": 2599,
            "currency": "eur",
            "created": 1700000000,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway_for(&server)
        .charge_instrument(sample_charge())
        .await
        .unwrap();

    assert_eq!(result.reference, "pi_123");
    assert_eq!(result.status, GatewayChargeStatus::Succeeded);
}

#[tokio::test]
async fn declined_card_surfaces_decline_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": {
                "type": "card_error",
                "code": "card_declined",
                "decline_code": "insufficient_funds",
                "message": "Your card has insufficient funds.",
            }
        })))
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .charge_instrument(sample_charge())
        .await
        .unwrap_err();

    match err {
        GatewayError::Declined { code, .. } => assert_eq!(code, "insufficient_funds"),
        other => panic!("expected decline, got {:?}", other),
    }
}

#[tokio::test]
async fn checkout_session_yields_payment_link() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .and(body_string_contains("mode=payment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.com/c/pay/cs_test_1",
        })))
        .mount(&server)
        .await;

    let link = gateway_for(&server)
        .create_payment_link(PaymentLinkRequest {
            amount_minor: 45000,
            currency: "eur".into(),
            description: "Suite upgrade".into(),
            expires_at: None,
            success_url: "http://localhost:3004/charges/abc".into(),
        })
        .await
        .unwrap();

    assert_eq!(link.reference, "cs_test_1");
    assert!(link.url.contains("checkout.stripe.com"));
}

#[tokio::test]
async fn intent_settlement_time_comes_from_its_charge() {
    let server = MockServer::start().await;
    // Minted at 1700000000, paid three days later through the hosted link.
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_late"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_late",
            "status": "succeeded",
            "amount": 45000,
            "currency": "eur",
            "created": 1700000000,
            "charges": {
                "data": [{
                    "id": "ch_late",
                    "status": "succeeded",
                    "paid": true,
                    "amount": 45000,
                    "currency": "eur",
                    "created": 1700259200,
                    "payment_intent": "pi_late",
                }]
            },
        })))
        .mount(&server)
        .await;

    let record = gateway_for(&server)
        .retrieve_by_reference(ReferenceKind::Intent, "pi_late")
        .await
        .unwrap();

    assert!(record.settled);
    assert_eq!(record.paid_at.unwrap().timestamp(), 1700259200);
}

#[tokio::test]
async fn intent_without_charge_list_falls_back_to_creation_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payment_intents/pi_bare"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_bare",
            "status": "succeeded",
            "amount": 1000,
            "currency": "eur",
            "created": 1700000000,
        })))
        .mount(&server)
        .await;

    let record = gateway_for(&server)
        .retrieve_by_reference(ReferenceKind::Intent, "pi_bare")
        .await
        .unwrap();

    assert_eq!(record.paid_at.unwrap().timestamp(), 1700000000);
}

#[tokio::test]
async fn charge_record_resolves_owning_intent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/charges/ch_777"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ch_777",
            "status": "succeeded",
            "paid": true,
            "amount": 10000,
            "currency": "eur",
            "created": 1700000000,
            "payment_intent": "pi_owner",
        })))
        .mount(&server)
        .await;

    let record = gateway_for(&server)
        .retrieve_by_reference(ReferenceKind::Charge, "ch_777")
        .await
        .unwrap();

    assert!(record.settled);
    assert_eq!(record.amount_minor, 10000);
    assert_eq!(record.intent_reference.as_deref(), Some("pi_owner"));
    assert_eq!(record.canonical_reference(), "pi_owner");
}

#[tokio::test]
async fn refund_targets_charge_param_for_charge_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refunds"))
        .and(body_string_contains("charge=ch_777"))
        .and(body_string_contains("reason=requested_by_customer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1",
            "status": "succeeded",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refund = gateway_for(&server)
        .refund("ch_777", RefundReason::RequestedByCustomer)
        .await
        .unwrap();

    assert_eq!(refund.reference, "re_1");
}

#[tokio::test]
async fn unreachable_gateway_reports_unavailable() {
    let gateway = StripeGateway::new(StripeConfig {
        secret_key: Secret::new("sk_test_123".into()),
        webhook_secret: Secret::new("whsec_test".into()),
        // Reserved port, nothing listens here.
        api_base_url: "http://127.0.0.1:9".into(),
    });

    let err = gateway.charge_instrument(sample_charge()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
}

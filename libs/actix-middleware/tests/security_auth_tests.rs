/// Authentication tests for the bearer middleware
/// Every protected route must reject missing, expired and mis-signed tokens
use actix_middleware::{Claims, CorrelationIdMiddleware, JwtAuthMiddleware, JwtValidator, UserId};
use actix_web::{test, web, App, HttpResponse};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const JWT_SECRET: &str = "test-secret-key-min-32-chars-long!!!";

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn token(user_id: Uuid, exp_offset: i64, secret: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now() + exp_offset) as usize,
        iat: Some(now() as usize),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .expect("Failed to encode JWT")
}

async fn whoami(user: UserId) -> HttpResponse {
    HttpResponse::Ok().body(user.0.to_string())
}

macro_rules! protected_app {
    () => {
        test::init_service(
            App::new().wrap(CorrelationIdMiddleware).service(
                web::scope("/api")
                    .wrap(JwtAuthMiddleware::new(Arc::new(JwtValidator::hs256(
                        JWT_SECRET.as_bytes(),
                    ))))
                    .route("/me", web::get().to(whoami)),
            ),
        )
        .await
    };
}

#[actix_web::test]
async fn test_valid_bearer_token_reaches_handler() {
    let app = protected_app!();
    let user = Uuid::new_v4();

    let req = test::TestRequest::get()
        .uri("/api/me")
        .insert_header(("Authorization", format!("Bearer {}", token(user, 600, JWT_SECRET))))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-correlation-id"));
    let body = test::read_body(resp).await;
    assert_eq!(body, user.to_string().as_bytes());
}

#[actix_web::test]
async fn test_query_token_is_accepted() {
    let app = protected_app!();
    let user = Uuid::new_v4();

    let req = test::TestRequest::get()
        .uri(&format!("/api/me?token={}", token(user, 600, JWT_SECRET)))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn test_missing_token_is_rejected() {
    let app = protected_app!();

    let req = test::TestRequest::get().uri("/api/me").to_request();
    let err = test::try_call_service(&app, req).await.unwrap_err();

    assert_eq!(err.as_response_error().status_code(), 401);
}

#[actix_web::test]
async fn test_expired_and_mis_signed_tokens_are_rejected() {
    let app = protected_app!();
    let user = Uuid::new_v4();

    for bad in [
        token(user, -600, JWT_SECRET),
        token(user, 600, "wrong-secret-key!!!!!!!!!!!!!!!"),
        "invalid.token.format".to_string(),
    ] {
        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {bad}")))
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.as_response_error().status_code(), 401);
    }
}

#[actix_web::test]
async fn test_inbound_correlation_id_is_echoed() {
    let app = protected_app!();
    let user = Uuid::new_v4();

    let req = test::TestRequest::get()
        .uri("/api/me")
        .insert_header(("Authorization", format!("Bearer {}", token(user, 600, JWT_SECRET))))
        .insert_header(("x-correlation-id", "req-123"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.headers().get("x-correlation-id").unwrap(), "req-123");
}

use actix_web::{dev::Payload, test, FromRequest};
use commune::auth::{create_jwt, Auth, Role};
use serial_test::serial;
use std::env;

// Helper that guarantees a sufficiently long secret for tests.
fn set_secret() {
    env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

#[actix_web::test]
#[serial]
async fn extractor_yields_actor() {
    set_secret();
    let token = create_jwt(42, "tester", vec![Role::User]).expect("token");
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_http_request();
    let mut pl = Payload::None;
    let auth = Auth::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(auth.0.id, 42);
    assert_eq!(auth.0.name, "tester");
    assert!(!auth.0.is_privileged());
}

#[actix_web::test]
#[serial]
async fn extractor_rejects_invalid_token() {
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial]
async fn extractor_requires_header() {
    set_secret();
    let req = test::TestRequest::default().to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

#[actix_web::test]
#[serial]
async fn token_signed_with_other_secret_is_rejected() {
    env::set_var("JWT_SECRET", "another-secret-that-is-32-bytes-long");
    let token = create_jwt(1, "mallory", vec![Role::Admin]).unwrap();
    set_secret();
    let req = test::TestRequest::default()
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    let mut pl = Payload::None;
    assert!(Auth::from_request(&req, &mut pl).await.is_err());
}

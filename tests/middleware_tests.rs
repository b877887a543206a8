use neural_desk::middleware::add_security_headers;
use axum::body::Body;
use axum::http::{header, Request};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower::util::ServiceExt;

#[tokio::test]
async fn test_add_security_headers() {
    let app = Router::new()
        .route("/", get(|| async { "hello" }))
        .layer(from_fn(add_security_headers));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("referrer-policy").unwrap(), "no-referrer");
    assert_eq!(headers.get("cache-control").unwrap(), "no-store");
}

#[tokio::test]
async fn test_existing_cache_control_is_kept() {
    let app = Router::new()
        .route(
            "/",
            get(|| async { ([(header::CACHE_CONTROL, "max-age=60")], "cached").into_response() }),
        )
        .layer(from_fn(add_security_headers));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.headers().get("cache-control").unwrap(), "max-age=60");
}

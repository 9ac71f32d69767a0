mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use common::{connect, drain, only_response};
use gale::context::Validate;
use gale::error::{HandlerError, ValidationErrors};
use gale::handler::{Handler, Json};
use gale::http::{APPLICATION_JSON, Method, Request, RequestError, StatusCode, TEXT_PLAIN};
use gale::middleware::LoggerFilter;
use gale::security::CorsFilter;
use gale::transport::Outbound;
use gale::{ConnectionMode, Context, ContextVariant, Server};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

fn get(path: &str) -> Request {
    Request::builder(Method::Get, path).build()
}

fn counter() -> (Arc<AtomicUsize>, Handler) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    let handler = Handler::effecting(move |ctx: Context| {
        seen.fetch_add(1, Ordering::SeqCst);
        async move { ctx.write_text(StatusCode::Ok, "handled") }
    });
    (hits, handler)
}

#[tokio::test]
async fn user_lookup_end_to_end() {
    let server = Server::builder()
        .get(
            "/users/{id}",
            ContextVariant::Simple,
            Handler::effecting(|ctx: Context| async move {
                let id = ctx.path_variable("id").unwrap_or_default();
                ctx.write_json(StatusCode::Ok, &serde_json::json!({ "id": id }))
            }),
        )
        .unwrap()
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/users/42?verbose=1")).await;

    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.content_type(), Some(APPLICATION_JSON));
    let body: serde_json::Value = serde_json::from_slice(response.body_bytes()).unwrap();
    assert_eq!(body["id"], "42");
}

#[tokio::test]
async fn producing_handlers_write_text_or_json() {
    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Stats {
        users: u32,
        names: Vec<String>,
    }

    let server = Server::builder()
        .get("/ping", ContextVariant::Simple, Handler::producing(|| async { "pong" }))
        .unwrap()
        .get(
            "/stats",
            ContextVariant::Simple,
            Handler::producing(|| async {
                Json(Stats {
                    users: 2,
                    names: vec!["ada".into(), "grace".into()],
                })
            }),
        )
        .unwrap()
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/ping")).await;
    let pong = only_response(&mut rx);
    assert_eq!(pong.status(), StatusCode::Ok);
    assert_eq!(pong.content_type(), Some(TEXT_PLAIN));
    assert_eq!(pong.body_text(), "pong");

    conn.on_request(get("/stats")).await;
    let stats = only_response(&mut rx);
    assert_eq!(stats.content_type(), Some(APPLICATION_JSON));
    let decoded: Stats = serde_json::from_slice(stats.body_bytes()).unwrap();
    assert_eq!(
        decoded,
        Stats {
            users: 2,
            names: vec!["ada".into(), "grace".into()]
        }
    );
}

#[tokio::test]
async fn literal_route_beats_variable_route() {
    let server = Server::builder()
        .get("/users/{id}", ContextVariant::Simple, Handler::producing(|| async { "by id" }))
        .unwrap()
        .get("/users/active", ContextVariant::Simple, Handler::producing(|| async { "active" }))
        .unwrap()
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/users/active")).await;
    assert_eq!(only_response(&mut rx).body_text(), "active");
    conn.on_request(get("/users/7/")).await;
    assert_eq!(only_response(&mut rx).body_text(), "by id");
}

#[tokio::test]
async fn unmatched_route_surfaces_handler_not_found() {
    let plain = Server::builder().build();
    let (mut conn, _transport, mut rx) = connect(&plain);
    conn.on_request(get("/nowhere")).await;
    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(response.body_text(), "Internal Server Error");

    let with_404 = Server::builder()
        .on_error(
            |e| matches!(e, HandlerError::HandlerNotFound),
            |ctx, _| ctx.write_text(StatusCode::NotFound, "Not Found"),
        )
        .build();
    let (mut conn, _transport, mut rx) = connect(&with_404);
    conn.on_request(get("/nowhere")).await;
    assert_eq!(only_response(&mut rx).status(), StatusCode::NotFound);
    assert!(conn.cached_context().is_none());
}

#[tokio::test]
async fn failing_filter_aborts_with_500_and_closes() {
    let (handled, handler) = counter();
    let later = Arc::new(AtomicUsize::new(0));
    let seen_later = Arc::clone(&later);
    let captured: Arc<Mutex<Option<Context>>> = Arc::default();
    let capture = Arc::clone(&captured);

    let server = Server::builder()
        .get("/secret", ContextVariant::Simple, handler)
        .unwrap()
        .filter(LoggerFilter)
        .filter(gale::middleware::FnFilter::new(move |ctx: Context| {
            *capture.lock() = Some(ctx);
            async { Err::<(), _>(HandlerError::msg("token expired")) }
        }))
        .filter(gale::middleware::FnFilter::new(move |_ctx: Context| {
            seen_later.fetch_add(1, Ordering::SeqCst);
            async {}
        }))
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/secret")).await;

    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(response.content_type(), Some(TEXT_PLAIN));
    assert_eq!(response.body_text(), "Internal Server Error");
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert_eq!(later.load(Ordering::SeqCst), 0);
    let ctx = captured.lock().take().unwrap();
    assert!(ctx.is_closed());
}

#[tokio::test]
async fn filter_failure_can_be_mapped_by_exception_chain() {
    let (handled, handler) = counter();
    let server = Server::builder()
        .get("/secret", ContextVariant::Simple, handler)
        .unwrap()
        .filter(gale::middleware::FnFilter::new(|_ctx: Context| async {
            Err::<(), _>(HandlerError::msg("forbidden"))
        }))
        .on_error(
            |e| matches!(e, HandlerError::FilterFailure(_)),
            |ctx, e| ctx.write_text(StatusCode::Forbidden, e.root().to_string()),
        )
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/secret")).await;
    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::Forbidden);
    assert_eq!(response.body_text(), "forbidden");
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exception_chain_first_match_only() {
    let second = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&second);
    let server = Server::builder()
        .get(
            "/boom",
            ContextVariant::Simple,
            Handler::effecting(|_ctx: Context| async { Err::<(), _>(HandlerError::msg("boom")) }),
        )
        .unwrap()
        .on_error(|_| true, |ctx, _| ctx.write_text(StatusCode::BadGateway, "first"))
        .on_error(
            |_| true,
            move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        )
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/boom")).await;
    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::BadGateway);
    assert_eq!(response.body_text(), "first");
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_handler_yields_generic_500() {
    let server = Server::builder()
        .get(
            "/panic",
            ContextVariant::Simple,
            Handler::effecting(|ctx: Context| async move {
                if ctx.parameter("id").is_none() {
                    panic!("id is required");
                }
            }),
        )
        .unwrap()
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    conn.on_request(get("/panic")).await;
    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert_eq!(response.body_text(), "Internal Server Error");
}

#[derive(Debug, Deserialize)]
struct Signup {
    name: String,
    age: u32,
}

impl Validate for Signup {
    fn validate(&self, groups: &[&str]) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.name.trim().is_empty() {
            errors.add("name", "must not be blank");
        }
        if groups.contains(&"adult") && self.age < 18 {
            errors.add("age", "must be at least 18");
        }
        errors.into_result()
    }
}

#[tokio::test]
async fn enhanced_binding_and_validation_errors() {
    let server = Server::builder()
        .post(
            "/signup",
            ContextVariant::Enhanced,
            Handler::effecting(|ctx: Context| async move {
                let signup: Signup = ctx.bind_json(&["adult"])?;
                ctx.write_text(StatusCode::Created, format!("welcome {}", signup.name));
                Ok::<(), HandlerError>(())
            }),
        )
        .unwrap()
        .on_error(
            |e| matches!(e, HandlerError::ValidationFailed(_)),
            |ctx, e| match e {
                HandlerError::ValidationFailed(errors) => {
                    ctx.write_json(StatusCode::UnprocessableEntity, errors)
                }
                _ => Ok(()),
            },
        )
        .on_error(
            |e| matches!(e, HandlerError::NoRequestBody),
            |ctx, _| ctx.write_text(StatusCode::BadRequest, "body required"),
        )
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    let post = |body: Option<&str>| {
        let builder = Request::builder(Method::Post, "/signup");
        match body {
            Some(body) => builder.body(body).build(),
            None => builder.build(),
        }
    };

    conn.on_request(post(Some(r#"{"name":"ada","age":36}"#))).await;
    let ok = only_response(&mut rx);
    assert_eq!(ok.status(), StatusCode::Created);
    assert_eq!(ok.body_text(), "welcome ada");

    conn.on_request(post(Some(r#"{"name":" ","age":12}"#))).await;
    let invalid = only_response(&mut rx);
    assert_eq!(invalid.status(), StatusCode::UnprocessableEntity);
    let violations: serde_json::Value = serde_json::from_slice(invalid.body_bytes()).unwrap();
    assert_eq!(violations.as_array().map(Vec::len), Some(2));
    assert_eq!(violations[0]["field"], "name");

    conn.on_request(post(None)).await;
    assert_eq!(only_response(&mut rx).status(), StatusCode::BadRequest);
}

#[tokio::test]
async fn cors_preflight_skips_the_handler() {
    let (handled, handler) = counter();
    let server = Server::builder()
        .route(Method::Options, "/api", ContextVariant::Simple, handler)
        .unwrap()
        .filter(CorsFilter::new().allow_origin("https://app.test"))
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    let preflight = Request::builder(Method::Options, "/api")
        .header("Origin", "https://app.test")
        .header("Access-Control-Request-Method", "POST")
        .build();
    conn.on_request(preflight).await;

    let response = only_response(&mut rx);
    assert_eq!(response.status(), StatusCode::NoContent);
    assert_eq!(
        response.headers().get("Access-Control-Allow-Origin"),
        Some("https://app.test")
    );
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pipelined_bytes_are_dispatched_in_order() {
    let server = Server::builder()
        .get("/a", ContextVariant::Simple, Handler::producing(|| async { "A" }))
        .unwrap()
        .post(
            "/b",
            ContextVariant::Simple,
            Handler::effecting(|ctx: Context| async move {
                ctx.write_text(StatusCode::Ok, ctx.body().unwrap_or_default());
            }),
        )
        .unwrap()
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    let mut buf = BytesMut::from(
        &b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nPOST /b HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel"[..],
    );
    assert_eq!(conn.on_bytes(&mut buf).await.unwrap(), 1);
    assert_eq!(only_response(&mut rx).body_text(), "A");
    assert!(!buf.is_empty());

    buf.extend_from_slice(b"lo");
    assert_eq!(conn.on_bytes(&mut buf).await.unwrap(), 1);
    assert_eq!(only_response(&mut rx).body_text(), "hello");
    assert!(buf.is_empty());
    assert_eq!(conn.mode(), ConnectionMode::Request);
}

#[tokio::test]
async fn malformed_bytes_get_400_and_teardown() {
    let server = Server::builder().build();
    let (mut conn, transport, mut rx) = connect(&server);

    let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nBad Header\r\n\r\n"[..]);
    let err = conn.on_bytes(&mut buf).await.unwrap_err();
    assert!(matches!(err, RequestError::Parse(_)));

    let out = drain(&mut rx);
    match out.as_slice() {
        [Outbound::Response(r), Outbound::Close] => {
            assert_eq!(r.status(), StatusCode::BadRequest);
            assert!(!r.is_keep_alive());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(transport.is_closed());
    assert_eq!(conn.mode(), ConnectionMode::Closed);
}

#[tokio::test]
async fn overflowing_or_garbled_content_length_gets_400() {
    let (hits, handler) = counter();
    let server = Server::builder()
        .post("/", ContextVariant::Simple, handler)
        .unwrap()
        .build();

    for raw in [
        &b"POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nx"[..],
        &b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\nGET / HTTP/1.1\r\n\r\n"[..],
    ] {
        let (mut conn, transport, mut rx) = connect(&server);
        let mut buf = BytesMut::from(raw);
        let err = conn.on_bytes(&mut buf).await.unwrap_err();
        assert!(matches!(err, RequestError::InvalidContentLength(_)));

        match drain(&mut rx).as_slice() {
            [Outbound::Response(r), Outbound::Close] => {
                assert_eq!(r.status(), StatusCode::BadRequest);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(transport.is_closed());
        assert_eq!(conn.mode(), ConnectionMode::Closed);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn declared_body_over_limit_gets_413_before_it_arrives() {
    let (hits, handler) = counter();
    let server = Server::builder()
        .config(gale::Config {
            max_request_bytes: 1024,
            ..gale::Config::default()
        })
        .post("/upload", ContextVariant::Simple, handler)
        .unwrap()
        .build();
    let (mut conn, transport, mut rx) = connect(&server);

    let mut buf = BytesMut::from(&b"POST /upload HTTP/1.1\r\nContent-Length: 1000000\r\n\r\n"[..]);
    let err = conn.on_bytes(&mut buf).await.unwrap_err();
    assert!(matches!(err, RequestError::TooLarge { limit: 1024 }));

    match drain(&mut rx).as_slice() {
        [Outbound::Response(r), Outbound::Close] => {
            assert_eq!(r.status(), StatusCode::PayloadTooLarge);
            assert!(!r.is_keep_alive());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(transport.is_closed());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connection_close_tears_down_after_response() {
    let server = Server::builder()
        .get("/bye", ContextVariant::Simple, Handler::producing(|| async { "bye" }))
        .unwrap()
        .build();
    let (mut conn, _transport, mut rx) = connect(&server);

    let mut buf = BytesMut::from(&b"GET /bye HTTP/1.1\r\nConnection: close\r\n\r\n"[..]);
    assert_eq!(conn.on_bytes(&mut buf).await.unwrap(), 1);

    let out = drain(&mut rx);
    assert!(matches!(out.as_slice(), [Outbound::Response(r), Outbound::Close] if !r.is_keep_alive()));
    assert_eq!(conn.mode(), ConnectionMode::Closed);

    conn.on_request(get("/bye")).await;
    assert!(drain(&mut rx).is_empty());
}

use axum::http::{self, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use md5::{Digest, Md5};
use mock_server::{
    app, router, AuthMode, MockState, BOUNDARY, NOT_LOGGED_IN, NO_OBJECT, NO_RECORDS, PAGE_SIZE, PASSWORD, REALM,
    USERNAME,
};
use tower::ServiceExt;

const GOOD_AUTH: &str = "Basic YWdlbnQ6c2VjcmV0";
const BAD_AUTH: &str = "Basic YWdlbnQ6d3Jvbmc=";

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_text(response: axum::response::Response) -> String {
    String::from_utf8_lossy(&body_bytes(response).await).into_owned()
}

fn request(uri: &str, auth: Option<&str>, session: Option<&str>) -> Request<String> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(http::header::AUTHORIZATION, auth);
    }
    if let Some(session) = session {
        builder = builder.header(http::header::COOKIE, format!("RETS-Session-ID={session}"));
    }
    builder.body(String::new()).unwrap()
}

/// Log in on `app` and return the issued session id.
async fn login(app: &Router) -> String {
    let resp = app
        .clone()
        .oneshot(request("/rets/login", Some(GOOD_AUTH), None))
        .await
        .unwrap();
    let cookie = resp.headers()[http::header::SET_COOKIE].to_str().unwrap().to_string();
    cookie
        .strip_prefix("RETS-Session-ID=")
        .and_then(|rest| rest.split(';').next())
        .unwrap()
        .to_string()
}

// --- login ---

#[tokio::test]
async fn login_without_credentials_is_challenged() {
    let resp = app().oneshot(request("/rets/login", None, None)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp.headers()[http::header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.starts_with("Basic"));
}

#[tokio::test]
async fn login_with_wrong_password_replies_401() {
    let resp = app().oneshot(request("/rets/login", Some(BAD_AUTH), None)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.contains("ReplyCode=\"401\""));
}

#[tokio::test]
async fn login_lists_capabilities_and_sets_session() {
    let resp = app().oneshot(request("/rets/login", Some(GOOD_AUTH), None)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["rets-version"], "RETS/1.7.2");
    assert!(resp.headers()[http::header::SET_COOKIE]
        .to_str()
        .unwrap()
        .starts_with("RETS-Session-ID="));
    let body = body_text(resp).await;
    assert!(body.contains("ReplyCode=\"0\""));
    assert!(body.contains("\r\nSearch=/rets/search\r\n"));
    assert!(body.contains("\r\nAction=/rets/action\r\n"));
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Value of a quoted `key="value"` parameter in a challenge.
fn challenge_param<'a>(challenge: &'a str, key: &str) -> &'a str {
    let start = challenge.find(&format!("{key}=\"")).unwrap() + key.len() + 2;
    let len = challenge[start..].find('"').unwrap();
    &challenge[start..start + len]
}

fn digest_authorization(nonce: &str, uri: &str, nc: u32) -> String {
    let nc = format!("{nc:08x}");
    let ha1 = md5_hex(&format!("{USERNAME}:{REALM}:{PASSWORD}"));
    let ha2 = md5_hex(&format!("GET:{uri}"));
    let response = md5_hex(&format!("{ha1}:{nonce}:{nc}:abc:auth:{ha2}"));
    format!(
        "Digest username=\"{USERNAME}\", realm=\"{REALM}\", nonce=\"{nonce}\", uri=\"{uri}\", \
response=\"{response}\", qop=auth, nc={nc}, cnonce=\"abc\""
    )
}

#[tokio::test]
async fn digest_login_round_trip() {
    let state = MockState::new(AuthMode::Digest);
    let app = router(state.clone());

    let resp = app.clone().oneshot(request("/rets/login", None, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let challenge = resp.headers()[http::header::WWW_AUTHENTICATE].to_str().unwrap().to_string();
    assert!(challenge.starts_with("Digest"));
    assert!(challenge.contains("qop=\"auth\""));
    let nonce = challenge_param(&challenge, "nonce");

    let auth = digest_authorization(nonce, "/rets/login", 1);
    let resp = app.clone().oneshot(request("/rets/login", Some(&auth), None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(http::header::SET_COOKIE));
    assert_eq!(state.nonce_counts(), [1]);

    // Replaying the same nonce count gets a fresh challenge.
    let resp = app.clone().oneshot(request("/rets/login", Some(&auth), None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- session ---

#[tokio::test]
async fn search_requires_session() {
    let resp = app()
        .oneshot(request("/rets/search?Class=RES", Some(GOOD_AUTH), Some("forged")))
        .await
        .unwrap();

    assert!(body_text(resp).await.contains(&format!("ReplyCode=\"{NOT_LOGGED_IN}\"")));
}

#[tokio::test]
async fn logout_ends_session() {
    let app = app();
    let session = login(&app).await;

    let resp = app
        .clone()
        .oneshot(request("/rets/logout", Some(GOOD_AUTH), Some(&session)))
        .await
        .unwrap();
    assert!(body_text(resp).await.contains("ReplyCode=\"0\""));

    let resp = app
        .oneshot(request("/rets/search?Class=RES", Some(GOOD_AUTH), Some(&session)))
        .await
        .unwrap();
    assert!(body_text(resp).await.contains(&format!("ReplyCode=\"{NOT_LOGGED_IN}\"")));
}

// --- search ---

#[tokio::test]
async fn first_page_is_truncated() {
    let app = app();
    let session = login(&app).await;
    let resp = app
        .oneshot(request("/rets/search?Class=RES&Offset=1", Some(GOOD_AUTH), Some(&session)))
        .await
        .unwrap();

    let body = body_text(resp).await;
    assert_eq!(body.matches("<DATA>").count(), PAGE_SIZE);
    assert!(body.contains("<MAXROWS/>"));
    assert!(body.contains("<COUNT Records=\"7\"/>"));
    assert!(body.contains("<DELIMITER value=\"09\"/>"));
}

#[tokio::test]
async fn last_page_has_no_maxrows() {
    let app = app();
    let session = login(&app).await;
    let resp = app
        .oneshot(request("/rets/search?Class=RES&Offset=7", Some(GOOD_AUTH), Some(&session)))
        .await
        .unwrap();

    let body = body_text(resp).await;
    assert_eq!(body.matches("<DATA>").count(), 1);
    assert!(!body.contains("MAXROWS"));
}

#[tokio::test]
async fn unknown_class_has_no_records() {
    let app = app();
    let session = login(&app).await;
    let resp = app
        .oneshot(request("/rets/search?Class=LAND", Some(GOOD_AUTH), Some(&session)))
        .await
        .unwrap();

    assert!(body_text(resp).await.contains(&format!("ReplyCode=\"{NO_RECORDS}\"")));
}

// --- objects ---

#[tokio::test]
async fn multipart_objects_with_error_part() {
    let app = app();
    let session = login(&app).await;
    let resp = app
        .oneshot(request(
            "/rets/getobject?Resource=Property&Type=Photo&ID=L1%3A1%3A2%2CL99%3A1&Location=0",
            Some(GOOD_AUTH),
            Some(&session),
        ))
        .await
        .unwrap();

    let content_type = resp.headers()[http::header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("multipart/parallel"));
    assert!(content_type.contains(BOUNDARY));
    let body = body_text(resp).await;
    assert_eq!(body.matches(&format!("--{BOUNDARY}\r\n")).count(), 3);
    assert!(body.contains(&format!("ReplyCode=\"{NO_OBJECT}\"")));
    assert!(body.ends_with(&format!("--{BOUNDARY}--\r\n")));
}

#[tokio::test]
async fn single_object_is_not_multipart() {
    let app = app();
    let session = login(&app).await;
    let resp = app
        .oneshot(request(
            "/rets/getobject?Resource=Property&Type=Photo&ID=L2%3A1&Location=0",
            Some(GOOD_AUTH),
            Some(&session),
        ))
        .await
        .unwrap();

    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(resp.headers()["object-id"], "1");
    let body = body_bytes(resp).await;
    assert_eq!(&body[..4], b"\xff\xd8\xff\xe0");
}

// --- metadata ---

#[tokio::test]
async fn system_metadata() {
    let app = app();
    let session = login(&app).await;
    let resp = app
        .oneshot(request(
            "/rets/getmetadata?Type=METADATA-SYSTEM&ID=0&Format=STANDARD-XML",
            Some(GOOD_AUTH),
            Some(&session),
        ))
        .await
        .unwrap();

    let body = body_text(resp).await;
    assert!(body.contains("SystemID=\"MOCK\""));
    assert!(body.contains("<Comments>"));
}

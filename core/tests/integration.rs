//! End-to-end session tests against the live mock RETS server.
//!
//! # Design
//! Starts the mock server on a random port, then drives `RetsClient` over
//! real HTTP with the shipped `UreqTransport`: Basic challenge handling,
//! the session cookie, the `Action` follow-up, offset paging, multipart
//! objects and metadata all go through the same code callers use.

use mock_server::{AuthMode, MockState};
use rets_core::{Credentials, ObjectRequest, Options, RetsClient, RetsError, SearchRequest};

/// Start the mock server on a random port and return its login URL.
fn start_server() -> String {
    start_server_with(MockState::default())
}

fn start_server_with(state: MockState) -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::serve(listener, state).await
        })
        .unwrap();
    });

    format!("http://{addr}/rets/login")
}

fn credentials() -> Credentials {
    Credentials::new(mock_server::USERNAME, mock_server::PASSWORD)
}

fn connect(options: Options) -> RetsClient {
    RetsClient::connect(&start_server(), &credentials(), options).unwrap()
}

#[test]
fn session_lifecycle() {
    let mut client = connect(Options::default());

    // Step 1: login negotiated capabilities and server facts.
    assert!(client.is_connected());
    assert_eq!(client.server_version(), Some("RETS/1.7.2"));
    assert!(client.server_software().unwrap_or_default().starts_with("MockRETS/"));
    assert!(client.is_auth_type_supported("basic").unwrap());
    assert!(!client.is_auth_type_supported("digest").unwrap());
    assert_eq!(client.capability_url("Search"), Some("/rets/search"));
    assert_eq!(client.server_info().get("MemberName").map(String::as_str), Some("Jane Doe"));

    // Step 2: one page only without offset support.
    let id = client
        .search_query(&SearchRequest::new("Property", "RES", "(City=Springfield)"))
        .unwrap();
    assert_eq!(client.num_rows(id), Some(mock_server::PAGE_SIZE));
    assert_eq!(client.total_records_found(id), Some(7));
    assert_eq!(client.is_maxrows_reached(id), Some(true));
    assert_eq!(client.search_fields(id).unwrap(), ["ListingID", "ListPrice", "City"]);

    let first = client.fetch_row(id).unwrap();
    assert_eq!(first.get("ListingID"), Some("L1"));
    assert_eq!(first.get("ListPrice"), Some("250000"));
    assert_eq!(first.get("City"), Some("Springfield"));
    assert!(client.free_result(id));
    assert!(client.fetch_row(id).is_none());

    // Step 3: metadata.
    let info = client.server_information().unwrap();
    assert_eq!(info.system_id, "MOCK");
    assert_eq!(info.system_description, "Mock RETS Server");
    assert_eq!(info.timezone_offset, "-05:00");
    assert_eq!(info.comments, "Integration test fixture");

    let resources = client.get_metadata("METADATA-RESOURCE", "0").unwrap();
    let resource = resources
        .root
        .path(&["METADATA", "METADATA-RESOURCE", "Resource", "ResourceID"])
        .unwrap();
    assert_eq!(resource.text, "Property");

    let err = client.get_metadata("METADATA-BOGUS", "0").unwrap_err();
    assert_eq!(err.reply_code(), Some(mock_server::INVALID_TYPE));

    // Step 4: logout; the session is closed on both ends.
    client.disconnect().unwrap();
    assert!(!client.is_connected());
    assert!(matches!(
        client.search_query(&SearchRequest::new("Property", "RES", "*")),
        Err(RetsError::Configuration(_))
    ));
}

#[test]
fn digest_login_reuses_challenge() {
    let state = MockState::new(AuthMode::Digest);
    let url = start_server_with(state.clone());
    let mut client = RetsClient::connect(&url, &credentials(), Options::default()).unwrap();

    assert!(client.is_auth_type_supported("digest").unwrap());
    assert!(!client.is_auth_type_supported("basic").unwrap());
    // Login answered the challenge with nc=1; Action reused it with nc=2.
    assert_eq!(state.nonce_counts(), [2]);
    // The cookie came on the retried login and survived the header merge.
    assert!(client.session_id().is_some_and(|id| !id.is_empty()));

    // The URI signed for a search includes its query string.
    let id = client
        .search_query(&SearchRequest::new("Property", "RES", "(City=Springfield)"))
        .unwrap();
    assert_eq!(client.num_rows(id), Some(mock_server::PAGE_SIZE));
    assert_eq!(state.nonce_counts(), [3]);

    client.disconnect().unwrap();
    assert_eq!(state.nonce_counts(), [4]);
}

#[test]
fn digest_wrong_password_is_rejected() {
    let url = start_server_with(MockState::new(AuthMode::Digest));
    let result = RetsClient::connect(
        &url,
        &Credentials::new(mock_server::USERNAME, "wrong"),
        Options::default(),
    );
    assert!(matches!(result, Err(RetsError::Protocol { code: 401, .. })));
}

#[test]
fn offset_paging_collects_every_row() {
    let options = Options {
        offset_support: true,
        ..Options::default()
    };
    let mut client = connect(options);

    let rows = client.search(&SearchRequest::new("Property", "RES", "*")).unwrap();
    let ids: Vec<&str> = rows.iter().filter_map(|r| r.get("ListingID")).collect();
    assert_eq!(ids, ["L1", "L2", "L3", "L4", "L5", "L6", "L7"]);

    let id = client.last_search_id().unwrap();
    assert_eq!(client.num_rows(id), Some(7));
    assert_eq!(client.is_maxrows_reached(id), Some(false));

    let single = client
        .search_query(&SearchRequest::new("Property", "RES", "*").single_page())
        .unwrap();
    assert!(single > id);
    assert_eq!(client.num_rows(single), Some(mock_server::PAGE_SIZE));
}

#[test]
fn no_records_surfaces_reply_code() {
    let mut client = connect(Options::default());
    let err = client.search(&SearchRequest::new("Property", "LAND", "*")).unwrap_err();
    assert!(err.is_no_records());
}

#[test]
fn objects_multipart_and_single() {
    let mut client = connect(Options::default());

    let records = client
        .get_object(&ObjectRequest::new("Property", "Photo", &["L1", "L99"], "1,2"))
        .unwrap();
    assert_eq!(records.len(), 4);
    assert!(records[0].success);
    assert_eq!(records[0].content_id.as_deref(), Some("L1"));
    assert_eq!(records[0].object_id.as_deref(), Some("1"));
    assert_eq!(records[0].content_description.as_deref(), Some("Photo 1"));
    assert!(records[0].data.starts_with(b"\xff\xd8\xff\xe0"));
    assert!(records[0].data.ends_with(b"photo L1-1"));
    assert_eq!(records[1].object_id.as_deref(), Some("2"));
    for failed in &records[2..] {
        assert!(!failed.success);
        assert_eq!(failed.error.as_ref().map(|e| e.code), Some(mock_server::NO_OBJECT));
    }

    let single = client
        .get_object(&ObjectRequest::new("Property", "Photo", &["L2"], "1"))
        .unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(single[0].length, single[0].data.len());
    assert!(single[0].data.ends_with(b"photo L2-1"));

    let locations = client
        .get_object(&ObjectRequest::new("Property", "Photo", &["L3"], "*").location(true))
        .unwrap();
    assert_eq!(locations.len(), 2);
    assert_eq!(
        locations[1].location.as_deref(),
        Some("http://cdn.mock-rets.test/L3/2.jpg")
    );
    assert!(locations[1].data.is_empty());
}

#[test]
fn wrong_password_is_rejected() {
    let result = RetsClient::connect(
        &start_server(),
        &Credentials::new(mock_server::USERNAME, "wrong"),
        Options::default(),
    );
    match result.err() {
        Some(RetsError::Protocol { code, .. }) => assert_eq!(code, 401),
        other => panic!("expected reply code 401, got {other:?}"),
    }
}

#[test]
fn forced_basic_authentication() {
    let options = Options {
        force_basic_authentication: true,
        ..Options::default()
    };
    let client = connect(options);
    assert!(client.is_connected());
    // Pre-emptive credentials mean the server never had to challenge.
    assert!(!client.is_auth_type_supported("basic").unwrap());
}

#[test]
fn unknown_option_name_is_rejected() {
    let mut options = Options::default();
    assert!(matches!(options.set("cookie_jar", "/tmp/x"), Err(RetsError::Configuration(_))));
    options.set("offset_support", "true").unwrap();
    assert!(options.offset_support);
}

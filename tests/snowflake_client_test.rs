use serde_json::json;
use tablechat::config::WarehouseConfig;
use tablechat::execution::{SnowflakeWarehouse, Warehouse, WarehouseError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn warehouse(server: &MockServer) -> SnowflakeWarehouse {
    SnowflakeWarehouse::new(WarehouseConfig {
        account: "acme.eu-west-1".to_string(),
        user: "analyst".to_string(),
        password: "secret".to_string(),
        database: "DB".to_string(),
        schema: "SALES".to_string(),
        base_url: Some(server.uri()),
        ..WarehouseConfig::default()
    })
    .unwrap()
}

async fn mount_login(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/session/v1/login-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"token": token}
        })))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_once_and_type_rows() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .and(header("Authorization", "Snowflake Token=\"tok-1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "rowtype": [
                    {"name": "COUNTRY", "type": "text"},
                    {"name": "TOTAL", "type": "fixed", "scale": 0},
                    {"name": "SHARE", "type": "real"}
                ],
                "rowset": [["AR", "120", "0.5"], ["UY", null, "0.25"]]
            }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let wh = warehouse(&server);
    let first = wh.run("SELECT COUNTRY, TOTAL, SHARE FROM ORDERS").await.unwrap();
    let second = wh.run("SELECT COUNTRY, TOTAL, SHARE FROM ORDERS").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.columns, vec!["COUNTRY", "TOTAL", "SHARE"]);
    assert_eq!(first.value(0, "TOTAL"), Some(&json!(120)));
    assert_eq!(first.value(0, "SHARE"), Some(&json!(0.5)));
    assert_eq!(first.value(1, "TOTAL"), Some(&json!(null)));
}

#[tokio::test]
async fn test_expired_session_is_connection_error() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 2).await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": "390112",
            "message": "Your session has expired. Please login again."
        })))
        .mount(&server)
        .await;

    let wh = warehouse(&server);
    let err = wh.run("SELECT 1").await.unwrap_err();
    assert!(err.is_connection());

    wh.reconnect().await.unwrap();
}

#[tokio::test]
async fn test_compilation_error_is_programming_error() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": "000904",
            "message": "SQL compilation error: error line 1 at position 7 invalid identifier 'REGION'"
        })))
        .mount(&server)
        .await;

    let err = warehouse(&server).run("SELECT REGION FROM ORDERS").await.unwrap_err();
    match err {
        WarehouseError::Programming(msg) => assert!(msg.contains("invalid identifier 'REGION'")),
        other => panic!("expected a programming error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_login_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/v1/login-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": "390100",
            "message": "Incorrect username or password was specified."
        })))
        .mount(&server)
        .await;

    let err = warehouse(&server).run("SELECT 1").await.unwrap_err();
    assert!(matches!(err, WarehouseError::Connection(ref m) if m.contains("390100")));
}

#[tokio::test]
async fn test_remote_chunks_are_appended_in_order() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "rowtype": [{"name": "N", "type": "fixed", "scale": 0}],
                "rowset": [["1"], ["2"]],
                "total": 5,
                "qrmk": "c2VjcmV0",
                "chunks": [
                    {"url": format!("{}/stage/chunk0", server.uri()), "rowCount": 2},
                    {"url": format!("{}/stage/chunk1", server.uri()), "rowCount": 1}
                ]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stage/chunk0"))
        .and(header("x-amz-server-side-encryption-customer-key", "c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[\"3\"],\n[\"4\"]"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stage/chunk1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[\"5\"]"))
        .expect(1)
        .mount(&server)
        .await;

    let rows = warehouse(&server).run("SELECT N FROM BIG").await.unwrap();
    let values: Vec<_> = rows.rows.iter().map(|r| r.values()[0].clone()).collect();
    assert_eq!(values, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
}

#[tokio::test]
async fn test_failed_chunk_download_fails_the_query() {
    let server = MockServer::start().await;
    mount_login(&server, "tok-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/queries/v1/query-request"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "rowtype": [{"name": "N", "type": "fixed", "scale": 0}],
                "rowset": [["1"]],
                "chunks": [{"url": format!("{}/stage/chunk0", server.uri()), "rowCount": 1000}]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stage/chunk0"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = warehouse(&server).run("SELECT N FROM BIG").await.unwrap_err();
    assert!(matches!(err, WarehouseError::Programming(ref m) if m.contains("403")));
}

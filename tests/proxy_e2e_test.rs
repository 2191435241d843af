// End-to-end tests over a live TCP server speaking the framed protocol.

use ojp::backend::memory::MemDatabase;
use ojp::backend::value::SqlValue;
use ojp::config::properties::Properties;
use ojp::config::server::ServerConfig;
use ojp::error::xa_code;
use ojp::server::protocol::{read_frame, write_frame, Request, Response, SessionInfo};
use ojp::server::OjpServer;
use ojp::xa::xid::{flags, XidKey};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn call(&mut self, request: Request) -> Response {
        write_frame(&mut self.stream, &request).await.unwrap();
        read_frame(&mut self.stream, 16 * 1024 * 1024)
            .await
            .unwrap()
            .expect("server closed connection")
    }

    async fn open_session(&mut self, url: &str, xa: bool) -> SessionInfo {
        match self
            .call(Request::Connect {
                url: url.to_string(),
                user: String::new(),
                properties: Properties::new(),
                xa,
            })
            .await
        {
            Response::Connected { session } => session,
            other => panic!("connect failed: {:?}", other),
        }
    }

    async fn close_session(&mut self, session: &SessionInfo) {
        match self.call(Request::Close { session: session.clone() }).await {
            Response::Closed => {}
            other => panic!("close failed: {:?}", other),
        }
    }
}

async fn start_server() -> (Arc<OjpServer>, std::net::SocketAddr) {
    let config = ServerConfig {
        connection_idle_timeout: Duration::from_secs(60),
        ..ServerConfig::default()
    };
    let server = Arc::new(OjpServer::build(config, Properties::new(), "test-node"));
    server.initialize().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = runner.run(listener).await;
    });
    (server, addr)
}

#[tokio::test]
async fn test_select_one_round_trip() {
    MemDatabase::reset("test");
    let (server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;

    let session = client
        .open_session("jdbc:ojp[localhost:1059]_h2:mem:test", false)
        .await;
    assert!(session.conn_hash.is_some());

    let ctx = server.dispatcher().context();
    assert_eq!(ctx.sessions.session_count(), 1);

    let result_set = match client
        .call(Request::ExecuteQuery {
            session: session.clone(),
            sql: Some("SELECT 1".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await
    {
        Response::ResultSet { result_set, .. } => result_set,
        other => panic!("unexpected response: {:?}", other),
    };

    match client
        .call(Request::Fetch {
            session: session.clone(),
            result_set,
            max_rows: 100,
        })
        .await
    {
        Response::Page { rows, done } => {
            assert!(done);
            assert_eq!(rows, vec![vec![SqlValue::Int(1)]]);
        }
        other => panic!("unexpected response: {:?}", other),
    }

    client.close_session(&session).await;
    assert_eq!(ctx.sessions.session_count(), 0);
    assert_eq!(ctx.registries.total_entries(), 0);

    // Exactly one backend was borrowed and went back to the pool.
    let metrics = ctx.pools.metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].1.total_borrows, 1);
    assert_eq!(metrics[0].1.active, 0);
    assert_eq!(metrics[0].1.idle, 1);
}

#[tokio::test]
async fn test_pool_bounds_sequential_connect_storm() {
    MemDatabase::reset("storm");
    let (_server, addr) = start_server().await;
    let mut client_a = TestClient::connect(addr).await;
    let mut client_b = TestClient::connect(addr).await;

    for _ in 0..50 {
        for client in [&mut client_a, &mut client_b] {
            let session = client.open_session("mem:storm", false).await;
            match client
                .call(Request::ExecuteQuery {
                    session: session.clone(),
                    sql: Some("SELECT 1".to_string()),
                    statement: None,
                    params: Vec::new(),
                })
                .await
            {
                Response::ResultSet { .. } => {}
                other => panic!("unexpected response: {:?}", other),
            }
            client.close_session(&session).await;
        }
    }

    // Default maximumPoolSize is 10; a hundred sequential sessions must
    // never exceed it at the backend.
    assert!(MemDatabase::peak_connections("storm") <= 10);
}

#[tokio::test]
async fn test_prepared_statement_and_update_counts() {
    MemDatabase::reset("prep");
    let (_server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let session = client.open_session("mem:prep", false).await;

    for sql in ["CREATE TABLE t (id INT, name VARCHAR)"] {
        match client
            .call(Request::ExecuteUpdate {
                session: session.clone(),
                sql: Some(sql.to_string()),
                statement: None,
                params: Vec::new(),
            })
            .await
        {
            Response::UpdateCount(_) => {}
            other => panic!("unexpected response: {:?}", other),
        }
    }

    let statement = match client
        .call(Request::Prepare {
            session: session.clone(),
            sql: "INSERT INTO t VALUES (?, ?)".to_string(),
        })
        .await
    {
        Response::Prepared { statement } => statement,
        other => panic!("unexpected response: {:?}", other),
    };

    match client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: None,
            statement: Some(statement),
            params: vec![SqlValue::Int(1), SqlValue::Text("alice".to_string())],
        })
        .await
    {
        Response::UpdateCount(count) => assert_eq!(count, 1),
        other => panic!("unexpected response: {:?}", other),
    }

    match client.call(Request::Commit { session: session.clone() }).await {
        Response::Ok => {}
        other => panic!("unexpected response: {:?}", other),
    }

    client.close_session(&session).await;
}

#[tokio::test]
async fn test_savepoint_round_trip() {
    MemDatabase::reset("save");
    let (_server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let session = client.open_session("mem:save", false).await;

    client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("CREATE TABLE t (v INT)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await;
    client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await;
    assert!(matches!(
        client
            .call(Request::SetSavepoint {
                session: session.clone(),
                name: "sp1".to_string()
            })
            .await,
        Response::Ok
    ));
    client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("INSERT INTO t VALUES (2)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await;
    assert!(matches!(
        client
            .call(Request::RollbackToSavepoint {
                session: session.clone(),
                name: "sp1".to_string()
            })
            .await,
        Response::Ok
    ));
    client.call(Request::Commit { session: session.clone() }).await;

    let result_set = match client
        .call(Request::ExecuteQuery {
            session: session.clone(),
            sql: Some("SELECT COUNT(*) FROM t".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await
    {
        Response::ResultSet { result_set, .. } => result_set,
        other => panic!("unexpected response: {:?}", other),
    };
    match client
        .call(Request::Fetch {
            session: session.clone(),
            result_set,
            max_rows: 10,
        })
        .await
    {
        Response::Page { rows, .. } => assert_eq!(rows[0][0], SqlValue::Int(1)),
        other => panic!("unexpected response: {:?}", other),
    }

    client.close_session(&session).await;
}

#[tokio::test]
async fn test_lob_streaming_round_trip() {
    MemDatabase::reset("lob");
    let (_server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let session = client.open_session("mem:lob", false).await;

    assert!(matches!(
        client
            .call(Request::CreateLobBegin { session: session.clone() })
            .await,
        Response::Ok
    ));
    for chunk in [&b"abc"[..], &b"def"[..], &b"ghi"[..]] {
        assert!(matches!(
            client
                .call(Request::LobChunk {
                    session: session.clone(),
                    data: chunk.to_vec()
                })
                .await,
            Response::Ok
        ));
    }
    let lob = match client
        .call(Request::CreateLobEnd { session: session.clone() })
        .await
    {
        Response::LobCreated(reference) => {
            assert_eq!(reference.size, 9);
            reference
        }
        other => panic!("unexpected response: {:?}", other),
    };

    match client
        .call(Request::ReadLob {
            session: session.clone(),
            lob: lob.lob,
            offset: 3,
            length: 3,
        })
        .await
    {
        Response::LobData(data) => assert_eq!(data, b"def"),
        other => panic!("unexpected response: {:?}", other),
    }

    client.close_session(&session).await;
}

#[tokio::test]
async fn test_backend_error_surfaces_as_error_frame() {
    MemDatabase::reset("errors");
    let (_server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let session = client.open_session("mem:errors", false).await;

    match client
        .call(Request::ExecuteQuery {
            session: session.clone(),
            sql: Some("FROB THE WIDGETS".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await
    {
        Response::Error(info) => assert_eq!(info.sql_state, "42000"),
        other => panic!("unexpected response: {:?}", other),
    }

    // The session survives a statement error.
    match client
        .call(Request::ExecuteQuery {
            session: session.clone(),
            sql: Some("SELECT 1".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await
    {
        Response::ResultSet { .. } => {}
        other => panic!("unexpected response: {:?}", other),
    }
    client.close_session(&session).await;
}

#[tokio::test]
async fn test_unknown_session_is_reported() {
    let (_server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let bogus = SessionInfo::new(uuid::Uuid::new_v4(), None);
    match client.call(Request::Commit { session: bogus }).await {
        Response::Error(info) => assert_eq!(info.sql_state, "08003"),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_disconnect_destroys_sessions() {
    MemDatabase::reset("halfclose");
    let (server, addr) = start_server().await;
    let ctx = server.dispatcher().context();

    {
        let mut client = TestClient::connect(addr).await;
        client.open_session("mem:halfclose", false).await;
        assert_eq!(ctx.sessions.session_count(), 1);
        // Client drops without closing.
    }

    for _ in 0..50 {
        if ctx.sessions.session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(ctx.sessions.session_count(), 0);
}

#[tokio::test]
async fn test_xa_two_phase_flow_over_wire() {
    MemDatabase::reset("exa");
    let (server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let session = client.open_session("mem:exa", true).await;

    client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("CREATE TABLE t (v INT)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await;
    client.call(Request::Commit { session: session.clone() }).await;

    let xid = XidKey::from_parts(1, "gtx-wire", "b1");
    assert!(matches!(
        client
            .call(Request::XaStart {
                session: session.clone(),
                xid: xid.clone(),
                flags: flags::TMNOFLAGS
            })
            .await,
        Response::Ok
    ));
    match client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("INSERT INTO t VALUES (42)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await
    {
        Response::UpdateCount(1) => {}
        other => panic!("unexpected response: {:?}", other),
    }
    assert!(matches!(
        client
            .call(Request::XaEnd {
                session: session.clone(),
                xid: xid.clone(),
                flags: flags::TMSUCCESS
            })
            .await,
        Response::Ok
    ));
    match client
        .call(Request::XaPrepare {
            session: session.clone(),
            xid: xid.clone(),
        })
        .await
    {
        Response::XaVote(vote) => assert_eq!(vote, xa_code::XA_OK),
        other => panic!("unexpected response: {:?}", other),
    }
    assert!(matches!(
        client
            .call(Request::XaCommit {
                session: session.clone(),
                xid: xid.clone(),
                one_phase: false
            })
            .await,
        Response::Ok
    ));

    // Branch fully terminated.
    assert_eq!(server.dispatcher().context().registries.total_entries(), 0);

    let result_set = match client
        .call(Request::ExecuteQuery {
            session: session.clone(),
            sql: Some("SELECT COUNT(*) FROM t".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await
    {
        Response::ResultSet { result_set, .. } => result_set,
        other => panic!("unexpected response: {:?}", other),
    };
    match client
        .call(Request::Fetch {
            session: session.clone(),
            result_set,
            max_rows: 1,
        })
        .await
    {
        Response::Page { rows, .. } => assert_eq!(rows[0][0], SqlValue::Int(1)),
        other => panic!("unexpected response: {:?}", other),
    }

    client.close_session(&session).await;
}

#[tokio::test]
async fn test_xa_recover_lists_prepared_branch() {
    MemDatabase::reset("erecover");
    let (_server, addr) = start_server().await;
    let mut client = TestClient::connect(addr).await;
    let session = client.open_session("mem:erecover", true).await;

    client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("CREATE TABLE t (v INT)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await;
    client.call(Request::Commit { session: session.clone() }).await;

    let xid = XidKey::from_parts(7, "gtx-rec", "b1");
    client
        .call(Request::XaStart {
            session: session.clone(),
            xid: xid.clone(),
            flags: flags::TMNOFLAGS,
        })
        .await;
    client
        .call(Request::ExecuteUpdate {
            session: session.clone(),
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            statement: None,
            params: Vec::new(),
        })
        .await;
    client
        .call(Request::XaEnd {
            session: session.clone(),
            xid: xid.clone(),
            flags: flags::TMSUCCESS,
        })
        .await;
    client
        .call(Request::XaPrepare {
            session: session.clone(),
            xid: xid.clone(),
        })
        .await;

    match client
        .call(Request::XaRecover {
            session: session.clone(),
            flags: flags::TMSTARTRSCAN,
        })
        .await
    {
        Response::XaRecovered(xids) => assert_eq!(xids, vec![xid.clone()]),
        other => panic!("unexpected response: {:?}", other),
    }

    client
        .call(Request::XaRollback {
            session: session.clone(),
            xid: xid.clone(),
        })
        .await;
    client.close_session(&session).await;
}

mod common;

use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;
use queued_mysql::QueryResult;
use queued_mysql::error::Error;
use queued_mysql::tokio::{Conn, ConnectionState};

const SLOW: &str = "SELECT SLEEP(0.2)";

/// Answers every query with one row holding its own text.
fn echo(payload: &[u8]) -> Reply {
    match query_text(payload) {
        Some("SELECT * FROM missing") => Reply::Packets(vec![err(
            1146,
            "42S02",
            "Table 'test.missing' doesn't exist",
        )]),
        Some(sql) => {
            let packets = text_result(&["sql"], &[vec![Some(sql)]]);
            if sql == SLOW {
                delayed(Duration::from_millis(200), packets)
            } else {
                Reply::Packets(packets)
            }
        }
        None => Reply::Packets(vec![ok(0, 0, AUTOCOMMIT)]),
    }
}

fn first_value(result: &QueryResult) -> &str {
    result.rows[0].get(0).and_then(|v| v.as_str()).unwrap()
}

async fn connect(server: &MockServer) -> Conn {
    Conn::new(server.opts()).await.unwrap()
}

#[tokio::test]
async fn test_commands_from_clones_run_in_submission_order() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;
    let (a, b, c) = (conn.clone(), conn.clone(), conn.clone());

    let (ra, rb, rc) = tokio::join!(
        a.query("SELECT 'a'", &[]),
        b.query("SELECT 'b'", &[]),
        c.query("SELECT 'c'", &[]),
    );
    assert_eq!(first_value(&ra.unwrap()), "SELECT 'a'");
    assert_eq!(first_value(&rb.unwrap()), "SELECT 'b'");
    assert_eq!(first_value(&rc.unwrap()), "SELECT 'c'");

    assert_eq!(
        server.queries(),
        vec!["SELECT 'a'", "SELECT 'b'", "SELECT 'c'"]
    );
    assert!(!server.log(|log| log.pipelined));
}

#[tokio::test]
async fn test_many_queued_commands_keep_order() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    let streams: Vec<_> = (0..20)
        .map(|i| conn.query_stream(&format!("SELECT {i}"), &[]))
        .collect();
    for (i, stream) in streams.into_iter().enumerate() {
        let (rows, _) = stream.collect_rows().await.unwrap();
        assert_eq!(rows[0].get(0).and_then(|v| v.as_str()), Some(format!("SELECT {i}").as_str()));
    }

    let expected: Vec<String> = (0..20).map(|i| format!("SELECT {i}")).collect();
    assert_eq!(server.queries(), expected);
    assert!(!server.log(|log| log.pipelined));
}

#[tokio::test]
async fn test_server_error_fails_only_its_command() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    let (first, failed, last) = tokio::join!(
        conn.query("SELECT 1", &[]),
        conn.query("SELECT * FROM missing", &[]),
        conn.query("SELECT 3", &[]),
    );
    assert_eq!(first_value(&first.unwrap()), "SELECT 1");
    let err = failed.unwrap_err();
    assert!(!err.is_connection_fatal());
    let payload = err.server_error().unwrap();
    assert_eq!(payload.error_code, 1146);
    assert_eq!(payload.sql_state, "42S02");
    assert_eq!(first_value(&last.unwrap()), "SELECT 3");

    assert_eq!(conn.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_quit_runs_queued_commands_first() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    let (a, b, quit, late) = tokio::join!(
        conn.query("SELECT 'a'", &[]),
        conn.query("SELECT 'b'", &[]),
        conn.quit(),
        conn.query("SELECT 'late'", &[]),
    );
    assert_eq!(first_value(&a.unwrap()), "SELECT 'a'");
    assert_eq!(first_value(&b.unwrap()), "SELECT 'b'");
    quit.unwrap();
    assert!(matches!(late, Err(Error::ConnectionClosing)));

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(server.wait_for(|log| log.quit_received).await);
    assert_eq!(server.queries(), vec!["SELECT 'a'", "SELECT 'b'"]);
    assert!(matches!(
        conn.query("SELECT 1", &[]).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(conn.quit().await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_close_rejects_in_flight_and_queued_commands() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    let (slow, queued, ping, ()) = tokio::join!(
        conn.query(SLOW, &[]),
        conn.query("SELECT 'queued'", &[]),
        conn.ping(),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            conn.close();
        },
    );
    assert!(matches!(slow, Err(Error::ConnectionClosed)));
    assert!(matches!(queued, Err(Error::ConnectionClosed)));
    assert!(matches!(ping, Err(Error::ConnectionClosed)));

    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(server.wait_for(|log| log.disconnected).await);
    assert_eq!(server.queries(), vec![SLOW]);
    assert!(!server.log(|log| log.quit_received));
}

#[tokio::test]
async fn test_dropping_every_handle_sends_quit() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;
    let other = conn.clone();

    conn.ping().await.unwrap();
    drop(conn);
    other.ping().await.unwrap();
    drop(other);

    assert!(server.wait_for(|log| log.quit_received).await);
}

#[tokio::test]
async fn test_dropped_query_future_does_not_stall_queue() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    // dropping the future after submission only discards the reply
    let dropped = conn.query("SELECT 'dropped'", &[]);
    let _ = tokio::time::timeout(Duration::from_millis(1), dropped).await;
    let result = conn.query("SELECT 'kept'", &[]).await.unwrap();
    assert_eq!(first_value(&result), "SELECT 'kept'");
}

#[tokio::test]
async fn test_commands_are_queued_when_called() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    let first = conn.query("SELECT 'first'", &[]);
    let quit = conn.quit();
    let second = conn.query("SELECT 'second'", &[]);

    // awaited in reverse call order
    assert!(matches!(second.await, Err(Error::ConnectionClosing)));
    quit.await.unwrap();
    assert_eq!(first_value(&first.await.unwrap()), "SELECT 'first'");

    assert_eq!(server.queries(), vec!["SELECT 'first'"]);
    assert!(server.wait_for(|log| log.quit_received).await);
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_spawned_commands_keep_call_order() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;

    let calls: Vec<_> = (0..5)
        .map(|i| conn.query(&format!("SELECT {i}"), &[]))
        .collect();
    let handles: Vec<_> = calls.into_iter().rev().map(tokio::spawn).collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let expected: Vec<String> = (0..5).map(|i| format!("SELECT {i}")).collect();
    assert_eq!(server.queries(), expected);
}

#[tokio::test]
async fn test_submission_marks_connection_busy() {
    let server = MockServer::start(echo).await;
    let conn = connect(&server).await;
    assert_eq!(conn.state(), ConnectionState::Idle);

    let ping = conn.ping();
    assert_eq!(conn.state(), ConnectionState::Busy);
    ping.await.unwrap();

    let mut state = conn.state();
    for _ in 0..100 {
        if state == ConnectionState::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        state = conn.state();
    }
    assert_eq!(state, ConnectionState::Idle);
}

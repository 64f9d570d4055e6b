use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc, Weekday};
use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roomdesk::engine::{Engine, RateSchedule};
use roomdesk::store::JournaledStore;
use roomdesk::{seed, wire};

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomdesk_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(JournaledStore::open(&dir.join("bookings.wal")).unwrap());
    seed::seed_rooms(store.as_ref(), seed::default_rooms()).await.unwrap();
    let engine = Arc::new(Engine::new(store, RateSchedule::utc()));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("roomdesk")
        .user("roomdesk");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// The first `weekday` at least two days out, so bookings on it are in the
/// future and still cancellable.
fn upcoming(weekday: Weekday) -> NaiveDate {
    let mut day = Utc::now().date_naive() + Days::new(2);
    while day.weekday() != weekday {
        day = day + Days::new(1);
    }
    day
}

fn at(day: NaiveDate, hh_mm: &str) -> String {
    format!("{day}T{hh_mm}:00Z")
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn insert_sql(room: &str, user: &str, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO bookings (room_id, user_name, start_time, end_time) \
         VALUES ('{room}', '{user}', '{start}', '{end}')"
    )
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|c| c.code())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn rooms_are_seeded() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let rooms = rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(rooms.len(), 5);
    assert_eq!(rooms[0].get("id"), Some("101"));
    assert_eq!(rooms[0].get("name"), Some("Cabin 1"));
    assert_eq!(rooms[0].get("base_hourly_rate"), Some("500"));
    assert_eq!(rooms[4].get("capacity"), Some("2"));
}

#[tokio::test]
async fn create_list_cancel() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let saturday = upcoming(Weekday::Sat);

    let created = rows(
        &client,
        &insert_sql("101", "alice", &at(saturday, "10:00"), &at(saturday, "12:00")),
    )
    .await;
    assert_eq!(created.len(), 1);
    let row = &created[0];
    assert_eq!(row.get("room_id"), Some("101"));
    assert_eq!(row.get("user_name"), Some("alice"));
    assert_eq!(row.get("total_price"), Some("1000.00"));
    assert_eq!(row.get("status"), Some("CONFIRMED"));
    assert_eq!(row.get("start_time"), Some(at(saturday, "10:00").as_str()));
    assert_eq!(row.get("cancelled_at"), None);
    let id = row.get("id").unwrap().to_string();
    assert!(Ulid::from_string(&id).is_ok());

    let all = rows(&client, "SELECT * FROM bookings").await;
    assert_eq!(all.len(), 1);

    client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{id}'"))
        .await
        .unwrap();

    let after = rows(&client, &format!("SELECT * FROM bookings WHERE id = '{id}'")).await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].get("status"), Some("CANCELLED"));
    assert!(after[0].get("cancelled_at").is_some());

    // Second cancel is a conflict.
    let err = client
        .batch_execute(&format!("UPDATE bookings SET status = 'CANCELLED' WHERE id = '{id}'"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));
}

#[tokio::test]
async fn overlap_is_conflict() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let saturday = upcoming(Weekday::Sat);

    client
        .batch_execute(&insert_sql("102", "alice", &at(saturday, "10:00"), &at(saturday, "11:30")))
        .await
        .unwrap();

    // Touching is fine.
    client
        .batch_execute(&insert_sql("102", "bob", &at(saturday, "11:30"), &at(saturday, "12:00")))
        .await
        .unwrap();

    let err = client
        .batch_execute(&insert_sql("102", "carol", &at(saturday, "11:00"), &at(saturday, "12:00")))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("23P01"));
    let message = err.as_db_error().unwrap().message().to_string();
    assert!(message.contains("already booked from 10:00 to 11:30"), "{message}");
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let saturday = upcoming(Weekday::Sat);

    let past = Utc::now().date_naive() - Days::new(3);
    let err = client
        .batch_execute(&insert_sql("101", "alice", &at(past, "10:00"), &at(past, "11:00")))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    let err = client
        .batch_execute(&insert_sql("101", "alice", &at(saturday, "08:00"), &at(saturday, "21:00")))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22023"));

    let err = client
        .batch_execute(&insert_sql("999", "alice", &at(saturday, "10:00"), &at(saturday, "11:00")))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));

    let err = client
        .batch_execute(&insert_sql("101", "alice", "soon", "later"))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("22007"));

    let err = client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), Some("P0002"));

    let err = client.batch_execute("SELECT * FROM holds").await.unwrap_err();
    assert_eq!(sqlstate(&err), Some("42601"));
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let monday = upcoming(Weekday::Mon);
    let start = at(monday, "09:30");
    let end = at(monday, "10:30");

    let created = client
        .query(
            "INSERT INTO bookings (room_id, user_name, start_time, end_time) VALUES ($1, $2, $3, $4)",
            &[&"101", &"alice", &start, &end],
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
    let price: String = created[0].get("total_price");
    assert_eq!(price, "625.00");
    let id: String = created[0].get("id");

    let fetched = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    let status: String = fetched[0].get("status");
    assert_eq!(status, "CONFIRMED");

    let cancelled = client
        .execute("DELETE FROM bookings WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(cancelled, 1);
}

#[tokio::test]
async fn room_usage_report() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let saturday = upcoming(Weekday::Sat);

    client
        .batch_execute(&insert_sql("103", "alice", &at(saturday, "09:00"), &at(saturday, "11:30")))
        .await
        .unwrap();
    client
        .batch_execute(&insert_sql("103", "bob", &at(saturday, "14:00"), &at(saturday, "15:00")))
        .await
        .unwrap();

    let usage = rows(
        &client,
        &format!("SELECT * FROM room_usage WHERE day >= '{saturday}' AND day <= '{saturday}'"),
    )
    .await;
    assert_eq!(usage.len(), 5);
    let conf_a = usage.iter().find(|r| r.get("room_id") == Some("103")).unwrap();
    assert_eq!(conf_a.get("room_name"), Some("Conference Room A"));
    assert_eq!(conf_a.get("total_hours"), Some("3.50"));
    assert_eq!(conf_a.get("total_revenue"), Some("2800.00"));
    let pod = usage.iter().find(|r| r.get("room_id") == Some("105")).unwrap();
    assert_eq!(pod.get("total_revenue"), Some("0.00"));
}

#[tokio::test]
async fn concurrent_clients_one_winner() {
    let addr = start_test_server().await;
    let saturday = upcoming(Weekday::Sat);
    let sql = insert_sql("104", "racer", &at(saturday, "16:00"), &at(saturday, "17:00"));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sql = sql.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client.batch_execute(&sql).await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert_eq!(sqlstate(&e), Some("23P01")),
        }
    }
    assert_eq!(ok, 1);

    let client = connect(addr).await;
    let bookings = rows(&client, "SELECT * FROM bookings").await;
    assert_eq!(bookings.len(), 1);
}

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use fleetbook::booking::BookingService;
use fleetbook::contract::PlainTextContract;
use fleetbook::engine::Engine;
use fleetbook::notify::LogNotifier;
use fleetbook::payment::DisabledGateway;
use fleetbook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("fleetbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("fleetbook.wal")).unwrap());
    let service = Arc::new(BookingService::new(
        engine,
        Arc::new(DisabledGateway),
        Arc::new(PlainTextContract),
        Arc::new(LogNotifier),
    ));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let service = service.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, service, "fleetbook".to_string(), None, false)
                    .await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("fleetbook")
        .user("fleetbook")
        .password("fleetbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
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

async fn create_type(client: &Client, plates: &[&str]) -> Ulid {
    let id = Ulid::new();
    let units: Vec<String> = plates.iter().map(|p| format!("\"{p}\"")).collect();
    client
        .batch_execute(&format!(
            "INSERT INTO vehicle_types (id, title, seats, car_type, category, price, units) \
             VALUES ('{id}', 'Renault Clio 5', 5, 'Citadine', 'courteduree', 80, '[{}]')",
            units.join(",")
        ))
        .await
        .unwrap();
    id
}

async fn create_reservation(client: &Client, type_id: Ulid, start: &str, end: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, vehicle_type_id, first_name, last_name, email, category, start, "end", total_price, payment_type)
               VALUES ('{id}', '{type_id}', 'Amal', 'Ben Salah', 'amal@example.com', 'courteduree', '{start}', '{end}', 240, 'onsite')"#
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_list_vehicle_types() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let id = create_type(&client, &["123TUN456"]).await;
    let listed = rows(&client, "SELECT * FROM vehicle_types").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(id.to_string().as_str()));
    assert_eq!(listed[0].get("title"), Some("Renault Clio 5"));
    assert_eq!(listed[0].get("seats"), Some("5"));

    let priced = rows(&client, "SELECT * FROM vehicle_types WHERE category = 'courteduree'").await;
    assert_eq!(priced.len(), 1);
    assert_eq!(priced[0].get("price"), Some("80000"));
}

#[tokio::test]
async fn assignment_removes_unit_from_availability() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["123TUN456", "124TUN789"]).await;
    let rid = create_reservation(&client, type_id, "2024-07-01", "2024-07-04").await;

    let assigned = rows(
        &client,
        &format!("INSERT INTO assignments (reservation_id, plate) VALUES ('{rid}', '123TUN456')"),
    )
    .await;
    assert_eq!(assigned[0].get("plate"), Some("123TUN456"));

    let free = rows(
        &client,
        &format!(
            r#"SELECT * FROM available_units WHERE vehicle_type_id = '{type_id}' AND start >= '2024-07-02' AND "end" <= '2024-07-03'"#
        ),
    )
    .await;
    let plates: Vec<&str> = free.iter().filter_map(|r| r.get("plate")).collect();
    assert_eq!(plates, vec!["124TUN789"]);

    let types = rows(
        &client,
        r#"SELECT * FROM available_vehicle_types WHERE category = 'courteduree' AND start >= '2024-07-02' AND "end" <= '2024-07-03'"#,
    )
    .await;
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].get("available_units"), Some("1"));
}

#[tokio::test]
async fn double_assignment_is_rejected_with_sqlstate() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["555TUN1"]).await;
    let first = create_reservation(&client, type_id, "2024-07-01", "2024-07-04").await;
    let second = create_reservation(&client, type_id, "2024-07-03", "2024-07-06").await;

    client
        .batch_execute(&format!("INSERT INTO assignments (reservation_id) VALUES ('{first}')"))
        .await
        .unwrap();
    let err = client
        .batch_execute(&format!("INSERT INTO assignments (reservation_id) VALUES ('{second}')"))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "55000");

    let err = client
        .batch_execute(&format!("INSERT INTO assignments (reservation_id) VALUES ('{first}')"))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "23505");
}

#[tokio::test]
async fn unavailability_and_calendar() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["777TUN7"]).await;
    let record = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO unavailability (id, vehicle_type_id, plate, start, "end") VALUES ('{record}', '{type_id}', '777TUN7', '2024-06-20', '2024-06-21')"#
        ))
        .await
        .unwrap();

    let records = rows(
        &client,
        &format!("SELECT * FROM unavailability WHERE vehicle_type_id = '{type_id}'"),
    )
    .await;
    assert_eq!(records.len(), 1);

    let calendar = rows(&client, "SELECT * FROM calendar WHERE year = 2024 AND month = 6").await;
    assert_eq!(calendar.len(), 30);
    let status = |date: &str| {
        calendar
            .iter()
            .find(|r| r.get("date") == Some(date))
            .and_then(|r| r.get("status"))
            .map(str::to_string)
    };
    assert_eq!(status("2024-06-19").as_deref(), Some("available"));
    assert_eq!(status("2024-06-20").as_deref(), Some("unavailable"));
    assert_eq!(status("2024-06-21").as_deref(), Some("unavailable"));

    client
        .batch_execute(&format!("DELETE FROM unavailability WHERE id = '{record}'"))
        .await
        .unwrap();
    let calendar = rows(&client, "SELECT * FROM calendar WHERE year = 2024 AND month = 6").await;
    assert!(calendar.iter().all(|r| r.get("status") == Some("available")));
}

#[tokio::test]
async fn calendar_periods_per_unit() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["555TUN5"]).await;
    let rid = create_reservation(&client, type_id, "2024-06-10", "2024-06-12").await;
    client
        .batch_execute(&format!(
            "INSERT INTO assignments (reservation_id, plate) VALUES ('{rid}', '555TUN5')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            r#"INSERT INTO unavailability (id, vehicle_type_id, plate, start, "end") VALUES ('{}', '{type_id}', '555TUN5', '2024-06-20', '2024-06-21')"#,
            Ulid::new()
        ))
        .await
        .unwrap();

    let periods = rows(&client, "SELECT * FROM calendar_periods WHERE year = 2024 AND month = 6").await;
    let mine: Vec<_> = periods
        .iter()
        .filter(|r| r.get("vehicle_type_id") == Some(type_id.to_string().as_str()))
        .collect();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].get("kind"), Some("reservation"));
    assert_eq!(mine[0].get("reservation_id"), Some(rid.to_string().as_str()));
    assert_eq!(mine[1].get("kind"), Some("unavailable"));
    assert_eq!(mine[1].get("reservation_id"), None);
    assert!(mine.iter().all(|r| r.get("plate") == Some("555TUN5")));
}

#[tokio::test]
async fn ratings_update_the_average() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["444TUN4"]).await;
    let insert = |name: &str, score: i64| {
        format!(
            "INSERT INTO ratings (vehicle_type_id, full_name, rating, comment) \
             VALUES ('{type_id}', '{name}', {score}, 'Bon service')"
        )
    };

    rows(&client, &insert("Sami Trabelsi", 2)).await;
    let summary = rows(&client, &insert("Leila Gharbi", 5)).await;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].get("ratings"), Some("2"));
    let average: f64 = summary[0].get("average_rating").unwrap().parse().unwrap();
    assert_eq!(average, 3.5);

    for score in [0, 6] {
        let err = client.simple_query(&insert("Nour Jaziri", score)).await.unwrap_err();
        assert_eq!(err.as_db_error().unwrap().code().code(), "22023");
    }

    let listed = rows(
        &client,
        &format!("SELECT * FROM ratings WHERE vehicle_type_id = '{type_id}'"),
    )
    .await;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].get("full_name"), Some("Sami Trabelsi"));
    assert_eq!(listed[1].get("rating"), Some("5"));

    let types = rows(&client, "SELECT * FROM vehicle_types").await;
    let row = types
        .iter()
        .find(|r| r.get("id") == Some(type_id.to_string().as_str()))
        .unwrap();
    assert_eq!(row.get("ratings"), Some("2"));
}

#[tokio::test]
async fn reservations_and_unavailable_dates() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["888TUN8"]).await;
    create_reservation(&client, type_id, "2024-07-01", "2024-07-02").await;
    create_reservation(&client, type_id, "2024-07-02", "2024-07-03").await;

    let listed = rows(&client, "SELECT * FROM reservations WHERE category = 'courteduree'").await;
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|r| r.get("payment_status") == Some("pending")));
    assert!(listed.iter().all(|r| r.get("plate").is_none()));

    let dates = rows(
        &client,
        &format!("SELECT * FROM unavailable_dates WHERE vehicle_type_id = '{type_id}'"),
    )
    .await;
    let dates: Vec<&str> = dates.iter().filter_map(|r| r.get("date")).collect();
    assert_eq!(dates, vec!["2024-07-01", "2024-07-02", "2024-07-03"]);
}

#[tokio::test]
async fn online_reservation_without_gateway_is_upstream_error() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["999TUN9"]).await;
    let id = Ulid::new();
    let err = client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, vehicle_type_id, first_name, last_name, email, category, start, "end", total_price, payment_type, payment_percentage)
               VALUES ('{id}', '{type_id}', 'Amal', 'Ben Salah', 'amal@example.com', 'courteduree', '2024-07-01', '2024-07-04', 240, 'online', 30)"#
        ))
        .await
        .unwrap_err();
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code().code(), "58000");
    assert_eq!(db.message(), "payment gateway failure");

    // The reservation itself was committed.
    let listed = rows(&client, "SELECT * FROM reservations").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("id"), Some(id.to_string().as_str()));
}

#[tokio::test]
async fn bad_statements_report_errors() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let err = client
        .batch_execute("SELECT * FROM no_such_table")
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");

    let err = client
        .batch_execute(&format!(
            "INSERT INTO units (vehicle_type_id, plate) VALUES ('{}', 'X1')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "P0002");
}

#[tokio::test]
async fn unit_commands_round_trip() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let type_id = create_type(&client, &["100TUN1"]).await;
    client
        .batch_execute(&format!(
            "INSERT INTO units (vehicle_type_id, plate) VALUES ('{type_id}', '100TUN2')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO unit_status (vehicle_type_id, plate, available) VALUES ('{type_id}', '100TUN1', false)"
        ))
        .await
        .unwrap();

    let free = rows(
        &client,
        &format!(
            r#"SELECT * FROM available_units WHERE vehicle_type_id = '{type_id}' AND start >= '2024-07-01' AND "end" <= '2024-07-02'"#
        ),
    )
    .await;
    let plates: Vec<&str> = free.iter().filter_map(|r| r.get("plate")).collect();
    assert_eq!(plates, vec!["100TUN2"]);

    client
        .batch_execute(&format!(
            "DELETE FROM units WHERE vehicle_type_id = '{type_id}' AND plate = '100TUN2'"
        ))
        .await
        .unwrap();
    let listed = rows(&client, "SELECT * FROM vehicle_types").await;
    let units = listed[0].get("units").unwrap();
    assert!(!units.contains("100TUN2"));
}

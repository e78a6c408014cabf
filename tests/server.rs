use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use innkeep::engine::Engine;
use innkeep::notify::NotifyHub;
use innkeep::protocol;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("innkeep.wal"), Arc::new(NotifyHub::new())).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = protocol::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

type Client = Framed<TcpStream, LinesCodec>;

async fn connect(addr: SocketAddr) -> Client {
    Framed::new(TcpStream::connect(addr).await.unwrap(), LinesCodec::new())
}

async fn call(client: &mut Client, request: Value) -> Value {
    client.send(request.to_string()).await.unwrap();
    let line = client.next().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

async fn ok(client: &mut Client, request: Value) -> Value {
    let reply = call(client, request.clone()).await;
    assert_eq!(reply["ok"], true, "{request} -> {reply}");
    reply["data"].clone()
}

async fn error_kind(client: &mut Client, request: Value) -> String {
    let reply = call(client, request).await;
    assert_eq!(reply["ok"], false, "{reply}");
    reply["error"]["kind"].as_str().unwrap().to_string()
}

async fn setup_room_and_guest(client: &mut Client) -> (String, String) {
    let room = ok(
        client,
        json!({ "op": "add_room", "number": "101", "room_type": "Double", "base_price": "100" }),
    )
    .await;
    let guest = ok(
        client,
        json!({
            "op": "register_guest",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "identification": { "kind": "passport", "number": "P100" }
        }),
    )
    .await;
    (
        room["id"].as_str().unwrap().to_string(),
        guest["id"].as_str().unwrap().to_string(),
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let mut client = connect(addr).await;
    let (room_id, guest_id) = setup_room_and_guest(&mut client).await;

    let reservation = ok(
        &mut client,
        json!({
            "op": "create_reservation",
            "room_id": room_id,
            "guest_id": guest_id,
            "check_in": "2024-01-10",
            "check_out": "2024-01-13",
            "guest_count": 2
        }),
    )
    .await;
    let id = reservation["id"].as_str().unwrap().to_string();
    assert_eq!(reservation["status"], "Confirmed");
    assert_eq!(reservation["total_price"], "300");

    let status = ok(
        &mut client,
        json!({ "op": "room_status", "room_id": room_id, "date": "2024-01-10" }),
    )
    .await;
    assert_eq!(status, "Reserved");

    ok(&mut client, json!({ "op": "check_in", "id": id, "date": "2024-01-10" })).await;
    ok(&mut client, json!({ "op": "check_out", "id": id, "date": "2024-01-13" })).await;
    let paid = ok(
        &mut client,
        json!({ "op": "mark_paid", "id": id, "amount": "300.00", "actor": "cashier" }),
    )
    .await;
    assert_eq!(paid["paid"], true);

    let revenue = ok(
        &mut client,
        json!({ "op": "revenue", "start": "2024-01-01", "end": "2024-01-31" }),
    )
    .await;
    assert_eq!(revenue, "300");

    let summary = ok(&mut client, json!({ "op": "status_summary", "date": "2024-01-13" })).await;
    assert_eq!(summary, json!({ "CleaningInProgress": 1 }));

    let number = reservation["number"].as_str().unwrap();
    let by_number = ok(
        &mut client,
        json!({ "op": "reservation_by_number", "number": number }),
    )
    .await;
    assert_eq!(by_number["id"], id.as_str());
    assert_eq!(by_number["status"], "CheckedOut");
}

#[tokio::test]
async fn errors_carry_a_kind() {
    let (addr, _engine) = start_test_server().await;
    let mut client = connect(addr).await;
    let (room_id, guest_id) = setup_room_and_guest(&mut client).await;

    let book = |check_in: &str, check_out: &str| {
        json!({
            "op": "create_reservation",
            "room_id": room_id,
            "guest_id": guest_id,
            "check_in": check_in,
            "check_out": check_out,
            "guest_count": 1
        })
    };
    let reservation = ok(&mut client, book("2024-01-10", "2024-01-13")).await;
    let id = reservation["id"].as_str().unwrap();

    assert_eq!(error_kind(&mut client, book("2024-01-12", "2024-01-14")).await, "room_unavailable");
    assert_eq!(error_kind(&mut client, book("2024-02-10", "2024-02-10")).await, "validation");
    assert_eq!(
        error_kind(
            &mut client,
            json!({ "op": "check_out", "id": id, "date": "2024-01-13" })
        )
        .await,
        "invalid_transition"
    );
    assert_eq!(
        error_kind(&mut client, json!({ "op": "get_reservation", "id": Ulid::new().to_string() })).await,
        "not_found"
    );
    assert_eq!(
        error_kind(
            &mut client,
            json!({ "op": "add_room", "number": "101", "room_type": "Single" })
        )
        .await,
        "duplicate_identity"
    );
    assert_eq!(error_kind(&mut client, json!({ "op": "fly_to_moon" })).await, "bad_request");

    // The connection survives all of the above.
    let rooms = ok(&mut client, json!({ "op": "list_rooms" })).await;
    assert_eq!(rooms.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn maintenance_and_availability_queries() {
    let (addr, _engine) = start_test_server().await;
    let mut client = connect(addr).await;
    let (room_id, _guest_id) = setup_room_and_guest(&mut client).await;

    ok(
        &mut client,
        json!({
            "op": "record_status",
            "room_id": room_id,
            "status": "UnderMaintenance",
            "date": "2024-03-05",
            "note": "leaking radiator"
        }),
    )
    .await;

    let blocked = ok(
        &mut client,
        json!({ "op": "is_room_available", "room_id": room_id, "from": "2024-03-01", "to": "2024-03-10" }),
    )
    .await;
    assert_eq!(blocked, false);

    let free = ok(
        &mut client,
        json!({ "op": "available_rooms", "from": "2024-03-06", "to": "2024-03-10" }),
    )
    .await;
    assert_eq!(free.as_array().unwrap().len(), 1);

    let history = ok(&mut client, json!({ "op": "status_history", "room_id": room_id })).await;
    assert_eq!(history[0]["note"], "leaking radiator");
}

#[tokio::test]
async fn clients_share_one_engine() {
    let (addr, engine) = start_test_server().await;
    let mut front_desk = connect(addr).await;
    let mut housekeeping = connect(addr).await;
    let (room_id, guest_id) = setup_room_and_guest(&mut front_desk).await;

    let request = json!({
        "op": "create_reservation",
        "room_id": room_id,
        "guest_id": guest_id,
        "check_in": "2024-05-01",
        "check_out": "2024-05-03",
        "guest_count": 1
    });
    ok(&mut front_desk, request.clone()).await;
    assert_eq!(error_kind(&mut housekeeping, request).await, "room_unavailable");

    let compacted = ok(&mut housekeeping, json!({ "op": "compact" })).await;
    assert_eq!(compacted["events"], 4);
    assert_eq!(engine.list_reservations().await.len(), 1);
}

#[tokio::test]
async fn rooms_are_deleted_once_free() {
    let (addr, _engine) = start_test_server().await;
    let mut client = connect(addr).await;
    let (room_id, guest_id) = setup_room_and_guest(&mut client).await;

    let reservation = ok(
        &mut client,
        json!({
            "op": "create_reservation",
            "room_id": room_id,
            "guest_id": guest_id,
            "check_in": "2024-06-01",
            "check_out": "2024-06-03",
            "guest_count": 1
        }),
    )
    .await;
    let delete = json!({ "op": "delete_room", "id": room_id });
    assert_eq!(error_kind(&mut client, delete.clone()).await, "validation");

    ok(&mut client, json!({ "op": "cancel_reservation", "id": reservation["id"] })).await;
    let deleted = ok(&mut client, delete.clone()).await;
    assert_eq!(deleted["deleted"], room_id.as_str());
    assert_eq!(error_kind(&mut client, delete).await, "not_found");

    let rooms = ok(&mut client, json!({ "op": "list_rooms" })).await;
    assert!(rooms.as_array().unwrap().is_empty());
}

//! JSON-lines front end: one request object per line in, one response object
//! per line out, answered in order.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    AddRoom(NewRoom),
    DeleteRoom {
        id: Ulid,
    },
    RegisterGuest(NewGuest),
    CreateReservation(NewReservation),
    ModifyReservation {
        id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        #[serde(default)]
        guest_count: Option<u32>,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        actor: Option<String>,
    },
    CancelReservation {
        id: Ulid,
        #[serde(default)]
        actor: Option<String>,
    },
    CheckIn {
        id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        actor: Option<String>,
    },
    CheckOut {
        id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        actor: Option<String>,
    },
    ExtendStay {
        id: Ulid,
        check_out: NaiveDate,
        #[serde(default)]
        actor: Option<String>,
    },
    /// `amount` is a decimal string, e.g. `"300.00"`.
    MarkPaid {
        id: Ulid,
        amount: Money,
        #[serde(default)]
        actor: Option<String>,
    },
    RecordStatus {
        room_id: Ulid,
        status: RoomStatus,
        date: NaiveDate,
        #[serde(default)]
        note: Option<String>,
        #[serde(default)]
        actor: Option<String>,
    },
    RoomStatus {
        room_id: Ulid,
        date: NaiveDate,
    },
    StatusHistory {
        room_id: Ulid,
    },
    IsRoomAvailable {
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
    AvailableRooms {
        from: NaiveDate,
        to: NaiveDate,
    },
    StatusSummary {
        date: NaiveDate,
    },
    Revenue {
        start: NaiveDate,
        end: NaiveDate,
    },
    GetReservation {
        id: Ulid,
    },
    ReservationByNumber {
        number: String,
    },
    ListRooms,
    Compact,
}

impl Request {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Request::AddRoom(_) => "add_room",
            Request::DeleteRoom { .. } => "delete_room",
            Request::RegisterGuest(_) => "register_guest",
            Request::CreateReservation(_) => "create_reservation",
            Request::ModifyReservation { .. } => "modify_reservation",
            Request::CancelReservation { .. } => "cancel_reservation",
            Request::CheckIn { .. } => "check_in",
            Request::CheckOut { .. } => "check_out",
            Request::ExtendStay { .. } => "extend_stay",
            Request::MarkPaid { .. } => "mark_paid",
            Request::RecordStatus { .. } => "record_status",
            Request::RoomStatus { .. } => "room_status",
            Request::StatusHistory { .. } => "status_history",
            Request::IsRoomAvailable { .. } => "is_room_available",
            Request::AvailableRooms { .. } => "available_rooms",
            Request::StatusSummary { .. } => "status_summary",
            Request::Revenue { .. } => "revenue",
            Request::GetReservation { .. } => "get_reservation",
            Request::ReservationByNumber { .. } => "reservation_by_number",
            Request::ListRooms => "list_rooms",
            Request::Compact => "compact",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(kind: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::failure(e.kind(), e.to_string())
    }
}

fn to_data<T: Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::WalError(format!("encode response: {e}")))
}

async fn execute(engine: &Engine, req: Request) -> Result<Value, EngineError> {
    match req {
        Request::AddRoom(new) => to_data(engine.add_room(new).await?),
        Request::DeleteRoom { id } => {
            engine.delete_room(id).await?;
            to_data(json!({ "deleted": id.to_string() }))
        }
        Request::RegisterGuest(new) => to_data(engine.register_guest(new).await?),
        Request::CreateReservation(new) => to_data(engine.create_reservation(new).await?),
        Request::ModifyReservation {
            id,
            room_id,
            check_in,
            check_out,
            guest_count,
            notes,
            actor,
        } => {
            let change = ReservationChange {
                room_id,
                check_in,
                check_out,
                guest_count,
                notes,
            };
            to_data(engine.modify_reservation(id, change, actor).await?)
        }
        Request::CancelReservation { id, actor } => {
            to_data(engine.cancel_reservation(id, actor).await?)
        }
        Request::CheckIn { id, date, actor } => to_data(engine.check_in(id, date, actor).await?),
        Request::CheckOut { id, date, actor } => to_data(engine.check_out(id, date, actor).await?),
        Request::ExtendStay { id, check_out, actor } => {
            to_data(engine.extend_stay(id, check_out, actor).await?)
        }
        Request::MarkPaid { id, amount, actor } => {
            to_data(engine.mark_paid(id, amount, actor).await?)
        }
        Request::RecordStatus {
            room_id,
            status,
            date,
            note,
            actor,
        } => to_data(engine.record_status(room_id, status, date, note, actor).await?),
        Request::RoomStatus { room_id, date } => {
            to_data(engine.status_as_of(room_id, date).await?)
        }
        Request::StatusHistory { room_id } => to_data(engine.status_history(room_id).await?),
        Request::IsRoomAvailable { room_id, from, to } => {
            to_data(engine.is_room_available(room_id, from, to).await?)
        }
        Request::AvailableRooms { from, to } => to_data(engine.available_rooms(from, to).await?),
        Request::StatusSummary { date } => to_data(engine.room_status_summary(date).await),
        Request::Revenue { start, end } => to_data(engine.revenue_for_period(start, end).await?),
        Request::GetReservation { id } => {
            let reservation = engine.get_reservation(id).await;
            reservation.ok_or(EngineError::NotFound(id)).and_then(to_data)
        }
        Request::ReservationByNumber { number } => {
            // Unknown numbers answer `null` rather than an error.
            to_data(engine.reservation_by_number(&number).await)
        }
        Request::ListRooms => to_data(engine.list_rooms().await),
        Request::Compact => to_data(json!({ "events": engine.compact_wal().await? })),
    }
}

/// Execute one request and record its outcome.
pub async fn dispatch(engine: &Engine, req: Request) -> Response {
    let op = req.label();
    let started = Instant::now();
    let result = execute(engine, req).await;
    metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => "ok")
                .increment(1);
            Response::success(data)
        }
        Err(e) => {
            metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => e.kind())
                .increment(1);
            debug!("{op} failed: {e}");
            e.into()
        }
    }
}

/// Decode and answer one line. Malformed input gets a `bad_request` response.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => dispatch(engine, req).await,
        Err(e) => Response::failure("bad_request", e.to_string()),
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_LEN} bytes, closing");
                let reply = Response::failure("limit_exceeded", "request line too long");
                framed.send(encode(&reply)).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(&engine, &line).await;
        framed.send(encode(&reply)).await?;
    }
    Ok(())
}

fn encode(reply: &Response) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        format!(r#"{{"ok":false,"error":{{"kind":"internal","message":"{e}"}}}}"#)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_requests() {
        let req: Request = serde_json::from_str(
            r#"{"op":"check_in","id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","date":"2024-01-10"}"#,
        )
        .unwrap();
        assert!(matches!(req, Request::CheckIn { actor: None, .. }));
        assert_eq!(req.label(), "check_in");

        let req: Request = serde_json::from_str(r#"{"op":"list_rooms"}"#).unwrap();
        assert!(matches!(req, Request::ListRooms));

        let req: Request = serde_json::from_str(
            r#"{"op":"add_room","number":"101","room_type":"Suite"}"#,
        )
        .unwrap();
        match req {
            Request::AddRoom(new) => {
                assert_eq!(new.number, "101");
                assert_eq!(new.room_type, RoomType::Suite);
                assert!(new.base_price.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn money_is_a_decimal_string() {
        let req: Request = serde_json::from_str(
            r#"{"op":"mark_paid","id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","amount":"300.00"}"#,
        )
        .unwrap();
        match req {
            Request::MarkPaid { amount, .. } => assert_eq!(amount, Money::new(30000, 2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"op":"drop_tables"}"#).is_err());
    }

    #[test]
    fn error_response_shape() {
        let reply: Response = EngineError::Validation("check-out must be after check-in").into();
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["kind"], "validation");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn success_response_shape() {
        let value = serde_json::to_value(Response::success(json!(true))).unwrap();
        assert_eq!(value, json!({ "ok": true, "data": true }));
    }
}

//! Push frame decoding.
//!
//! Frames carry a `type` (or `kind`) discriminator. The entity is read from a
//! nested `order` / `call` object when present, otherwise from the frame
//! itself, which is how the backend emits them today:
//!
//! ```json
//! {"type":"NEW_ORDER","order_id":12,"daily_number":4,"table_name":"T3","items":[...]}
//! {"type":"STAFF_CALL","id":5,"table_name":"T3","message":"water"}
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::FrameError;
use crate::models::{Order, PushEvent, ServiceCall};

pub const NEW_ORDER: &str = "NEW_ORDER";
pub const STAFF_CALL: &str = "STAFF_CALL";

fn payload<T: DeserializeOwned>(
    mut frame: Value,
    nested_key: &str,
    kind: &'static str,
) -> Result<T, FrameError> {
    let body = match frame.get_mut(nested_key).map(Value::take) {
        Some(nested @ Value::Object(_)) => nested,
        _ => frame,
    };
    serde_json::from_value(body).map_err(|e| FrameError::Payload {
        kind,
        message: e.to_string(),
    })
}

pub fn decode(text: &str) -> Result<PushEvent, FrameError> {
    let frame: Value = serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;
    let kind = ["type", "kind"]
        .iter()
        .find_map(|key| frame.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
        .ok_or(FrameError::MissingType)?;

    match kind.as_str() {
        NEW_ORDER => payload::<Order>(frame, "order", "order").map(PushEvent::NewOrder),
        STAFF_CALL => payload::<ServiceCall>(frame, "call", "call").map(PushEvent::StaffCall),
        _ => Err(FrameError::UnknownType(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_flat_new_order() {
        let event = decode(
            r#"{"type":"NEW_ORDER","order_id":12,"daily_number":4,"table_name":"T3",
                "created_at":"12:01","items":[{"menu_name":"Bibimbap","quantity":2,"options":"Spice - mild"}]}"#,
        )
        .expect("decode");

        let PushEvent::NewOrder(order) = event else {
            panic!("expected order");
        };
        assert_eq!(order.id, 12);
        assert_eq!(order.daily_number, Some(4));
        assert_eq!(order.table_label(), "T3");
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[0].options.as_deref(), Some("Spice - mild"));
    }

    #[test]
    fn test_decode_nested_staff_call() {
        let event = decode(
            r#"{"kind":"STAFF_CALL","call":{"id":5,"table_name":"T1","message":"water","created_at":"09:10"}}"#,
        )
        .expect("decode");
        assert_eq!(event.id(), 5);
        assert!(matches!(event, PushEvent::StaffCall(ref c) if c.message == "water"));
    }

    #[test]
    fn test_decode_nested_order_uses_id() {
        let event = decode(r#"{"kind":"NEW_ORDER","order":{"id":1,"items":[]}}"#).expect("decode");
        assert_eq!(event.id(), 1);
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        assert!(matches!(decode("not json"), Err(FrameError::Json(_))));
        assert!(matches!(
            decode(r#"{"order_id":1}"#),
            Err(FrameError::MissingType)
        ));
        assert!(matches!(
            decode(r#"{"type":"MENU_UPDATED"}"#),
            Err(FrameError::UnknownType(t)) if t == "MENU_UPDATED"
        ));
        assert!(matches!(
            decode(r#"{"type":"NEW_ORDER","daily_number":3}"#),
            Err(FrameError::Payload { kind: "order", .. })
        ));
        assert!(matches!(
            decode(r#"{"type":"STAFF_CALL","id":"abc"}"#),
            Err(FrameError::Payload { kind: "call", .. })
        ));
    }

    #[test]
    fn test_missing_item_quantity_defaults_to_one() {
        let event = decode(r#"{"type":"NEW_ORDER","order_id":2,"items":[{"menu_name":"Tea"}]}"#)
            .expect("decode");
        let PushEvent::NewOrder(order) = event else {
            panic!("expected order");
        };
        assert_eq!(order.items[0].quantity, 1);
        assert_eq!(order.table_label(), "Unknown");
    }
}

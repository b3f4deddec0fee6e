use diesel::prelude::*;
use serde::Serialize;

use crate::db::postgres::schema::event_data;
use crate::protocol::ParsedEvent;

#[derive(Queryable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = event_data)]
pub struct EventData {
    pub id: i64,
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub event_name: String,
    pub payload: serde_json::Value,
}

#[derive(Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = event_data)]
pub struct NewEventData {
    pub trove_manager_id: i32,
    pub block_number: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub event_name: String,
    pub payload: serde_json::Value,
}

impl NewEventData {
    /// Identity under which a log may be stored at most once.
    pub fn dedupe_key(&self) -> (String, String, i64) {
        (self.tx_hash.clone(), self.event_name.clone(), self.log_index)
    }
}

impl ParsedEvent {
    pub fn map_to_db(&self, trove_manager_id: i32) -> NewEventData {
        NewEventData {
            trove_manager_id,
            block_number: self.block_number,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
            event_name: self.event_name.clone(),
            payload: self.event_data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parsed_event_maps_onto_its_trove_manager_row() {
        let event = ParsedEvent {
            trove_manager_index: 2,
            block_number: 900,
            tx_hash: "0xabc".to_string(),
            log_index: 4,
            event_name: "TroveUpdated".to_string(),
            event_data: json!({ "troveId": "7" }),
        };
        let row = event.map_to_db(11);
        assert_eq!(row.trove_manager_id, 11);
        assert_eq!(row.dedupe_key(), ("0xabc".to_string(), "TroveUpdated".to_string(), 4));
        assert_eq!(row.payload["troveId"], "7");
    }
}

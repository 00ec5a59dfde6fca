pub mod generated;

pub use generated::row_change::{ChangeKind, RowChangeEvent};

use prost::Message;
use uuid::Uuid;

impl RowChangeEvent {
    pub fn new(relation: &str, row_id: Uuid, kind: ChangeKind) -> Self {
        Self {
            relation: relation.to_string(),
            row_id: row_id.to_string(),
            kind: kind as i32,
        }
    }

    /// The pub/sub subject this event is published on: `<relation>.<created|updated>`
    /// (spec §6).
    pub fn subject(&self) -> String {
        let suffix = match self.kind() {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
        };
        format!("{}.{}", self.relation, suffix)
    }

    pub fn row_uuid(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.row_id)
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        Message::encode_to_vec(self)
    }

    pub fn decode_from_slice(buf: &[u8]) -> Result<Self, prost::DecodeError> {
        Message::decode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_wire_encoding() {
        let id = Uuid::now_v7();
        let event = RowChangeEvent::new("deployments", id, ChangeKind::Created);
        let bytes = event.encode_to_vec();
        let decoded = RowChangeEvent::decode_from_slice(&bytes).unwrap();

        assert_eq!(decoded.row_uuid().unwrap(), id);
        assert_eq!(decoded.subject(), "deployments.created");
    }
}

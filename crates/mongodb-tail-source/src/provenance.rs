//! Provenance fields added to every emitted event.

use bson::{Bson, Document};
use tail_core::{DocValue, FlatEvent};

use crate::cursor::Cursor;

pub const HOST_FIELD: &str = "host";
pub const ID_FIELD: &str = "mongo_id";
pub const DATE_FIELD: &str = "logdate";
pub const LOG_ENTRY_FIELD: &str = "log_entry";
pub const TIMESTAMP_FIELD: &str = "mongo_timestamp";
pub const MACHINE_ID_FIELD: &str = "mongo_machine_id";
pub const PROCESS_ID_FIELD: &str = "mongo_process_id";
pub const COUNTER_FIELD: &str = "mongo_counter";

/// Which optional provenance fields to add.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceOpts {
    pub unpack_mongo_id: bool,
    pub add_log_entry: bool,
}

/// Stamp provenance onto `event`, overwriting document fields of the same name.
pub fn stamp(
    event: &mut FlatEvent,
    host: &str,
    cursor: &Cursor,
    source: &Document,
    opts: ProvenanceOpts,
) {
    event.insert(HOST_FIELD, host);
    event.insert(ID_FIELD, cursor.to_hex());
    event.insert(DATE_FIELD, cursor.generation_time_rfc3339());

    if opts.add_log_entry {
        let entry = Bson::Document(source.clone()).into_relaxed_extjson();
        event.insert(LOG_ENTRY_FIELD, entry.to_string());
    }

    if opts.unpack_mongo_id {
        let unpacked = cursor.unpack();
        event.insert(TIMESTAMP_FIELD, DocValue::Int(i64::from(unpacked.timestamp)));
        event.insert(MACHINE_ID_FIELD, DocValue::Int(i64::from(unpacked.machine_id)));
        event.insert(PROCESS_ID_FIELD, DocValue::Int(i64::from(unpacked.process_id)));
        event.insert(COUNTER_FIELD, DocValue::Int(i64::from(unpacked.counter)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;

    fn cursor() -> Cursor {
        Cursor::new(ObjectId::parse_str("558de77ec5ed007567574a58").unwrap())
    }

    #[test]
    fn test_default_fields() {
        let mut event = FlatEvent::new();
        event.insert("host", "from-document");

        stamp(&mut event, "tailer-1", &cursor(), &doc! {}, ProvenanceOpts::default());

        assert_eq!(event.get(HOST_FIELD), Some(&DocValue::from("tailer-1")));
        assert_eq!(
            event.get(ID_FIELD),
            Some(&DocValue::from("558de77ec5ed007567574a58"))
        );
        assert_eq!(
            event.get(DATE_FIELD),
            Some(&DocValue::from("2015-06-26T23:59:58Z"))
        );
        assert!(!event.contains_key(LOG_ENTRY_FIELD));
        assert!(!event.contains_key(COUNTER_FIELD));
    }

    #[test]
    fn test_optional_fields() {
        let opts = ProvenanceOpts {
            unpack_mongo_id: true,
            add_log_entry: true,
        };
        let source = doc! { "_id": cursor().object_id(), "status": 200 };
        let mut event = FlatEvent::new();

        stamp(&mut event, "h", &cursor(), &source, opts);

        assert_eq!(event.get(TIMESTAMP_FIELD), Some(&DocValue::Int(0x558de77e)));
        assert_eq!(event.get(MACHINE_ID_FIELD), Some(&DocValue::Int(0xc5ed00)));
        assert_eq!(event.get(PROCESS_ID_FIELD), Some(&DocValue::Int(0x7567)));
        assert_eq!(event.get(COUNTER_FIELD), Some(&DocValue::Int(0x574a58)));

        let entry = event.get(LOG_ENTRY_FIELD).and_then(DocValue::as_str).unwrap();
        assert!(entry.contains(r#""$oid":"558de77ec5ed007567574a58""#));
        assert!(entry.contains(r#""status":200"#));
    }
}

//! Tests for the shared identifier and time types.

use super::*;

mod record_id_tests {
    use super::*;

    #[test]
    fn test_record_id_round_trips_through_display() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().expect("display output should parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_record_id_parse_trims_whitespace() {
        let id = RecordId::new();
        let parsed: RecordId = format!("  {}  ", id).parse().expect("padded id should parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_record_id_rejects_garbage() {
        let result = "not-a-record".parse::<RecordId>();
        assert!(matches!(result, Err(ParseError::InvalidFormat { .. })));
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }
}

mod timestamp_tests {
    use super::*;

    #[test]
    fn test_rfc3339_parse_and_format() {
        let ts = Timestamp::from_rfc3339("2025-12-30T13:15:19Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-12-30T13:15:19+00:00");
    }

    #[test]
    fn test_invalid_rfc3339_is_rejected() {
        assert!(Timestamp::from_rfc3339("yesterday").is_err());
    }

    #[test]
    fn test_subtract_duration_orders_earlier() {
        let now = Timestamp::now();
        let earlier = now.subtract_duration(Duration::from_secs(3600));
        assert!(earlier < now);
    }

    #[test]
    fn test_subtract_duration_saturates_instead_of_overflowing() {
        let now = Timestamp::now();

        let beyond_range = now.subtract_duration(Duration::from_secs(10_000_000_000 * 3600));
        assert_eq!(beyond_range, Timestamp::from(DateTime::<Utc>::MIN_UTC));

        let beyond_chrono = now.subtract_duration(Duration::MAX);
        assert_eq!(beyond_chrono, Timestamp::from(DateTime::<Utc>::MIN_UTC));
    }
}

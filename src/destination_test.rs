use super::*;

// =============================================================================
// BoardId
// =============================================================================

#[test]
fn board_id_parses_digits() {
    assert_eq!("7".parse::<BoardId>(), Ok(BoardId(7)));
    assert_eq!("0042".parse::<BoardId>(), Ok(BoardId(42)));
}

#[test]
fn board_id_rejects_non_digits() {
    for raw in ["", "abc", "-1", "+7", " 7", "7 ", "7a", "1.5"] {
        assert_eq!(
            raw.parse::<BoardId>(),
            Err(DestinationError::MalformedBoardId(raw.to_owned())),
            "{raw:?} should be rejected"
        );
    }
}

#[test]
fn board_id_rejects_overflow() {
    assert!("99999999999999999999999".parse::<BoardId>().is_err());
}

#[test]
fn board_id_serializes_as_number() {
    assert_eq!(serde_json::to_value(BoardId(9)).unwrap(), serde_json::json!(9));
}

// =============================================================================
// classify
// =============================================================================

#[test]
fn classify_board_topic() {
    assert_eq!(classify("/topic/board/7"), Ok(Destination::BoardTopic(BoardId(7))));
}

#[test]
fn classify_malformed_board_topic() {
    assert_eq!(
        classify("/topic/board/abc"),
        Err(DestinationError::MalformedBoardId("abc".into()))
    );
    assert!(classify("/topic/board/").is_err());
    assert!(classify("/topic/board/7/extra").is_err());
}

#[test]
fn classify_user_queue() {
    assert_eq!(
        classify("/user/queue/errors"),
        Ok(Destination::UserQueue("/queue/errors".into()))
    );
    assert_eq!(
        classify("/user/queue/"),
        Ok(Destination::Other("/user/queue/".into()))
    );
}

#[test]
fn classify_other() {
    assert_eq!(classify("/topic/news"), Ok(Destination::Other("/topic/news".into())));
}

// =============================================================================
// naming
// =============================================================================

#[test]
fn board_topic_naming() {
    assert_eq!(board_topic(BoardId(12)), "/topic/board/12");
}

#[test]
fn user_destination_naming() {
    assert_eq!(user_destination("alice", QUEUE_ERRORS), "/user/alice/queue/errors");
}

#[test]
fn user_destination_escapes_separators_in_username() {
    assert_eq!(user_destination("alice/queue/x", QUEUE_ERRORS), "/user/alice%2Fqueue%2Fx/queue/errors");
    assert_eq!(user_destination("a%2Fb", QUEUE_ERRORS), "/user/a%252Fb/queue/errors");
    assert_ne!(
        user_destination("alice", "/queue/x/queue/errors"),
        user_destination("alice/queue/x", QUEUE_ERRORS),
    );
    assert_ne!(user_destination("a/b", QUEUE_ERRORS), user_destination("a%2Fb", QUEUE_ERRORS));
}

// =============================================================================
// parse_app_destination
// =============================================================================

#[test]
fn app_destination_actions() {
    assert_eq!(parse_app_destination("/app/board/3/join"), Ok((BoardId(3), AppAction::Join)));
    assert_eq!(parse_app_destination("/app/board/3/leave"), Ok((BoardId(3), AppAction::Leave)));
    assert_eq!(parse_app_destination("/app/board/3/ping"), Ok((BoardId(3), AppAction::Ping)));
}

#[test]
fn app_destination_malformed_id() {
    assert_eq!(
        parse_app_destination("/app/board/x/join"),
        Err(DestinationError::MalformedBoardId("x".into()))
    );
}

#[test]
fn app_destination_unknown() {
    assert!(matches!(
        parse_app_destination("/app/board/3/dance"),
        Err(DestinationError::UnknownAction(_))
    ));
    assert!(matches!(
        parse_app_destination("/app/chat/3/join"),
        Err(DestinationError::UnknownAction(_))
    ));
    assert!(matches!(
        parse_app_destination("/app/board/3"),
        Err(DestinationError::UnknownAction(_))
    ));
}

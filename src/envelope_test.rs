use super::*;

fn task() -> TaskSnapshot {
    TaskSnapshot {
        id: Uuid::nil(),
        title: "Write release notes".into(),
        board_id: BoardId(4),
        description: None,
        owner: Some(UserSummary { id: 1, username: "alice".into() }),
        assigned_to: None,
        status: "TODO".into(),
    }
}

#[test]
fn kind_wire_names() {
    let names: Vec<String> = [
        UpdateKind::TaskCreated,
        UpdateKind::TaskUpdated,
        UpdateKind::TaskDeleted,
        UpdateKind::TaskAssigned,
        UpdateKind::UserJoined,
        UpdateKind::UserLeft,
        UpdateKind::BoardUpdated,
    ]
    .iter()
    .map(|k| serde_json::to_value(k).unwrap().as_str().unwrap().to_owned())
    .collect();
    assert_eq!(
        names,
        [
            "TASK_CREATED",
            "TASK_UPDATED",
            "TASK_DELETED",
            "TASK_ASSIGNED",
            "USER_JOINED",
            "USER_LEFT",
            "BOARD_UPDATED"
        ]
    );
}

#[test]
fn envelope_json_shape() {
    let env = UpdateEnvelope::new(UpdateKind::TaskCreated, BoardId(4), "alice created a new task").with_task(task());
    let json = serde_json::to_value(&env).unwrap();
    assert_eq!(json["type"], "TASK_CREATED");
    assert_eq!(json["boardId"], 4);
    assert_eq!(json["taskId"], Uuid::nil().to_string());
    assert_eq!(json["taskData"]["title"], "Write release notes");
    assert_eq!(json["taskData"]["owner"]["username"], "alice");
    assert!(json.get("username").is_none());
    assert!(json["timestamp"].as_i64().unwrap() > 0);
}

#[test]
fn with_user_sets_both_fields() {
    let env = UpdateEnvelope::new(UpdateKind::UserJoined, BoardId(1), "bob joined the board").with_user(Some(2), "bob");
    assert_eq!(env.user_id, Some(2));
    assert_eq!(env.username.as_deref(), Some("bob"));
    assert!(env.task_id.is_none());
}

#[test]
fn with_task_id_leaves_snapshot_empty() {
    let id = Uuid::new_v4();
    let env = UpdateEnvelope::new(UpdateKind::TaskDeleted, BoardId(1), "gone").with_task_id(id);
    assert_eq!(env.task_id, Some(id));
    assert!(env.task_data.is_none());
}

#[test]
fn private_reply_shapes() {
    let ok = PrivateReply::confirmation(BoardId(3), "Connected to board 3").with_active_users(2);
    let json = serde_json::to_value(&ok).unwrap();
    assert_eq!(json["status"], "confirmation");
    assert_eq!(json["activeUsers"], 2);
    assert!(json.get("code").is_none());

    let err = PrivateReply::error(None, "E_AUTH_REQUIRED", "Authentication required");
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["code"], "E_AUTH_REQUIRED");
    assert!(json.get("boardId").is_none());
}

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use taskboard_core::AppConfig;
use taskboard_domain::{Actor, BoardId, ListId, NewTask, Role, TaskId, User, UserId};
use taskboard_store::{BoardStore, MemoryStore};
use taskboard_sync::message::TaskOrder;
use taskboard_sync::{
    ConnectionHandler, ConnectionState, ErrorCode, Notification, NotificationService,
    NotifyError, ServerEvent, StaticTokenAuth, SyncState,
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use uuid::Uuid;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, Notification)>>,
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send(&self, user_id: UserId, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push((user_id, notification));
        Ok(())
    }
}

struct Harness {
    state: SyncState,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    board: BoardId,
    u1: UserId,
    u2: UserId,
    u3: UserId,
    todo: ListId,
    done: ListId,
    tasks: Vec<TaskId>,
}

/// Board B1 owned by u1, with u2 as admin and u3 as member.
/// Lists: Todo [T1, T2, T3] and Done [].
async fn harness_with(config: AppConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let u1 = store
        .insert_user(User::new("u1@example.com").with_username("u1"))
        .await
        .unwrap();
    let u2 = store.insert_user(User::new("u2@example.com")).await.unwrap();
    let u3 = store.insert_user(User::new("u3@example.com")).await.unwrap();
    store.insert_user(User::new("u4@example.com")).await.unwrap();

    let (board, _) = store.create_board("B1".to_string(), u1.id).await.unwrap();
    store
        .add_membership(board.id, u2.id, Role::Admin)
        .await
        .unwrap();
    store
        .add_membership(board.id, u3.id, Role::Member)
        .await
        .unwrap();

    let todo = store.create_list(board.id, "Todo".to_string()).await.unwrap();
    let done = store.create_list(board.id, "Done".to_string()).await.unwrap();
    let mut tasks = Vec::new();
    for title in ["T1", "T2", "T3"] {
        let task = store
            .create_task(
                todo.id,
                NewTask {
                    title: title.to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tasks.push(task.id);
    }

    let state = SyncState::new(
        &config,
        store.clone(),
        Arc::new(StaticTokenAuth::new(HashMap::new())),
        notifier.clone(),
    );

    Harness {
        state,
        store,
        notifier,
        board: board.id,
        u1: u1.id,
        u2: u2.id,
        u3: u3.id,
        todo: todo.id,
        done: done.id,
        tasks,
    }
}

async fn harness() -> Harness {
    let mut config = AppConfig::default();
    config.reminders.enabled = false;
    harness_with(config).await
}

async fn join(
    state: &SyncState,
    board: BoardId,
    actor: Actor,
) -> (ConnectionHandler, mpsc::Receiver<ServerEvent>) {
    let (mut handler, rx) = state.open_connection(board, actor);
    handler.connect().await.unwrap();
    (handler, rx)
}

/// Join and discard the initial snapshot.
async fn join_quiet(
    state: &SyncState,
    board: BoardId,
    user: UserId,
) -> (ConnectionHandler, mpsc::Receiver<ServerEvent>) {
    let (handler, mut rx) = join(state, board, Actor::User(user)).await;
    assert!(matches!(rx.try_recv(), Ok(ServerEvent::FullBoardState(_))));
    (handler, rx)
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn frame(action: &str, payload: Value) -> String {
    json!({"action": action, "payload": payload}).to_string()
}

fn error_code(event: &ServerEvent) -> Option<ErrorCode> {
    match event {
        ServerEvent::Error(error) => Some(error.code),
        _ => None,
    }
}

async fn orders(store: &MemoryStore, list: ListId) -> Vec<(TaskId, i32)> {
    store
        .tasks_in_list(list)
        .await
        .unwrap()
        .iter()
        .map(|t| (t.id, t.order))
        .collect()
}

#[tokio::test]
async fn test_member_receives_snapshot_first() {
    let h = harness().await;
    let (handler, mut rx) = join(&h.state, h.board, Actor::User(h.u3)).await;

    assert_eq!(handler.state(), ConnectionState::Joined);
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    let ServerEvent::FullBoardState(snapshot) = &events[0] else {
        panic!("expected snapshot, got {:?}", events[0]);
    };
    assert_eq!(snapshot.board.name, "B1");
    assert_eq!(snapshot.lists.len(), 2);
    let todo: Vec<i32> = snapshot.lists[0].tasks.iter().map(|t| t.order).collect();
    assert_eq!(todo, vec![0, 1, 2]);
    assert_eq!(snapshot.members[0].user_status, Role::Owner);
}

#[tokio::test]
async fn test_anonymous_joins_without_snapshot_and_is_denied() {
    let h = harness().await;
    let (mut anon, mut anon_rx) = join(&h.state, h.board, Actor::Anonymous).await;
    let (mut member, mut member_rx) = join_quiet(&h.state, h.board, h.u3).await;

    assert!(drain(&mut anon_rx).is_empty());

    anon.receive(&frame("delete_list", json!({"list_id": h.done})))
        .await;
    let events = drain(&mut anon_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::PermissionDenied));
    assert!(drain(&mut member_rx).is_empty());

    // Anonymous connections still observe board activity
    member
        .receive(&frame("edit_list_name", json!({"list_id": h.done, "name": "Shipped"})))
        .await;
    let events = drain(&mut anon_rx);
    assert!(matches!(&events[..], [ServerEvent::EditListName(renamed)] if renamed.name == "Shipped"));
}

#[tokio::test]
async fn test_unknown_board_is_refused() {
    let h = harness().await;
    let (mut handler, mut rx) = h.state.open_connection(Uuid::new_v4(), Actor::User(h.u1));

    assert!(handler.connect().await.is_err());
    assert_eq!(handler.state(), ConnectionState::Closed);
    let event = rx.recv().await.unwrap();
    assert_eq!(error_code(&event), Some(ErrorCode::NotFound));
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_move_task_reaches_every_subscriber() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
    let (_c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;
    let t1 = h.tasks[0];

    c1.receive(&frame(
        "move_task",
        json!({"task_id": t1, "source_list_id": h.todo, "target_list_id": h.done}),
    ))
    .await;

    let seen1 = drain(&mut rx1);
    let seen2 = drain(&mut rx2);
    assert_eq!(seen1, seen2);
    let [ServerEvent::MoveTask(moved)] = &seen1[..] else {
        panic!("unexpected {seen1:?}");
    };
    assert_eq!(moved.new_order, 0);
    assert_eq!(
        moved.source_orders,
        vec![
            TaskOrder { task_id: h.tasks[1], order: 0 },
            TaskOrder { task_id: h.tasks[2], order: 1 },
        ]
    );
    assert_eq!(orders(&h.store, h.done).await, vec![(t1, 0)]);
}

#[tokio::test]
async fn test_move_round_trip_appends_to_end() {
    let h = harness().await;
    let (mut c1, _rx1) = join_quiet(&h.state, h.board, h.u3).await;
    let t1 = h.tasks[0];

    c1.receive(&frame(
        "move_task",
        json!({"task_id": t1, "source_list_id": h.todo, "target_list_id": h.done}),
    ))
    .await;
    c1.receive(&frame(
        "move_task",
        json!({"task_id": t1, "source_list_id": h.done, "target_list_id": h.todo}),
    ))
    .await;

    assert_eq!(
        orders(&h.store, h.todo).await,
        vec![(h.tasks[1], 0), (h.tasks[2], 1), (t1, 2)]
    );
    assert!(orders(&h.store, h.done).await.is_empty());
}

#[tokio::test]
async fn test_reorder_assigns_positions() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u3).await;
    let [t1, t2, t3] = [h.tasks[0], h.tasks[1], h.tasks[2]];

    c1.receive(&frame(
        "reorder_task",
        json!({"list_id": h.todo, "task_order": [t3, t1, t2]}),
    ))
    .await;

    assert_eq!(
        orders(&h.store, h.todo).await,
        vec![(t3, 0), (t1, 1), (t2, 2)]
    );
    let events = drain(&mut rx1);
    let [ServerEvent::ReorderTask(reordered)] = &events[..] else {
        panic!("unexpected {events:?}");
    };
    assert_eq!(reordered.task_order[0], TaskOrder { task_id: t3, order: 0 });
}

#[tokio::test]
async fn test_partial_reorder_is_rejected_for_sender_only() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u3).await;
    let (_c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;
    let before = orders(&h.store, h.todo).await;

    c1.receive(&frame(
        "reorder_task",
        json!({"list_id": h.todo, "task_order": [h.tasks[2], h.tasks[0]]}),
    ))
    .await;

    let events = drain(&mut rx1);
    assert_eq!(events.len(), 1);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::Invalid));
    assert!(drain(&mut rx2).is_empty());
    assert_eq!(orders(&h.store, h.todo).await, before);
}

#[tokio::test]
async fn test_member_cannot_manage_members() {
    let h = harness().await;
    let (mut c3, mut rx3) = join_quiet(&h.state, h.board, h.u3).await;
    let (_c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;

    c3.receive(&frame(
        "delete_user",
        json!({"user_id": h.u2, "board_id": h.board}),
    ))
    .await;
    c3.receive(&frame(
        "set_status",
        json!({"user_id": h.u2, "user_status": "member"}),
    ))
    .await;

    let codes: Vec<_> = drain(&mut rx3).iter().map(error_code).collect();
    assert_eq!(
        codes,
        vec![
            Some(ErrorCode::PermissionDenied),
            Some(ErrorCode::PermissionDenied)
        ]
    );
    assert!(drain(&mut rx1).is_empty());
    let u2 = h
        .store
        .get_membership(h.board, h.u2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(u2.role, Role::Admin);
}

#[tokio::test]
async fn test_add_user_broadcasts_new_member() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
    let (_c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;

    c1.receive(&frame(
        "add_user",
        json!({"emails": ["u4@example.com"], "board_id": h.board}),
    ))
    .await;

    for rx in [&mut rx1, &mut rx2] {
        let events = drain(rx);
        assert_eq!(events.len(), 1);
        let value = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(value["action"], "add_user");
        assert_eq!(value["payload"]["email"], "u4@example.com");
        assert_eq!(value["payload"]["user_status"], "member");
    }

    let sent = h.notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].1, Notification::AddedToBoard { .. }));
}

#[tokio::test]
async fn test_removed_member_is_disconnected() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
    let (_c3, mut rx3) = join_quiet(&h.state, h.board, h.u3).await;

    c1.receive(&frame(
        "delete_user",
        json!({"user_id": h.u3, "board_id": h.board}),
    ))
    .await;

    assert!(matches!(drain(&mut rx1)[..], [ServerEvent::DeleteUser(_)]));
    assert!(matches!(rx3.recv().await, Some(ServerEvent::DeleteUser(_))));
    assert!(rx3.recv().await.is_none());
    assert_eq!(h.state.registry().subscriber_count(h.board), 1);
}

#[tokio::test]
async fn test_delete_list_cascades() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u2).await;

    c1.receive(&frame("delete_list", json!({"list_id": h.todo})))
        .await;

    let events = drain(&mut rx1);
    let [ServerEvent::DeleteList(deleted)] = &events[..] else {
        panic!("unexpected {events:?}");
    };
    assert_eq!(deleted.task_ids.len(), 3);
    for task in &h.tasks {
        assert!(h.store.get_task(*task).await.unwrap().is_none());
    }
    assert!(h.store.get_list(h.todo).await.unwrap().is_none());
}

#[tokio::test]
async fn test_broadcasts_stay_on_their_board() {
    let h = harness().await;
    let (other, _) = h
        .store
        .create_board("B2".to_string(), h.u1)
        .await
        .unwrap();
    let (mut c1, _rx1) = join_quiet(&h.state, h.board, h.u1).await;
    let (_c2, mut rx_other) = join_quiet(&h.state, other.id, h.u1).await;

    c1.receive(&frame("add_list", json!({"name": "Review", "board": h.board})))
        .await;

    assert!(drain(&mut rx_other).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_actions_are_seen_in_one_order() {
    for _ in 0..25 {
        let h = harness().await;
        let (c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
        let (c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;
        let (_c3, mut rx3) = join_quiet(&h.state, h.board, h.u3).await;

        let a = frame(
            "move_task",
            json!({"task_id": h.tasks[0], "source_list_id": h.todo, "target_list_id": h.done}),
        );
        let b = frame(
            "move_task",
            json!({"task_id": h.tasks[1], "source_list_id": h.todo, "target_list_id": h.done}),
        );
        let c = frame("add_list", json!({"name": "Later", "board": h.board}));

        let first = tokio::spawn(async move {
            let mut c1 = c1;
            c1.receive(&a).await;
            c1.receive(&c).await;
            c1
        });
        let second = tokio::spawn(async move {
            let mut c2 = c2;
            c2.receive(&b).await;
            c2
        });
        let _c1 = first.await.unwrap();
        let _c2 = second.await.unwrap();

        let seen1 = drain(&mut rx1);
        let seen2 = drain(&mut rx2);
        let seen3 = drain(&mut rx3);
        assert_eq!(seen1.len(), 3);
        assert_eq!(seen1, seen2);
        assert_eq!(seen1, seen3);

        let done = orders(&h.store, h.done).await;
        let positions: Vec<i32> = done.iter().map(|(_, order)| *order).collect();
        assert_eq!(positions, vec![0, 1]);
        let todo = orders(&h.store, h.todo).await;
        assert_eq!(todo, vec![(h.tasks[2], 0)]);
    }
}

#[tokio::test]
async fn test_delete_board_closes_every_session() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
    let (_c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;

    let state = c1
        .receive(&frame(
            "delete_board",
            json!({"board_id": h.board, "owner_id": h.u1}),
        ))
        .await;

    assert_eq!(state, ConnectionState::Closed);
    for rx in [&mut rx1, &mut rx2] {
        assert!(matches!(rx.recv().await, Some(ServerEvent::DeleteBoard(_))));
        assert!(rx.recv().await.is_none());
    }
    assert_eq!(h.state.registry().board_count(), 0);
    assert!(h.store.get_board(h.board).await.unwrap().is_none());
}

#[tokio::test]
async fn test_admin_cannot_delete_board() {
    let h = harness().await;
    let (mut c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;

    c2.receive(&frame(
        "delete_board",
        json!({"board_id": h.board, "owner_id": h.u2}),
    ))
    .await;

    let events = drain(&mut rx2);
    assert_eq!(error_code(&events[0]), Some(ErrorCode::PermissionDenied));
    assert!(h.store.get_board(h.board).await.unwrap().is_some());
}

#[tokio::test]
async fn test_unknown_action_is_ignored_and_malformed_is_reported() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;

    c1.receive(&frame("dance", json!({}))).await;
    assert!(drain(&mut rx1).is_empty());

    c1.receive(&frame("move_task", json!({"task_id": "not-a-uuid"})))
        .await;
    let events = drain(&mut rx1);
    let [ServerEvent::Error(error)] = &events[..] else {
        panic!("unexpected {events:?}");
    };
    assert_eq!(error.code, ErrorCode::Malformed);
    assert_eq!(error.action.as_deref(), Some("move_task"));
}

#[tokio::test]
async fn test_request_id_is_acknowledged() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;

    let text = json!({
        "action": "update_board_name",
        "payload": {"board_id": h.board, "name": "Roadmap"},
        "request_id": "42"
    })
    .to_string();
    c1.receive(&text).await;

    let events = drain(&mut rx1);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ServerEvent::UpdateBoardName(renamed) if renamed.name == "Roadmap"));
    assert!(matches!(&events[1], ServerEvent::Ack(ack) if ack.request_id == "42"));
}

#[tokio::test]
async fn test_sender_echo_can_be_disabled() {
    let mut config = AppConfig::default();
    config.reminders.enabled = false;
    config.sync.echo_to_sender = false;
    config.sync.acknowledge_actions = false;
    let h = harness_with(config).await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
    let (_c2, mut rx2) = join_quiet(&h.state, h.board, h.u2).await;

    c1.receive(&frame(
        "add_task",
        json!({"list_id": h.done, "title": "Ship it"}),
    ))
    .await;

    assert!(drain(&mut rx1).is_empty());
    assert!(matches!(drain(&mut rx2)[..], [ServerEvent::AddTask(_)]));
}

#[tokio::test]
async fn test_update_task_clears_due_date() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u3).await;
    let t1 = h.tasks[0];

    c1.receive(&frame(
        "update_task",
        json!({"task_id": t1, "due_date": "2030-01-01T00:00:00Z", "priority": "red"}),
    ))
    .await;
    c1.receive(&frame(
        "update_task",
        json!({"task_id": t1, "due_date": null, "completed": true}),
    ))
    .await;

    let task = h.store.get_task(t1).await.unwrap().unwrap();
    assert_eq!(task.due_date, None);
    assert!(task.completed);
    assert_eq!(task.priority, taskboard_domain::TaskPriority::Red);
    assert_eq!(drain(&mut rx1).len(), 2);
}

#[tokio::test]
async fn test_closed_handler_leaves_registry() {
    let h = harness().await;
    let (mut c1, mut rx1) = join_quiet(&h.state, h.board, h.u1).await;
    assert_eq!(h.state.registry().subscriber_count(h.board), 1);

    c1.close();
    c1.close();

    assert_eq!(c1.state(), ConnectionState::Closed);
    assert_eq!(h.state.registry().board_count(), 0);
    assert!(matches!(rx1.try_recv(), Err(TryRecvError::Disconnected)));

    c1.receive(&frame("delete_list", json!({"list_id": h.todo})))
        .await;
    assert!(h.store.get_list(h.todo).await.unwrap().is_some());
}
